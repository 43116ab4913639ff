//! Persistent stores for backlog items and clarification questions.
//!
//! Both stores are document-plus-index layouts over the substrate:
//! a JSON document per entity, membership sets as indices, and a project
//! registry. Each store has a single writer component (the orchestrator);
//! readers are unrestricted.

pub mod backlog;
pub mod question;

pub use backlog::{BacklogItem, BacklogStore, ItemType};
pub use question::{AnswerType, Question, QuestionStatus, QuestionStore};
