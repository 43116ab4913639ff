//! # workstream-core
//!
//! Shared building blocks for the workstream runtime:
//!
//! - **Strongly-typed identifiers**: opaque, unique tokens for projects,
//!   backlog items, questions, and events
//! - **Error types**: the core error enum shared across crates
//! - **Observability**: logging bootstrap and span constructors
//!
//! Everything else (substrate, consumer runtime, orchestration) lives in
//! `workstream-flow`; this crate has no I/O and no async surface.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::{BacklogItemId, EventId, ProjectId, QuestionId};
