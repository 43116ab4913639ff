//! # workstream-flow
//!
//! Event-driven workflow runtime coordinating a backlog of work items
//! through a durable, ordered event log backed by a shared key/value store.
//!
//! This crate implements the runtime domain, providing:
//!
//! - **Reliable consumption**: consumer groups with at-least-once delivery,
//!   idempotence, pending-entry reclaim, bounded retry, and a dead-letter
//!   stream
//! - **Schema contracts**: an envelope schema plus one payload schema per
//!   event type, enforced on every entry
//! - **Orchestration**: backlog generation, lease-serialized dispatch,
//!   state-machine enforcement, and Definition-of-Done gating
//! - **Clarification loop**: ambiguity detection, question/answer
//!   persistence, and block/unblock of backlog items
//!
//! ## Core Concepts
//!
//! - **Envelope**: the canonical wrapper for every event (id, type, time,
//!   source, correlation/causation, payload)
//! - **Backlog item**: the unit of dispatchable work, owned by a project and
//!   governed by the status state machine
//! - **Consumer group**: a named set of cooperating consumers sharing a
//!   stream; each entry is delivered to the group once, modulo retries
//!
//! ## Example
//!
//! ```rust,no_run
//! use workstream_flow::envelope::{Envelope, EventPayload, InitialRequestPayload};
//!
//! let payload = EventPayload::InitialRequestReceived(InitialRequestPayload {
//!     project_id: "P1".parse().expect("non-empty id"),
//!     request_text: "full audit of the support workflow".into(),
//! });
//! let envelope = Envelope::build(payload, "gateway").with_correlation_id("corr-1");
//! let fields = envelope.encode().expect("envelope serializes");
//! assert!(fields.contains_key("event"));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod consumer;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod failure;
pub mod idempotence;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod publish;
pub mod schema;
pub mod state;
pub mod store;
pub mod substrate;
pub mod trace;
pub mod validator;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::consumer::{ConsumerConfig, EventHandler, HandlerError, StreamConsumer};
    pub use crate::dlq::{DlqPublisher, DlqRecord};
    pub use crate::envelope::{Envelope, EventPayload};
    pub use crate::error::{Error, Result};
    pub use crate::failure::FailureCategory;
    pub use crate::idempotence::IdempotenceGuard;
    pub use crate::lock::{LockLease, LockService};
    pub use crate::metrics::RuntimeMetrics;
    pub use crate::orchestrator::Orchestrator;
    pub use crate::publish::StreamPublisher;
    pub use crate::schema::SchemaRegistry;
    pub use crate::state::{assert_transition, BacklogStatus};
    pub use crate::store::{BacklogItem, BacklogStore, ItemType, Question, QuestionStore};
    pub use crate::substrate::{memory::InMemorySubstrate, RawFields, StreamEntry, Substrate};
    pub use crate::validator::ValidatorService;
    pub use crate::worker::{AgentError, AgentOutcome, WorkOrder, WorkerAgent, WorkerRuntime};
}
