//! Event envelope and the tagged event-type union.
//!
//! Every message on the main stream is an [`Envelope`]: a canonical header
//! (id, type, time, source, correlation/causation) around a JSON payload.
//! On the wire an entry carries a single field `event` whose value is the
//! UTF-8 JSON encoding of the envelope; consumers tolerate extra fields.
//!
//! Payloads are modeled as [`EventPayload`], a union keyed by `event_type`.
//! Decoding dispatches on the tag and fails with a contract error for
//! unknown types; the raw JSON payload stays available on the envelope for
//! schema validation and replay.
//!
//! ## Correlation and causation
//!
//! - `correlation_id` ties together all events of one business workflow and
//!   is propagated unchanged (generated when absent)
//! - `causation_id` is the `event_id` whose processing emitted this event
//!
//! Causation travels in-band; nothing relies on stream ordering for it.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use workstream_core::{BacklogItemId, EventId, ProjectId, QuestionId};

use crate::error::{Error, Result};
use crate::failure::FailureCategory;
use crate::store::backlog::ItemType;
use crate::store::question::AnswerType;
use crate::substrate::RawFields;

/// Event type identifiers as they appear on the wire.
pub mod types {
    /// A new intake request entered the system.
    pub const INITIAL_REQUEST_RECEIVED: &str = "PROJECT.INITIAL_REQUEST_RECEIVED";
    /// A backlog item was handed to a worker.
    pub const ITEM_DISPATCHED: &str = "WORK.ITEM_DISPATCHED";
    /// A worker began executing a dispatched item.
    pub const ITEM_STARTED: &str = "WORK.ITEM_STARTED";
    /// A worker finished an item and submitted evidence.
    pub const ITEM_COMPLETED: &str = "WORK.ITEM_COMPLETED";
    /// An item failed terminally.
    pub const ITEM_FAILED: &str = "WORK.ITEM_FAILED";
    /// A worker published a deliverable.
    pub const DELIVERABLE_PUBLISHED: &str = "DELIVERABLE.PUBLISHED";
    /// A clarification question was created.
    pub const QUESTION_CREATED: &str = "QUESTION.CREATED";
    /// Required inputs are missing; a human answer is needed.
    pub const CLARIFICATION_NEEDED: &str = "CLARIFICATION.NEEDED";
    /// A human answered a clarification question.
    pub const ANSWER_SUBMITTED: &str = "USER.ANSWER_SUBMITTED";
    /// A blocked backlog item became ready again.
    pub const ITEM_UNBLOCKED: &str = "BACKLOG.ITEM_UNBLOCKED";
}

/// RFC3339 timestamps at seconds precision.
pub(crate) mod rfc3339_seconds {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a timestamp as RFC3339 with seconds precision.
    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    /// Deserializes an RFC3339 timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Returns the current UTC time truncated to seconds precision.
#[must_use]
pub(crate) fn utc_now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Payload of `PROJECT.INITIAL_REQUEST_RECEIVED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialRequestPayload {
    /// The project the request belongs to.
    pub project_id: ProjectId,
    /// Free-form request text from the intake boundary.
    pub request_text: String,
}

/// Payload of `WORK.ITEM_DISPATCHED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDispatchedPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The dispatched backlog item.
    pub backlog_item_id: BacklogItemId,
    /// The item's type.
    pub item_type: ItemType,
    /// Worker agent the item is routed to (required for agent tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_target: Option<String>,
    /// Opaque per-type inputs for the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_context: Option<Value>,
}

/// Payload of `WORK.ITEM_STARTED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStartedPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The started backlog item.
    pub backlog_item_id: BacklogItemId,
}

/// Payload of `WORK.ITEM_COMPLETED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCompletedPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The completed backlog item.
    pub backlog_item_id: BacklogItemId,
    /// Evidence object evaluated by the Definition of Done.
    pub evidence: Value,
}

/// Payload of `WORK.ITEM_FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailedPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The failed backlog item.
    pub backlog_item_id: BacklogItemId,
    /// Human-readable failure description.
    pub reason: String,
    /// Failure taxonomy category.
    pub category: FailureCategory,
}

/// Payload of `DELIVERABLE.PUBLISHED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverablePublishedPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The backlog item the deliverable belongs to.
    pub backlog_item_id: BacklogItemId,
    /// The deliverable object.
    pub deliverable: Value,
}

/// Payload of `QUESTION.CREATED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionCreatedPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The new question.
    pub question_id: QuestionId,
    /// The backlog item blocked by the question.
    pub backlog_item_id: BacklogItemId,
    /// The question text shown to a human.
    pub question_text: String,
    /// The kind of answer expected.
    pub expected_answer_type: AnswerType,
}

/// Payload of `CLARIFICATION.NEEDED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationNeededPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The backlog item that cannot proceed.
    pub backlog_item_id: BacklogItemId,
    /// Names of the inputs that are missing.
    pub missing_fields: Vec<String>,
    /// Optional human-readable context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `USER.ANSWER_SUBMITTED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmittedPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The question being answered.
    pub question_id: QuestionId,
    /// The normalized answer value.
    pub answer: Value,
}

/// Payload of `BACKLOG.ITEM_UNBLOCKED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUnblockedPayload {
    /// The owning project.
    pub project_id: ProjectId,
    /// The item that became ready again.
    pub backlog_item_id: BacklogItemId,
}

/// Tagged union of all event payloads, keyed by `event_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// `PROJECT.INITIAL_REQUEST_RECEIVED`
    InitialRequestReceived(InitialRequestPayload),
    /// `WORK.ITEM_DISPATCHED`
    ItemDispatched(ItemDispatchedPayload),
    /// `WORK.ITEM_STARTED`
    ItemStarted(ItemStartedPayload),
    /// `WORK.ITEM_COMPLETED`
    ItemCompleted(ItemCompletedPayload),
    /// `WORK.ITEM_FAILED`
    ItemFailed(ItemFailedPayload),
    /// `DELIVERABLE.PUBLISHED`
    DeliverablePublished(DeliverablePublishedPayload),
    /// `QUESTION.CREATED`
    QuestionCreated(QuestionCreatedPayload),
    /// `CLARIFICATION.NEEDED`
    ClarificationNeeded(ClarificationNeededPayload),
    /// `USER.ANSWER_SUBMITTED`
    AnswerSubmitted(AnswerSubmittedPayload),
    /// `BACKLOG.ITEM_UNBLOCKED`
    ItemUnblocked(ItemUnblockedPayload),
}

impl EventPayload {
    /// Returns the wire `event_type` for this payload.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::InitialRequestReceived(_) => types::INITIAL_REQUEST_RECEIVED,
            Self::ItemDispatched(_) => types::ITEM_DISPATCHED,
            Self::ItemStarted(_) => types::ITEM_STARTED,
            Self::ItemCompleted(_) => types::ITEM_COMPLETED,
            Self::ItemFailed(_) => types::ITEM_FAILED,
            Self::DeliverablePublished(_) => types::DELIVERABLE_PUBLISHED,
            Self::QuestionCreated(_) => types::QUESTION_CREATED,
            Self::ClarificationNeeded(_) => types::CLARIFICATION_NEEDED,
            Self::AnswerSubmitted(_) => types::ANSWER_SUBMITTED,
            Self::ItemUnblocked(_) => types::ITEM_UNBLOCKED,
        }
    }

    /// Decodes a raw payload value for the given event type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEventType`] for unrecognized types and a
    /// serialization error when the payload does not match the type's shape.
    pub fn decode(event_type: &str, payload: &Value) -> Result<Self> {
        let payload = payload.clone();
        match event_type {
            types::INITIAL_REQUEST_RECEIVED => Ok(Self::InitialRequestReceived(
                serde_json::from_value(payload)?,
            )),
            types::ITEM_DISPATCHED => Ok(Self::ItemDispatched(serde_json::from_value(payload)?)),
            types::ITEM_STARTED => Ok(Self::ItemStarted(serde_json::from_value(payload)?)),
            types::ITEM_COMPLETED => Ok(Self::ItemCompleted(serde_json::from_value(payload)?)),
            types::ITEM_FAILED => Ok(Self::ItemFailed(serde_json::from_value(payload)?)),
            types::DELIVERABLE_PUBLISHED => Ok(Self::DeliverablePublished(
                serde_json::from_value(payload)?,
            )),
            types::QUESTION_CREATED => Ok(Self::QuestionCreated(serde_json::from_value(payload)?)),
            types::CLARIFICATION_NEEDED => Ok(Self::ClarificationNeeded(
                serde_json::from_value(payload)?,
            )),
            types::ANSWER_SUBMITTED => Ok(Self::AnswerSubmitted(serde_json::from_value(payload)?)),
            types::ITEM_UNBLOCKED => Ok(Self::ItemUnblocked(serde_json::from_value(payload)?)),
            other => Err(Error::UnknownEventType {
                event_type: other.to_string(),
            }),
        }
    }

    /// Serializes the payload to its raw JSON object form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        // Every variant holds only JSON-representable data.
        let encoded = match self {
            Self::InitialRequestReceived(p) => serde_json::to_value(p),
            Self::ItemDispatched(p) => serde_json::to_value(p),
            Self::ItemStarted(p) => serde_json::to_value(p),
            Self::ItemCompleted(p) => serde_json::to_value(p),
            Self::ItemFailed(p) => serde_json::to_value(p),
            Self::DeliverablePublished(p) => serde_json::to_value(p),
            Self::QuestionCreated(p) => serde_json::to_value(p),
            Self::ClarificationNeeded(p) => serde_json::to_value(p),
            Self::AnswerSubmitted(p) => serde_json::to_value(p),
            Self::ItemUnblocked(p) => serde_json::to_value(p),
        };
        encoded.unwrap_or(Value::Object(Map::new()))
    }
}

/// Canonical wrapper for every event on the main stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique event identifier.
    pub event_id: EventId,
    /// Dotted event type identifier, e.g. `WORK.ITEM_DISPATCHED`.
    pub event_type: String,
    /// Schema version of the payload (1 unless stated otherwise).
    pub event_version: u32,
    /// When the event was produced (UTC, seconds precision).
    #[serde(with = "rfc3339_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Logical producer name.
    pub source: String,
    /// Producer instance tag (defaults to `source`).
    pub instance: String,
    /// Identifier linking all events of one business workflow.
    pub correlation_id: String,
    /// The `event_id` whose processing emitted this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,
    /// The raw payload object; schema chosen by `event_type`.
    pub payload: Value,
}

impl Envelope {
    /// Builds an envelope with a fresh `event_id`, the current timestamp,
    /// and a generated correlation id.
    #[must_use]
    pub fn build(payload: EventPayload, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            event_id: EventId::generate(),
            event_type: payload.event_type().to_string(),
            event_version: 1,
            timestamp: utc_now_secs(),
            instance: source.clone(),
            source,
            correlation_id: ulid::Ulid::new().to_string(),
            causation_id: None,
            payload: payload.to_value(),
        }
    }

    /// Sets the correlation id (propagated unchanged across a workflow).
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Sets the causation id.
    #[must_use]
    pub fn with_causation_id(mut self, causation_id: EventId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Sets the producer instance tag.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Sets the payload schema version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.event_version = version;
        self
    }

    /// Decodes the payload into the typed event union.
    ///
    /// # Errors
    ///
    /// Fails with a contract error when the `event_type` is unknown or the
    /// payload does not match its declared shape.
    pub fn typed_payload(&self) -> Result<EventPayload> {
        EventPayload::decode(&self.event_type, &self.payload)
    }

    /// Serializes the envelope to its on-the-wire field map.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when JSON encoding fails.
    pub fn encode(&self) -> Result<RawFields> {
        let mut fields = RawFields::new();
        fields.insert("event".to_string(), serde_json::to_string(self)?);
        Ok(fields)
    }

    /// Parses an envelope from raw stream fields.
    ///
    /// Tolerates extra fields on the entry; only `event` is consulted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] when the `event` field is absent or not
    /// valid JSON for an envelope.
    pub fn decode(fields: &RawFields) -> Result<Self> {
        let raw = fields
            .get("event")
            .ok_or_else(|| Error::decode("missing field 'event'"))?;
        serde_json::from_str(raw).map_err(|e| Error::decode(format!("invalid envelope json: {e}")))
    }
}
