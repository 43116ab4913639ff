//! Dead-letter quarantine for entries that cannot be processed.
//!
//! A DLQ record preserves the rejected entry's raw fields verbatim alongside
//! the rejection reason and, when the `event` field parses, the decoded
//! envelope. DLQ entries carry a single field `dlq` holding the JSON record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{rfc3339_seconds, utc_now_secs};
use crate::error::{Error, Result};
use crate::substrate::{RawFields, Substrate};

/// One quarantined entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    /// When the entry was quarantined.
    #[serde(with = "rfc3339_seconds")]
    pub timestamp: DateTime<Utc>,
    /// `event_id` extracted from the original entry, best effort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// `event_type` extracted from the original entry, best effort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Why the entry was quarantined.
    pub reason: String,
    /// Detail accompanying the reason, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// `$id` of the schema that rejected the entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    /// The decoded envelope, when the original `event` field parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_event: Option<Value>,
    /// Verbatim copy of the rejected entry's raw fields.
    pub original_fields: RawFields,
}

impl DlqRecord {
    /// Parses a DLQ record from the raw fields of a DLQ stream entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] when the `dlq` field is absent or invalid.
    pub fn decode(fields: &RawFields) -> Result<Self> {
        let raw = fields
            .get("dlq")
            .ok_or_else(|| Error::decode("missing field 'dlq'"))?;
        serde_json::from_str(raw).map_err(|e| Error::decode(format!("invalid dlq json: {e}")))
    }
}

/// Publisher appending quarantine records to the DLQ stream.
#[derive(Debug, Clone)]
pub struct DlqPublisher<S> {
    substrate: Arc<S>,
    stream: String,
}

impl<S: Substrate> DlqPublisher<S> {
    /// Creates a publisher for the given DLQ stream.
    pub fn new(substrate: Arc<S>, stream: impl Into<String>) -> Self {
        Self {
            substrate,
            stream: stream.into(),
        }
    }

    /// Returns the DLQ stream name.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Quarantines an entry.
    ///
    /// Never fails on malformed caller input: the original fields are copied
    /// verbatim and the envelope decode is best effort.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures only.
    pub async fn publish(
        &self,
        reason: &str,
        original_fields: &RawFields,
        schema_id: Option<&str>,
    ) -> Result<String> {
        self.publish_detailed(reason, None, original_fields, schema_id)
            .await
    }

    /// Quarantines an entry with an additional free-form detail string.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures only.
    pub async fn publish_detailed(
        &self,
        reason: &str,
        detail: Option<&str>,
        original_fields: &RawFields,
        schema_id: Option<&str>,
    ) -> Result<String> {
        let original_event = original_fields
            .get("event")
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
        let record = DlqRecord {
            timestamp: utc_now_secs(),
            event_id: extract(original_event.as_ref(), "event_id"),
            event_type: extract(original_event.as_ref(), "event_type"),
            reason: reason.to_string(),
            detail: detail.map(ToString::to_string),
            schema_id: schema_id.map(ToString::to_string),
            original_event,
            original_fields: original_fields.clone(),
        };
        let mut fields = RawFields::new();
        fields.insert("dlq".to_string(), serde_json::to_string(&record)?);
        self.substrate.stream_append(&self.stream, &fields).await
    }
}

fn extract(event: Option<&Value>, field: &str) -> Option<String> {
    event
        .and_then(|value| value.get(field))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Envelope, EventPayload, InitialRequestPayload};
    use crate::substrate::memory::InMemorySubstrate;

    fn publisher() -> (Arc<InMemorySubstrate>, DlqPublisher<InMemorySubstrate>) {
        let substrate = Arc::new(InMemorySubstrate::new());
        let publisher = DlqPublisher::new(substrate.clone(), "audit:dlq");
        (substrate, publisher)
    }

    #[tokio::test]
    async fn preserves_original_fields_verbatim() {
        let (substrate, publisher) = publisher();
        let mut fields = RawFields::new();
        fields.insert("event".to_string(), "{not json".to_string());
        fields.insert("shard".to_string(), "7".to_string());

        publisher
            .publish("envelope_decode", &fields, None)
            .await
            .unwrap();

        let entries = substrate.stream_range("audit:dlq").await.unwrap();
        assert_eq!(entries.len(), 1);
        let record = DlqRecord::decode(&entries[0].fields).unwrap();
        assert_eq!(record.reason, "envelope_decode");
        assert_eq!(record.original_fields, fields);
        assert!(record.original_event.is_none());
        assert!(record.event_id.is_none());
    }

    #[tokio::test]
    async fn decodes_the_original_event_when_parseable() {
        let (substrate, publisher) = publisher();
        let envelope = Envelope::build(
            EventPayload::InitialRequestReceived(InitialRequestPayload {
                project_id: "P1".parse().unwrap(),
                request_text: "full audit".into(),
            }),
            "gateway",
        );
        let fields = envelope.encode().unwrap();

        publisher
            .publish_detailed(
                "payload_validation",
                Some("request_text is required"),
                &fields,
                Some("test://schema"),
            )
            .await
            .unwrap();

        let entries = substrate.stream_range("audit:dlq").await.unwrap();
        let record = DlqRecord::decode(&entries[0].fields).unwrap();
        assert_eq!(record.event_id.as_deref(), Some(envelope.event_id.as_str()));
        assert_eq!(
            record.event_type.as_deref(),
            Some("PROJECT.INITIAL_REQUEST_RECEIVED")
        );
        assert_eq!(record.schema_id.as_deref(), Some("test://schema"));
        assert!(record.original_event.is_some());
        assert_eq!(record.detail.as_deref(), Some("request_text is required"));
    }

    #[tokio::test]
    async fn empty_fields_do_not_fail() {
        let (_, publisher) = publisher();
        let id = publisher
            .publish("envelope_decode", &RawFields::new(), None)
            .await
            .unwrap();
        assert!(!id.is_empty());
    }
}
