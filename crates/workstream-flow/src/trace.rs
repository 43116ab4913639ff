//! Per-correlation decision trace.
//!
//! Orchestration decisions (DoD verdicts, clarifications, dispatches) are
//! appended to a list keyed by correlation id, so the full decision history
//! of one workflow can be read back in order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{rfc3339_seconds, utc_now_secs};
use crate::error::Result;
use crate::substrate::Substrate;

/// One recorded decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// When the decision was made.
    #[serde(with = "rfc3339_seconds")]
    pub timestamp: DateTime<Utc>,
    /// The component that decided (e.g. `orchestrator`).
    pub actor: String,
    /// The event type that triggered the decision.
    pub event_type: String,
    /// Short decision label (e.g. `definition_of_done_passed`).
    pub decision: String,
    /// Free-form structured context.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl TraceRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        actor: impl Into<String>,
        event_type: impl Into<String>,
        decision: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            timestamp: utc_now_secs(),
            actor: actor.into(),
            event_type: event_type.into(),
            decision: decision.into(),
            details,
        }
    }
}

/// Append-only decision log keyed by correlation id.
#[derive(Debug, Clone)]
pub struct TraceLogger<S> {
    substrate: Arc<S>,
    prefix: String,
}

impl<S: Substrate> TraceLogger<S> {
    /// Creates a logger writing lists under `{prefix}:{correlation_id}`.
    pub fn new(substrate: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            substrate,
            prefix: prefix.into(),
        }
    }

    fn key(&self, correlation_id: &str) -> String {
        format!("{}:{}", self.prefix, correlation_id)
    }

    /// Appends a record to the correlation's trace.
    ///
    /// # Errors
    ///
    /// Fails on serialization or substrate errors.
    pub async fn record(&self, correlation_id: &str, record: &TraceRecord) -> Result<()> {
        let encoded = serde_json::to_string(record)?;
        self.substrate
            .list_push(&self.key(correlation_id), &encoded)
            .await?;
        Ok(())
    }

    /// Reads the full trace of a correlation in append order.
    ///
    /// Entries that fail to parse are skipped.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn read(&self, correlation_id: &str) -> Result<Vec<TraceRecord>> {
        let raw = self.substrate.list_range(&self.key(correlation_id)).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::memory::InMemorySubstrate;
    use serde_json::json;

    #[tokio::test]
    async fn records_are_read_back_in_order() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let trace = TraceLogger::new(substrate, "audit:trace");

        trace
            .record(
                "corr-1",
                &TraceRecord::new("orchestrator", "WORK.ITEM_COMPLETED", "dod_passed", json!({})),
            )
            .await
            .unwrap();
        trace
            .record(
                "corr-1",
                &TraceRecord::new(
                    "orchestrator",
                    "WORK.ITEM_COMPLETED",
                    "status_done",
                    json!({"item": "b1"}),
                ),
            )
            .await
            .unwrap();

        let records = trace.read("corr-1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision, "dod_passed");
        assert_eq!(records[1].decision, "status_done");

        // other correlations are untouched
        assert!(trace.read("corr-2").await.unwrap().is_empty());
    }
}
