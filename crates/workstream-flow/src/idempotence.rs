//! Per-`(consumer_group, event_id)` once-only markers.
//!
//! Markers are plain keys with a TTL at least as long as the expected replay
//! window, so duplicate deliveries are absorbed without unbounded growth.

use std::sync::Arc;
use std::time::Duration;

use workstream_core::EventId;

use crate::envelope::utc_now_secs;
use crate::error::Result;
use crate::substrate::Substrate;

/// Once-only processing guard backed by SETNX-with-TTL keys.
#[derive(Debug, Clone)]
pub struct IdempotenceGuard<S> {
    substrate: Arc<S>,
    prefix: String,
    ttl: Duration,
}

impl<S: Substrate> IdempotenceGuard<S> {
    /// Creates a guard writing keys under `{prefix}:{group}:{event_id}`.
    pub fn new(substrate: Arc<S>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            substrate,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn key(&self, group: &str, event_id: &EventId) -> String {
        format!("{}:{}:{}", self.prefix, group, event_id)
    }

    /// Atomically marks the event as processed for the group.
    ///
    /// Returns `true` when the event was not seen before and the caller
    /// should proceed.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn mark_if_new(&self, group: &str, event_id: &EventId) -> Result<bool> {
        let stamp = utc_now_secs().timestamp().to_string();
        self.substrate
            .set_nx_ttl(&self.key(group, event_id), &stamp, self.ttl)
            .await
    }

    /// Returns true when the event was already processed by the group.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn is_processed(&self, group: &str, event_id: &EventId) -> Result<bool> {
        self.substrate.exists(&self.key(group, event_id)).await
    }

    /// Marks the event as processed unconditionally.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn mark_processed(&self, group: &str, event_id: &EventId) -> Result<()> {
        let stamp = utc_now_secs().timestamp().to_string();
        self.substrate
            .set_with_ttl(&self.key(group, event_id), &stamp, self.ttl)
            .await
    }
}
