//! Observability metrics for the workflow runtime.
//!
//! Metrics are exposed via the `metrics` crate facade so any recorder
//! (Prometheus, statsd, tests) can be installed by the binary.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `workstream_events_processed_total` | Counter | `group`, `outcome` | Entries processed per consumer group |
//! | `workstream_dlq_events_total` | Counter | `reason` | Entries quarantined to the DLQ |
//! | `workstream_dispatches_total` | Counter | - | Backlog items dispatched |
//! | `workstream_reclaimed_entries_total` | Counter | `group` | Pending entries reclaimed |
//! | `workstream_handler_duration_seconds` | Histogram | `group` | Handler wall-clock time |
//! | `workstream_status_transitions_total` | Counter | `from_status`, `to_status` | Backlog status transitions |

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: entries processed per consumer group and outcome.
    pub const EVENTS_PROCESSED_TOTAL: &str = "workstream_events_processed_total";
    /// Counter: entries quarantined to the DLQ.
    pub const DLQ_EVENTS_TOTAL: &str = "workstream_dlq_events_total";
    /// Counter: backlog items dispatched.
    pub const DISPATCHES_TOTAL: &str = "workstream_dispatches_total";
    /// Counter: pending entries reclaimed from idle consumers.
    pub const RECLAIMED_ENTRIES_TOTAL: &str = "workstream_reclaimed_entries_total";
    /// Histogram: handler wall-clock time in seconds.
    pub const HANDLER_DURATION_SECONDS: &str = "workstream_handler_duration_seconds";
    /// Counter: backlog status transitions.
    pub const STATUS_TRANSITIONS_TOTAL: &str = "workstream_status_transitions_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Consumer group name.
    pub const GROUP: &str = "group";
    /// Processing outcome (processed, duplicate, retry, dlq).
    pub const OUTCOME: &str = "outcome";
    /// DLQ reason token.
    pub const REASON: &str = "reason";
    /// Previous backlog status (for transitions).
    pub const FROM_STATUS: &str = "from_status";
    /// Target backlog status (for transitions).
    pub const TO_STATUS: &str = "to_status";
}

/// High-level interface for recording runtime metrics.
///
/// Cheap to clone and share across consumer loops.
#[derive(Debug, Clone, Default)]
pub struct RuntimeMetrics {
    /// Optional prefix for substrate-side counters (multi-tenant setups).
    _prefix: Option<String>,
}

impl RuntimeMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder carrying a substrate counter prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            _prefix: Some(prefix.into()),
        }
    }

    /// Records a processed entry with its outcome.
    pub fn record_event(&self, group: &str, outcome: &str) {
        counter!(
            names::EVENTS_PROCESSED_TOTAL,
            labels::GROUP => group.to_string(),
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records a DLQ publication.
    pub fn record_dlq(&self, reason: &str) {
        counter!(
            names::DLQ_EVENTS_TOTAL,
            labels::REASON => reason.to_string(),
        )
        .increment(1);
    }

    /// Records a backlog item dispatch.
    pub fn record_dispatch(&self) {
        counter!(names::DISPATCHES_TOTAL).increment(1);
    }

    /// Records reclaimed pending entries.
    pub fn record_reclaim(&self, group: &str, count: usize) {
        let count = u64::try_from(count).unwrap_or(0);
        counter!(
            names::RECLAIMED_ENTRIES_TOTAL,
            labels::GROUP => group.to_string(),
        )
        .increment(count);
    }

    /// Records handler wall-clock time.
    pub fn observe_handler_duration(&self, group: &str, duration: Duration) {
        histogram!(
            names::HANDLER_DURATION_SECONDS,
            labels::GROUP => group.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records a backlog status transition.
    pub fn record_status_transition(&self, from_status: &str, to_status: &str) {
        counter!(
            names::STATUS_TRANSITIONS_TOTAL,
            labels::FROM_STATUS => from_status.to_string(),
            labels::TO_STATUS => to_status.to_string(),
        )
        .increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Calls the callback with the elapsed duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
