//! Generic reliable stream processor.
//!
//! Every service (validator, orchestrator, workers) is a [`StreamConsumer`]
//! bound to `(stream, group, consumer_name, handler)`. Each poll:
//!
//! 1. reads new entries for the group, blocking up to the configured window;
//! 2. when nothing is new, reclaims pending entries idle past the threshold;
//! 3. for each entry: decode -> envelope/payload validation -> idempotence
//!    check -> handler (with a wall-clock timeout) -> ack.
//!
//! Contract violations are quarantined to the DLQ and acked so a poisoned
//! entry never stalls the loop. Transient handler failures leave the entry
//! pending; the reclaim path redelivers it until the per-entry attempt
//! counter reaches `max_attempts`, at which point the entry is quarantined
//! with reason `max_attempts_exhausted` and acked.
//!
//! Delivery is at-least-once: duplicates are absorbed by the idempotence
//! guard, which marks an event processed only after the handler succeeds so
//! that retried deliveries still reach it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use workstream_core::observability::consumer_span;

use crate::dlq::DlqPublisher;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::idempotence::IdempotenceGuard;
use crate::metrics::RuntimeMetrics;
use crate::schema::SchemaRegistry;
use crate::substrate::{RawFields, StreamEntry, Substrate};

/// DLQ reason tokens used by the runtime.
pub mod reasons {
    /// The raw entry had no `event` field or it was not valid JSON.
    pub const ENVELOPE_DECODE: &str = "envelope_decode";
    /// The envelope failed schema validation.
    pub const ENVELOPE_VALIDATION: &str = "envelope_validation";
    /// The payload failed schema validation or the type is unknown.
    pub const PAYLOAD_VALIDATION: &str = "payload_validation";
    /// The entry was retried to exhaustion.
    pub const MAX_ATTEMPTS_EXHAUSTED: &str = "max_attempts_exhausted";
    /// The orchestrator handler raised on a valid event.
    pub const ORCHESTRATOR_HANDLER_ERROR: &str = "orchestrator_handler_error";
}

/// Outcome labels recorded per processed entry.
mod outcomes {
    pub const PROCESSED: &str = "processed";
    pub const DUPLICATE: &str = "duplicate";
    pub const RETRY: &str = "retry";
    pub const DLQ: &str = "dlq";
}

/// Failure of a handler invocation.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Transient failure; the entry stays pending and will be redelivered.
    #[error("retryable handler failure: {message}")]
    Retryable {
        /// Description of the transient failure.
        message: String,
    },
    /// Non-retryable failure; the entry is quarantined and acked.
    #[error("{reason}: {message}")]
    Fatal {
        /// DLQ reason token.
        reason: String,
        /// Description of the failure.
        message: String,
    },
}

impl HandlerError {
    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Creates a fatal failure quarantined under `reason`.
    #[must_use]
    pub fn fatal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Processor of validated, deduplicated envelopes.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one envelope.
    ///
    /// Runs after envelope and payload validation and the idempotence check;
    /// the raw fields are supplied for handlers that need wire context.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Retryable`] leaves the entry pending for redelivery;
    /// [`HandlerError::Fatal`] quarantines it.
    async fn handle(
        &self,
        envelope: &Envelope,
        raw: &RawFields,
    ) -> std::result::Result<(), HandlerError>;
}

/// Configuration of one consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Stream to consume.
    pub stream: String,
    /// Stream receiving quarantined entries.
    pub dlq_stream: String,
    /// Consumer group name.
    pub group: String,
    /// Consumer name within the group.
    pub consumer_name: String,
    /// Max new entries per poll.
    pub read_count: usize,
    /// Max blocking time waiting for new entries.
    pub block: Duration,
    /// Idle threshold for reclaiming pending entries.
    pub idle_reclaim: Duration,
    /// Max pending entries reclaimed per poll.
    pub reclaim_count: usize,
    /// Deliveries after which a failing entry is quarantined.
    pub max_attempts: u32,
    /// Wall-clock budget per handler invocation.
    pub handler_timeout: Duration,
    /// Key prefix for per-entry attempt counters.
    pub attempts_prefix: String,
    /// Key prefix for idempotence markers.
    pub idempotence_prefix: String,
    /// Idempotence marker and attempt counter lifetime.
    pub dedupe_ttl: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        crate::config::Settings::default().consumer_config("audit_consumers", "consumer-1")
    }
}

/// Generic reliable stream processor (one loop instance).
pub struct StreamConsumer<S> {
    substrate: Arc<S>,
    registry: Arc<SchemaRegistry>,
    handler: Arc<dyn EventHandler>,
    dlq: DlqPublisher<S>,
    guard: IdempotenceGuard<S>,
    config: ConsumerConfig,
    metrics: RuntimeMetrics,
}

impl<S: Substrate> StreamConsumer<S> {
    /// Creates a consumer bound to `(stream, group, consumer_name, handler)`.
    pub fn new(
        substrate: Arc<S>,
        registry: Arc<SchemaRegistry>,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
    ) -> Self {
        let dlq = DlqPublisher::new(substrate.clone(), config.dlq_stream.clone());
        let guard = IdempotenceGuard::new(
            substrate.clone(),
            config.idempotence_prefix.clone(),
            config.dedupe_ttl,
        );
        Self {
            substrate,
            registry,
            handler,
            dlq,
            guard,
            config,
            metrics: RuntimeMetrics::new(),
        }
    }

    /// Returns the loop configuration.
    #[must_use]
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Runs the loop until the token is cancelled.
    ///
    /// The cancellation signal is polled between iterations; the in-flight
    /// poll (bounded by the block window plus one handler timeout) is drained
    /// before the loop exits, and unacked entries are left pending for
    /// redelivery.
    ///
    /// # Errors
    ///
    /// Fails when the consumer group cannot be created. Poll errors are
    /// logged and retried.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.substrate
            .ensure_group(&self.config.stream, &self.config.group)
            .await?;
        info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer_name,
            "consumer loop started"
        );
        while !cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, group = %self.config.group, "poll failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        info!(group = %self.config.group, "consumer loop stopped");
        Ok(())
    }

    /// Performs one poll: read new entries (or reclaim pending ones) and
    /// process them in order.
    ///
    /// Returns the number of entries processed. Exposed so tests and
    /// single-shot tools can drive the loop deterministically.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn poll_once(&self) -> Result<usize> {
        let mut entries = self
            .substrate
            .read_group(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer_name,
                self.config.read_count,
                self.config.block,
            )
            .await?;
        if entries.is_empty() {
            entries = self
                .substrate
                .claim_pending(
                    &self.config.stream,
                    &self.config.group,
                    &self.config.consumer_name,
                    self.config.idle_reclaim,
                    self.config.reclaim_count,
                )
                .await?;
            if !entries.is_empty() {
                debug!(
                    group = %self.config.group,
                    count = entries.len(),
                    "reclaimed pending entries"
                );
                self.metrics.record_reclaim(&self.config.group, entries.len());
            }
        }

        let span = consumer_span(
            &self.config.stream,
            &self.config.group,
            &self.config.consumer_name,
        );
        let count = entries.len();
        for entry in &entries {
            self.process_entry(entry).instrument(span.clone()).await?;
        }
        Ok(count)
    }

    async fn process_entry(&self, entry: &StreamEntry) -> Result<()> {
        let attempts = self.record_attempt(entry).await?;

        // Decode.
        let Some(raw_event) = entry.fields.get("event") else {
            return self
                .quarantine(entry, reasons::ENVELOPE_DECODE, "missing field 'event'", None)
                .await;
        };
        let value: serde_json::Value = match serde_json::from_str(raw_event) {
            Ok(value) => value,
            Err(error) => {
                return self
                    .quarantine(
                        entry,
                        reasons::ENVELOPE_DECODE,
                        &format!("invalid json: {error}"),
                        None,
                    )
                    .await;
            }
        };

        // Contract validation.
        if let Err(error) = self.registry.validate_envelope(&value) {
            let (message, schema_id) = split_schema_error(error);
            return self
                .quarantine(
                    entry,
                    reasons::ENVELOPE_VALIDATION,
                    &message,
                    schema_id.as_deref(),
                )
                .await;
        }
        let envelope: Envelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(error) => {
                return self
                    .quarantine(
                        entry,
                        reasons::ENVELOPE_DECODE,
                        &format!("envelope shape: {error}"),
                        None,
                    )
                    .await;
            }
        };
        if let Err(error) = self
            .registry
            .validate_payload(&envelope.event_type, &envelope.payload)
        {
            let (message, schema_id) = split_schema_error(error);
            return self
                .quarantine(
                    entry,
                    reasons::PAYLOAD_VALIDATION,
                    &message,
                    schema_id.as_deref(),
                )
                .await;
        }

        // Idempotence.
        if self
            .guard
            .is_processed(&self.config.group, &envelope.event_id)
            .await?
        {
            debug!(
                event_id = %envelope.event_id,
                group = %self.config.group,
                "skipping duplicate event"
            );
            self.ack(entry).await?;
            self.metrics.record_event(&self.config.group, outcomes::DUPLICATE);
            return Ok(());
        }

        // Handler, bounded by the wall-clock budget.
        let started = std::time::Instant::now();
        let outcome = match tokio::time::timeout(
            self.config.handler_timeout,
            self.handler.handle(&envelope, &entry.fields),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(HandlerError::retryable(format!(
                "handler exceeded {}ms budget",
                self.config.handler_timeout.as_millis()
            ))),
        };
        self.metrics
            .observe_handler_duration(&self.config.group, started.elapsed());

        match outcome {
            Ok(()) => {
                self.guard
                    .mark_processed(&self.config.group, &envelope.event_id)
                    .await?;
                self.ack(entry).await?;
                self.metrics.record_event(&self.config.group, outcomes::PROCESSED);
                Ok(())
            }
            Err(HandlerError::Fatal { reason, message }) => {
                warn!(
                    event_type = %envelope.event_type,
                    event_id = %envelope.event_id,
                    %reason,
                    %message,
                    "handler failed fatally"
                );
                self.quarantine(entry, &reason, &message, None).await
            }
            Err(HandlerError::Retryable { message }) => {
                if attempts >= self.config.max_attempts {
                    warn!(
                        event_id = %envelope.event_id,
                        attempts,
                        "retries exhausted"
                    );
                    self.quarantine(entry, reasons::MAX_ATTEMPTS_EXHAUSTED, &message, None)
                        .await
                } else {
                    debug!(
                        event_id = %envelope.event_id,
                        attempts,
                        %message,
                        "transient handler failure, leaving entry pending"
                    );
                    self.metrics.record_event(&self.config.group, outcomes::RETRY);
                    Ok(())
                }
            }
        }
    }

    /// Counts this delivery in the per-entry attempt hash.
    async fn record_attempt(&self, entry: &StreamEntry) -> Result<u32> {
        let key = format!(
            "{}:{}:{}",
            self.config.attempts_prefix, self.config.group, entry.id
        );
        let attempts = self.substrate.hash_incr(&key, "attempts", 1).await?;
        let stamp = crate::envelope::utc_now_secs().timestamp().to_string();
        if attempts == 1 {
            self.substrate
                .hash_set(&key, "first_seen_at", &stamp)
                .await?;
        }
        self.substrate.hash_set(&key, "last_seen_at", &stamp).await?;
        self.substrate.expire(&key, self.config.dedupe_ttl).await?;
        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    async fn quarantine(
        &self,
        entry: &StreamEntry,
        reason: &str,
        detail: &str,
        schema_id: Option<&str>,
    ) -> Result<()> {
        self.dlq
            .publish_detailed(reason, Some(detail), &entry.fields, schema_id)
            .await?;
        self.ack(entry).await?;
        self.metrics.record_dlq(reason);
        self.metrics.record_event(&self.config.group, outcomes::DLQ);
        Ok(())
    }

    async fn ack(&self, entry: &StreamEntry) -> Result<()> {
        self.substrate
            .ack(&self.config.stream, &self.config.group, &entry.id)
            .await
    }
}

fn split_schema_error(error: Error) -> (String, Option<String>) {
    match error {
        Error::Schema { message, schema_id } => (message, schema_id),
        other => (other.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EventPayload, InitialRequestPayload};
    use crate::substrate::memory::InMemorySubstrate;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(
            &self,
            _envelope: &Envelope,
            _raw: &RawFields,
        ) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry() -> Arc<SchemaRegistry> {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas");
        Arc::new(SchemaRegistry::load(dir).unwrap())
    }

    fn test_config(group: &str) -> ConsumerConfig {
        let settings = crate::config::Settings::default();
        let mut config = settings.consumer_config(group, "c1");
        config.block = Duration::ZERO;
        config.idle_reclaim = Duration::from_millis(20);
        config.max_attempts = 3;
        config
    }

    fn intake_envelope() -> Envelope {
        Envelope::build(
            EventPayload::InitialRequestReceived(InitialRequestPayload {
                project_id: "P1".parse().unwrap(),
                request_text: "full audit".into(),
            }),
            "gateway",
        )
    }

    #[tokio::test]
    async fn valid_events_reach_the_handler_once() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let consumer = StreamConsumer::new(
            substrate.clone(),
            registry(),
            handler.clone(),
            test_config("g"),
        );
        substrate.ensure_group("audit:events", "g").await.unwrap();

        let fields = intake_envelope().encode().unwrap();
        substrate.stream_append("audit:events", &fields).await.unwrap();

        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(substrate
            .pending_entries("audit:events", "g")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn replaying_the_same_event_id_invokes_the_handler_once() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let consumer = StreamConsumer::new(
            substrate.clone(),
            registry(),
            handler.clone(),
            test_config("g"),
        );
        substrate.ensure_group("audit:events", "g").await.unwrap();

        let fields = intake_envelope().encode().unwrap();
        substrate.stream_append("audit:events", &fields).await.unwrap();
        substrate.stream_append("audit:events", &fields).await.unwrap();

        consumer.poll_once().await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        // both copies were acked
        assert!(substrate
            .pending_entries("audit:events", "g")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let mut config = test_config("g");
        config.block = Duration::from_millis(20);
        let consumer = StreamConsumer::new(substrate, registry(), handler, config);

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let task = tokio::spawn(async move { consumer.run(cancel).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(joined.is_ok(), "loop did not stop after cancellation");
    }
}
