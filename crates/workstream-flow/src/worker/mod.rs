//! Worker runtime: turning dispatches into deliverables.
//!
//! Each worker is a stream-consumer loop bound to group `{agent_target}s`,
//! reacting only to `WORK.ITEM_DISPATCHED` events whose payload targets its
//! agent; everything else is acked without action.
//!
//! Per dispatch:
//!
//! 1. inspect `work_context`; missing required inputs produce
//!    `CLARIFICATION.NEEDED` with `missing_fields` (no status change);
//! 2. emit `WORK.ITEM_STARTED` (the orchestrator already moved the item to
//!    `IN_PROGRESS`; workers never write backlog status);
//! 3. run the agent computation;
//! 4. emit `DELIVERABLE.PUBLISHED` then `WORK.ITEM_COMPLETED` with evidence.
//!
//! Agent failures map onto the failure taxonomy: transient errors surface as
//! retryable handler failures (reclaim redelivers the dispatch), terminal
//! errors emit `WORK.ITEM_FAILED` and ack.

pub mod agents;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn, Instrument};

use workstream_core::observability::workflow_span;
use workstream_core::{BacklogItemId, EventId, ProjectId};

use crate::consumer::{EventHandler, HandlerError};
use crate::envelope::{
    ClarificationNeededPayload, DeliverablePublishedPayload, Envelope, EventPayload,
    ItemCompletedPayload, ItemDispatchedPayload, ItemFailedPayload, ItemStartedPayload,
};
use crate::error::Result;
use crate::failure::FailureCategory;
use crate::publish::StreamPublisher;
use crate::substrate::{RawFields, Substrate};

/// Failure of an agent computation.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Transient failure (external tool, timeout); the dispatch is retried.
    #[error("transient agent failure: {message}")]
    Transient {
        /// Description of the transient failure.
        message: String,
    },
    /// Terminal failure reported as `WORK.ITEM_FAILED`.
    #[error("{category}: {reason}")]
    Failed {
        /// Failure taxonomy category.
        category: FailureCategory,
        /// Description of the failure.
        reason: String,
    },
}

impl AgentError {
    /// Creates a transient failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a terminal failure.
    #[must_use]
    pub fn failed(category: FailureCategory, reason: impl Into<String>) -> Self {
        Self::Failed {
            category,
            reason: reason.into(),
        }
    }
}

/// Inputs handed to an agent computation.
#[derive(Debug, Clone)]
pub struct WorkOrder {
    /// The owning project.
    pub project_id: ProjectId,
    /// The backlog item being worked.
    pub backlog_item_id: BacklogItemId,
    /// The dispatch's `work_context` (an empty object when absent).
    pub work_context: Value,
    /// Correlation id of the workflow.
    pub correlation_id: String,
}

/// Result of a successful agent computation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// The deliverable object published to the stream.
    pub deliverable: Value,
    /// The evidence object evaluated by the Definition of Done.
    pub evidence: Value,
}

/// One specialized worker computation.
#[async_trait]
pub trait WorkerAgent: Send + Sync {
    /// The `agent_target` this agent serves.
    fn target(&self) -> &str;

    /// Names of the `work_context` inputs the agent cannot run without.
    fn required_fields(&self) -> &[&str] {
        &[]
    }

    /// Returns the missing-input names for a dispatch, empty when runnable.
    ///
    /// The default checks [`Self::required_fields`] for presence; agents
    /// with richer requirements (non-empty arrays, value shapes) override.
    fn missing_inputs(&self, work_context: &Value) -> Vec<String> {
        self.required_fields()
            .iter()
            .filter(|field| {
                work_context
                    .get(**field)
                    .map_or(true, serde_json::Value::is_null)
            })
            .map(ToString::to_string)
            .collect()
    }

    /// Runs the computation.
    async fn execute(&self, order: &WorkOrder) -> std::result::Result<AgentOutcome, AgentError>;
}

/// Stream handler wrapping one [`WorkerAgent`].
pub struct WorkerRuntime<S> {
    publisher: StreamPublisher<S>,
    agent: Arc<dyn WorkerAgent>,
}

impl<S: Substrate> WorkerRuntime<S> {
    /// Creates a runtime publishing to the given stream.
    pub fn new(substrate: Arc<S>, stream: impl Into<String>, agent: Arc<dyn WorkerAgent>) -> Self {
        Self {
            publisher: StreamPublisher::new(substrate, stream),
            agent,
        }
    }

    /// Returns the conventional consumer group for this agent target.
    #[must_use]
    pub fn consumer_group(&self) -> String {
        format!("{}s", self.agent.target())
    }

    /// Returns the wrapped agent's target.
    #[must_use]
    pub fn target(&self) -> &str {
        self.agent.target()
    }

    async fn emit(
        &self,
        payload: EventPayload,
        correlation_id: &str,
        causation_id: &EventId,
    ) -> Result<Envelope> {
        let envelope = Envelope::build(payload, self.agent.target())
            .with_correlation_id(correlation_id)
            .with_causation_id(causation_id.clone());
        self.publisher.publish(&envelope).await?;
        Ok(envelope)
    }

    async fn on_dispatch(
        &self,
        envelope: &Envelope,
        payload: ItemDispatchedPayload,
    ) -> std::result::Result<(), HandlerError> {
        let correlation_id = envelope.correlation_id.clone();
        let causation_id = envelope.event_id.clone();
        let work_context = payload
            .work_context
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let missing = self.agent.missing_inputs(&work_context);
        if !missing.is_empty() {
            debug!(
                backlog_item_id = %payload.backlog_item_id,
                ?missing,
                "dispatch is missing required inputs"
            );
            self.emit(
                EventPayload::ClarificationNeeded(ClarificationNeededPayload {
                    project_id: payload.project_id.clone(),
                    backlog_item_id: payload.backlog_item_id.clone(),
                    missing_fields: missing,
                    reason: Some("required work_context inputs are absent".to_string()),
                }),
                &correlation_id,
                &causation_id,
            )
            .await
            .map_err(|error| HandlerError::retryable(error.to_string()))?;
            return Ok(());
        }

        self.emit(
            EventPayload::ItemStarted(ItemStartedPayload {
                project_id: payload.project_id.clone(),
                backlog_item_id: payload.backlog_item_id.clone(),
            }),
            &correlation_id,
            &causation_id,
        )
        .await
        .map_err(|error| HandlerError::retryable(error.to_string()))?;

        let order = WorkOrder {
            project_id: payload.project_id.clone(),
            backlog_item_id: payload.backlog_item_id.clone(),
            work_context,
            correlation_id: correlation_id.clone(),
        };

        match self.agent.execute(&order).await {
            Ok(outcome) => {
                self.emit(
                    EventPayload::DeliverablePublished(DeliverablePublishedPayload {
                        project_id: payload.project_id.clone(),
                        backlog_item_id: payload.backlog_item_id.clone(),
                        deliverable: outcome.deliverable,
                    }),
                    &correlation_id,
                    &causation_id,
                )
                .await
                .map_err(|error| HandlerError::retryable(error.to_string()))?;
                self.emit(
                    EventPayload::ItemCompleted(ItemCompletedPayload {
                        project_id: payload.project_id.clone(),
                        backlog_item_id: payload.backlog_item_id.clone(),
                        evidence: outcome.evidence,
                    }),
                    &correlation_id,
                    &causation_id,
                )
                .await
                .map_err(|error| HandlerError::retryable(error.to_string()))?;
                info!(
                    project_id = %payload.project_id,
                    backlog_item_id = %payload.backlog_item_id,
                    agent = self.agent.target(),
                    "work item completed"
                );
                Ok(())
            }
            Err(AgentError::Transient { message }) => {
                debug!(
                    backlog_item_id = %payload.backlog_item_id,
                    %message,
                    "transient agent failure"
                );
                Err(HandlerError::retryable(message))
            }
            Err(AgentError::Failed { category, reason }) => {
                warn!(
                    project_id = %payload.project_id,
                    backlog_item_id = %payload.backlog_item_id,
                    %category,
                    %reason,
                    "agent failed terminally"
                );
                self.emit(
                    EventPayload::ItemFailed(ItemFailedPayload {
                        project_id: payload.project_id.clone(),
                        backlog_item_id: payload.backlog_item_id.clone(),
                        reason,
                        category,
                    }),
                    &correlation_id,
                    &causation_id,
                )
                .await
                .map_err(|error| HandlerError::retryable(error.to_string()))?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<S: Substrate> EventHandler for WorkerRuntime<S> {
    async fn handle(
        &self,
        envelope: &Envelope,
        _raw: &RawFields,
    ) -> std::result::Result<(), HandlerError> {
        let Ok(EventPayload::ItemDispatched(payload)) = envelope.typed_payload() else {
            return Ok(());
        };
        if payload.agent_target.as_deref() != Some(self.agent.target()) {
            return Ok(());
        }
        let span = workflow_span("work_dispatch", payload.project_id.as_str());
        self.on_dispatch(envelope, payload).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::memory::InMemorySubstrate;
    use serde_json::json;

    struct EchoAgent;

    #[async_trait]
    impl WorkerAgent for EchoAgent {
        fn target(&self) -> &str {
            "echo_worker"
        }

        fn required_fields(&self) -> &[&str] {
            &["request_text"]
        }

        async fn execute(
            &self,
            order: &WorkOrder,
        ) -> std::result::Result<AgentOutcome, AgentError> {
            Ok(AgentOutcome {
                deliverable: json!({"echo": order.work_context["request_text"]}),
                evidence: json!({"agent": self.target()}),
            })
        }
    }

    fn dispatch_envelope(agent_target: &str, work_context: Value) -> Envelope {
        Envelope::build(
            EventPayload::ItemDispatched(ItemDispatchedPayload {
                project_id: "P1".parse().unwrap(),
                backlog_item_id: BacklogItemId::generate(),
                item_type: crate::store::backlog::ItemType::AgentTask,
                agent_target: Some(agent_target.to_string()),
                work_context: Some(work_context),
            }),
            "orchestrator",
        )
        .with_correlation_id("corr-1")
    }

    async fn event_types(substrate: &InMemorySubstrate) -> Vec<String> {
        substrate
            .stream_range("audit:events")
            .await
            .unwrap()
            .iter()
            .filter_map(|entry| Envelope::decode(&entry.fields).ok())
            .map(|envelope| envelope.event_type)
            .collect()
    }

    #[tokio::test]
    async fn happy_dispatch_emits_started_deliverable_completed() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let runtime = WorkerRuntime::new(substrate.clone(), "audit:events", Arc::new(EchoAgent));

        let envelope = dispatch_envelope("echo_worker", json!({"request_text": "hello"}));
        runtime.handle(&envelope, &envelope.encode().unwrap()).await.unwrap();

        assert_eq!(
            event_types(&substrate).await,
            vec![
                "WORK.ITEM_STARTED",
                "DELIVERABLE.PUBLISHED",
                "WORK.ITEM_COMPLETED"
            ]
        );
    }

    #[tokio::test]
    async fn missing_inputs_produce_clarification_only() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let runtime = WorkerRuntime::new(substrate.clone(), "audit:events", Arc::new(EchoAgent));

        let envelope = dispatch_envelope("echo_worker", json!({}));
        runtime.handle(&envelope, &envelope.encode().unwrap()).await.unwrap();

        assert_eq!(event_types(&substrate).await, vec!["CLARIFICATION.NEEDED"]);
        let entries = substrate.stream_range("audit:events").await.unwrap();
        let emitted = Envelope::decode(&entries[0].fields).unwrap();
        assert_eq!(emitted.correlation_id, "corr-1");
        match emitted.typed_payload().unwrap() {
            EventPayload::ClarificationNeeded(payload) => {
                assert_eq!(payload.missing_fields, vec!["request_text"]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn foreign_target_is_ignored() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let runtime = WorkerRuntime::new(substrate.clone(), "audit:events", Arc::new(EchoAgent));

        let envelope = dispatch_envelope("someone_else", json!({"request_text": "hello"}));
        runtime.handle(&envelope, &envelope.encode().unwrap()).await.unwrap();

        assert!(event_types(&substrate).await.is_empty());
    }

    #[tokio::test]
    async fn terminal_agent_failure_emits_item_failed() {
        struct FailingAgent;

        #[async_trait]
        impl WorkerAgent for FailingAgent {
            fn target(&self) -> &str {
                "failing_worker"
            }

            async fn execute(
                &self,
                _order: &WorkOrder,
            ) -> std::result::Result<AgentOutcome, AgentError> {
                Err(AgentError::failed(
                    FailureCategory::Reasoning,
                    "contradictory inputs",
                ))
            }
        }

        let substrate = Arc::new(InMemorySubstrate::new());
        let runtime = WorkerRuntime::new(substrate.clone(), "audit:events", Arc::new(FailingAgent));

        let envelope = dispatch_envelope("failing_worker", json!({}));
        runtime.handle(&envelope, &envelope.encode().unwrap()).await.unwrap();

        assert_eq!(
            event_types(&substrate).await,
            vec!["WORK.ITEM_STARTED", "WORK.ITEM_FAILED"]
        );
    }

    #[tokio::test]
    async fn transient_agent_failure_is_retryable() {
        struct FlakyAgent;

        #[async_trait]
        impl WorkerAgent for FlakyAgent {
            fn target(&self) -> &str {
                "flaky_worker"
            }

            async fn execute(
                &self,
                _order: &WorkOrder,
            ) -> std::result::Result<AgentOutcome, AgentError> {
                Err(AgentError::transient("tool unavailable"))
            }
        }

        let substrate = Arc::new(InMemorySubstrate::new());
        let runtime = WorkerRuntime::new(substrate.clone(), "audit:events", Arc::new(FlakyAgent));

        let envelope = dispatch_envelope("flaky_worker", json!({}));
        let result = runtime.handle(&envelope, &envelope.encode().unwrap()).await;
        assert!(matches!(result, Err(HandlerError::Retryable { .. })));
    }

    #[test]
    fn consumer_group_follows_the_target() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let runtime = WorkerRuntime::new(substrate, "audit:events", Arc::new(EchoAgent));
        assert_eq!(runtime.consumer_group(), "echo_workers");
    }
}
