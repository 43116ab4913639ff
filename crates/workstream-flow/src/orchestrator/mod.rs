//! The orchestrator: intake, clarification, dispatch, and DoD gating.
//!
//! Consumes (via the stream runtime, group `orchestrator`):
//!
//! - `PROJECT.INITIAL_REQUEST_RECEIVED` — ambiguity check, backlog
//!   generation, dispatch of READY items
//! - `USER.ANSWER_SUBMITTED` — persist the answer, close the question,
//!   unblock the item, dispatch
//! - `WORK.ITEM_COMPLETED` — Definition-of-Done gate deciding
//!   `DONE` / `BLOCKED` / `FAILED`
//! - `WORK.ITEM_FAILED` — applies the `FAILED` transition (workers never
//!   write backlog status themselves)
//!
//! Dispatch serializes per backlog item through a TTL lease
//! (`dispatch:backlog:{item_id}`); the `READY -> IN_PROGRESS` transition is
//! asserted against the state machine, the dispatch event is emitted, and
//! the new status is persisted before the lease is released. An illegal
//! transition skips that item; the rest still dispatch.
//!
//! Handler failures never stall the loop: a poison event is quarantined
//! with reason `orchestrator_handler_error` and acked.

pub mod ambiguity;
pub mod dod;
pub mod planner;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use workstream_core::{BacklogItemId, EventId, ProjectId};

use crate::config::Settings;
use crate::consumer::{reasons, EventHandler, HandlerError};
use crate::envelope::{
    AnswerSubmittedPayload, ClarificationNeededPayload, Envelope, EventPayload,
    InitialRequestPayload, ItemCompletedPayload, ItemDispatchedPayload, ItemFailedPayload,
    ItemUnblockedPayload, QuestionCreatedPayload,
};
use crate::error::{Error, Result};
use crate::lock::LockService;
use crate::metrics::RuntimeMetrics;
use crate::publish::StreamPublisher;
use crate::state::{assert_transition, BacklogStatus};
use crate::store::backlog::{BacklogItem, BacklogStore};
use crate::store::question::{AnswerType, QuestionStore};
use crate::substrate::{RawFields, Substrate};
use crate::trace::{TraceLogger, TraceRecord};

use ambiguity::{Ambiguity, AmbiguityDetector, RuleBasedDetector};
use dod::{DodRegistry, DodVerdict};
use planner::{BacklogPlanner, DefaultPlanner};

/// Producer tag of orchestrator-emitted events.
const SOURCE: &str = "orchestrator";

/// The central coordination service.
pub struct Orchestrator<S> {
    backlog: BacklogStore<S>,
    questions: QuestionStore<S>,
    locks: LockService<S>,
    publisher: StreamPublisher<S>,
    trace: TraceLogger<S>,
    detector: Arc<dyn AmbiguityDetector>,
    planner: Arc<dyn BacklogPlanner>,
    dod: DodRegistry,
    metrics: RuntimeMetrics,
}

impl<S: Substrate> Orchestrator<S> {
    /// Creates an orchestrator with the standard detector, planner, and DoD
    /// registry.
    pub fn new(substrate: Arc<S>, settings: &Settings) -> Self {
        Self {
            backlog: BacklogStore::new(substrate.clone(), settings.key_prefix.clone()),
            questions: QuestionStore::new(substrate.clone(), settings.key_prefix.clone()),
            locks: LockService::new(
                substrate.clone(),
                format!("{}:lock", settings.key_prefix),
                settings.lock_ttl(),
            ),
            publisher: StreamPublisher::new(substrate.clone(), settings.stream_name.clone()),
            trace: TraceLogger::new(substrate, settings.trace_prefix.clone()),
            detector: Arc::new(RuleBasedDetector::standard()),
            planner: Arc::new(DefaultPlanner::new()),
            dod: DodRegistry::standard(),
            metrics: RuntimeMetrics::with_prefix(settings.metrics_prefix.clone()),
        }
    }

    /// Replaces the ambiguity detector.
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn AmbiguityDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Replaces the backlog planner.
    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn BacklogPlanner>) -> Self {
        self.planner = planner;
        self
    }

    /// Replaces the Definition-of-Done registry.
    #[must_use]
    pub fn with_dod(mut self, dod: DodRegistry) -> Self {
        self.dod = dod;
        self
    }

    /// Returns the backlog store.
    #[must_use]
    pub fn backlog(&self) -> &BacklogStore<S> {
        &self.backlog
    }

    /// Returns the question store.
    #[must_use]
    pub fn questions(&self) -> &QuestionStore<S> {
        &self.questions
    }

    async fn emit(
        &self,
        payload: EventPayload,
        correlation_id: &str,
        causation_id: Option<&EventId>,
    ) -> Result<Envelope> {
        let mut envelope = Envelope::build(payload, SOURCE).with_correlation_id(correlation_id);
        if let Some(causation_id) = causation_id {
            envelope = envelope.with_causation_id(causation_id.clone());
        }
        self.publisher.publish(&envelope).await?;
        Ok(envelope)
    }

    async fn open_clarification(
        &self,
        item: &BacklogItem,
        ambiguity: &Ambiguity,
        correlation_id: &str,
        causation_id: &EventId,
    ) -> Result<()> {
        let question = self
            .questions
            .create(
                &item.project_id,
                &item.id,
                &ambiguity.question_text,
                AnswerType::Text,
                Some(correlation_id.to_string()),
            )
            .await?;
        self.emit(
            EventPayload::QuestionCreated(QuestionCreatedPayload {
                project_id: item.project_id.clone(),
                question_id: question.id.clone(),
                backlog_item_id: item.id.clone(),
                question_text: ambiguity.question_text.clone(),
                expected_answer_type: AnswerType::Text,
            }),
            correlation_id,
            Some(causation_id),
        )
        .await?;
        self.emit(
            EventPayload::ClarificationNeeded(ClarificationNeededPayload {
                project_id: item.project_id.clone(),
                backlog_item_id: item.id.clone(),
                missing_fields: ambiguity.missing_fields.clone(),
                reason: Some(ambiguity.question_text.clone()),
            }),
            correlation_id,
            Some(causation_id),
        )
        .await?;
        info!(
            project_id = %item.project_id,
            backlog_item_id = %item.id,
            question_id = %question.id,
            "clarification requested"
        );
        Ok(())
    }

    async fn on_intake(&self, envelope: &Envelope, payload: InitialRequestPayload) -> Result<()> {
        let correlation_id = envelope.correlation_id.clone();
        let causation_id = envelope.event_id.clone();

        if let Some(ambiguity) = self.detector.evaluate(&payload.request_text) {
            let item = self
                .planner
                .clarification_item(&payload.project_id, &payload.request_text);
            self.backlog.put_item(&item).await?;
            self.open_clarification(&item, &ambiguity, &correlation_id, &causation_id)
                .await?;
            self.trace
                .record(
                    &correlation_id,
                    &TraceRecord::new(
                        SOURCE,
                        envelope.event_type.clone(),
                        "intake_ambiguous",
                        json!({
                            "project_id": payload.project_id.as_str(),
                            "missing_fields": ambiguity.missing_fields,
                        }),
                    ),
                )
                .await?;
            return Ok(());
        }

        let items = self
            .planner
            .plan(&payload.project_id, &payload.request_text);
        for item in &items {
            self.backlog.put_item(item).await?;
        }
        self.trace
            .record(
                &correlation_id,
                &TraceRecord::new(
                    SOURCE,
                    envelope.event_type.clone(),
                    "backlog_generated",
                    json!({
                        "project_id": payload.project_id.as_str(),
                        "items": items.len(),
                    }),
                ),
            )
            .await?;

        self.dispatch_ready(
            Some(&payload.project_id),
            &correlation_id,
            Some(&causation_id),
        )
        .await?;
        Ok(())
    }

    async fn on_answer(&self, envelope: &Envelope, payload: AnswerSubmittedPayload) -> Result<()> {
        let correlation_id = envelope.correlation_id.clone();
        let causation_id = envelope.event_id.clone();

        let Some(question) = self
            .questions
            .get_question(&payload.project_id, &payload.question_id)
            .await?
        else {
            warn!(
                project_id = %payload.project_id,
                question_id = %payload.question_id,
                "answer for unknown question ignored"
            );
            return Ok(());
        };

        self.questions
            .set_answer(&payload.project_id, &payload.question_id, &payload.answer)
            .await?;

        let item_id = question.backlog_item_id.clone();
        if let Some(item) = self.backlog.get_item(&payload.project_id, &item_id).await? {
            if item.status == BacklogStatus::Blocked {
                assert_transition(BacklogStatus::Blocked, BacklogStatus::Ready)?;
                self.backlog
                    .set_status(&payload.project_id, &item_id, BacklogStatus::Ready)
                    .await?;
                self.metrics.record_status_transition(
                    BacklogStatus::Blocked.as_str(),
                    BacklogStatus::Ready.as_str(),
                );
                self.emit(
                    EventPayload::ItemUnblocked(ItemUnblockedPayload {
                        project_id: payload.project_id.clone(),
                        backlog_item_id: item_id.clone(),
                    }),
                    &correlation_id,
                    Some(&causation_id),
                )
                .await?;
                info!(
                    project_id = %payload.project_id,
                    backlog_item_id = %item_id,
                    question_id = %payload.question_id,
                    "backlog item unblocked"
                );
            }
        }

        self.dispatch_ready(
            Some(&payload.project_id),
            &correlation_id,
            Some(&causation_id),
        )
        .await?;
        Ok(())
    }

    async fn on_completed(
        &self,
        envelope: &Envelope,
        payload: ItemCompletedPayload,
    ) -> Result<()> {
        let correlation_id = envelope.correlation_id.clone();
        let causation_id = envelope.event_id.clone();

        let Some(mut item) = self
            .backlog
            .get_item(&payload.project_id, &payload.backlog_item_id)
            .await?
        else {
            warn!(
                project_id = %payload.project_id,
                backlog_item_id = %payload.backlog_item_id,
                "completion for unknown item ignored"
            );
            return Ok(());
        };

        let verdict = self.dod.evaluate(&item, &payload.evidence);
        match verdict {
            DodVerdict::Accepted => {
                if let Err(error) = assert_transition(item.status, BacklogStatus::Done) {
                    warn!(%error, backlog_item_id = %item.id, "skipping DONE transition");
                    return Ok(());
                }
                merge_evidence(&mut item.evidence, &payload.evidence);
                item.status = BacklogStatus::Done;
                self.backlog.put_item(&item).await?;
                self.metrics.record_status_transition(
                    BacklogStatus::InProgress.as_str(),
                    BacklogStatus::Done.as_str(),
                );
                self.trace
                    .record(
                        &correlation_id,
                        &TraceRecord::new(
                            SOURCE,
                            envelope.event_type.clone(),
                            "definition_of_done_passed",
                            json!({ "backlog_item_id": item.id.as_str() }),
                        ),
                    )
                    .await?;
                info!(
                    project_id = %payload.project_id,
                    backlog_item_id = %item.id,
                    "backlog item done"
                );
            }
            DodVerdict::Blocked {
                reason,
                missing_fields,
            } => {
                if let Err(error) = assert_transition(item.status, BacklogStatus::Blocked) {
                    warn!(%error, backlog_item_id = %item.id, "skipping BLOCKED transition");
                    return Ok(());
                }
                self.backlog
                    .set_status(&payload.project_id, &item.id, BacklogStatus::Blocked)
                    .await?;
                self.metrics.record_status_transition(
                    BacklogStatus::InProgress.as_str(),
                    BacklogStatus::Blocked.as_str(),
                );
                let ambiguity = Ambiguity {
                    missing_fields,
                    question_text: reason.clone(),
                };
                self.open_clarification(&item, &ambiguity, &correlation_id, &causation_id)
                    .await?;
                self.trace
                    .record(
                        &correlation_id,
                        &TraceRecord::new(
                            SOURCE,
                            envelope.event_type.clone(),
                            "definition_of_done_blocked",
                            json!({ "backlog_item_id": item.id.as_str(), "reason": &reason }),
                        ),
                    )
                    .await?;
            }
            DodVerdict::Failed { category, reason } => {
                if let Err(error) = assert_transition(item.status, BacklogStatus::Failed) {
                    warn!(%error, backlog_item_id = %item.id, "skipping FAILED transition");
                    return Ok(());
                }
                self.backlog
                    .set_status(&payload.project_id, &item.id, BacklogStatus::Failed)
                    .await?;
                self.metrics.record_status_transition(
                    BacklogStatus::InProgress.as_str(),
                    BacklogStatus::Failed.as_str(),
                );
                self.emit(
                    EventPayload::ItemFailed(ItemFailedPayload {
                        project_id: payload.project_id.clone(),
                        backlog_item_id: item.id.clone(),
                        reason: reason.clone(),
                        category,
                    }),
                    &correlation_id,
                    Some(&causation_id),
                )
                .await?;
                self.trace
                    .record(
                        &correlation_id,
                        &TraceRecord::new(
                            SOURCE,
                            envelope.event_type.clone(),
                            "definition_of_done_failed",
                            json!({ "backlog_item_id": item.id.as_str(), "reason": &reason }),
                        ),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn on_failed(&self, _envelope: &Envelope, payload: ItemFailedPayload) -> Result<()> {
        let Some(item) = self
            .backlog
            .get_item(&payload.project_id, &payload.backlog_item_id)
            .await?
        else {
            return Ok(());
        };
        if item.status == BacklogStatus::Failed {
            return Ok(());
        }
        if let Err(error) = assert_transition(item.status, BacklogStatus::Failed) {
            warn!(%error, backlog_item_id = %item.id, "skipping FAILED transition");
            return Ok(());
        }
        self.backlog
            .set_status(&payload.project_id, &payload.backlog_item_id, BacklogStatus::Failed)
            .await?;
        self.metrics
            .record_status_transition(item.status.as_str(), BacklogStatus::Failed.as_str());
        warn!(
            project_id = %payload.project_id,
            backlog_item_id = %payload.backlog_item_id,
            category = %payload.category,
            reason = %payload.reason,
            "backlog item failed"
        );
        Ok(())
    }

    /// Dispatches every READY item of the given project (or of all projects
    /// when `project_id` is `None`), serializing per item through the
    /// dispatch lease.
    ///
    /// Returns the number of items dispatched.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures encountered while listing; per-item
    /// failures are logged and skipped.
    pub async fn dispatch_ready(
        &self,
        project_id: Option<&ProjectId>,
        correlation_id: &str,
        causation_id: Option<&EventId>,
    ) -> Result<usize> {
        let projects = match project_id {
            Some(project) => vec![project.clone()],
            None => self.backlog.list_project_ids().await?,
        };

        let mut dispatched = 0;
        for project in &projects {
            let ready = self
                .backlog
                .list_item_ids_by_status(project, BacklogStatus::Ready)
                .await?;
            for item_id in ready {
                let lock_name = format!("dispatch:backlog:{item_id}");
                let Some(lease) = self.locks.acquire(&lock_name).await? else {
                    debug!(backlog_item_id = %item_id, "dispatch lease held elsewhere, skipping");
                    continue;
                };
                let result = self
                    .dispatch_item(project, &item_id, correlation_id, causation_id)
                    .await;
                if let Err(error) = self.locks.release(&lease).await {
                    warn!(%error, backlog_item_id = %item_id, "lease release failed");
                }
                match result {
                    Ok(true) => dispatched += 1,
                    Ok(false) => {}
                    Err(error) => {
                        warn!(%error, backlog_item_id = %item_id, "dispatch failed, skipping item");
                    }
                }
            }
        }
        if dispatched > 0 {
            debug!(dispatched, "dispatched ready items");
        }
        Ok(dispatched)
    }

    /// Dispatches one item while its lease is held. Returns `false` when the
    /// item vanished or is no longer READY.
    async fn dispatch_item(
        &self,
        project_id: &ProjectId,
        item_id: &BacklogItemId,
        correlation_id: &str,
        causation_id: Option<&EventId>,
    ) -> Result<bool> {
        let Some(item) = self.backlog.get_item(project_id, item_id).await? else {
            return Ok(false);
        };
        if let Err(error) = assert_transition(item.status, BacklogStatus::InProgress) {
            debug!(%error, backlog_item_id = %item_id, "item not dispatchable");
            return Ok(false);
        }

        self.emit(
            EventPayload::ItemDispatched(ItemDispatchedPayload {
                project_id: project_id.clone(),
                backlog_item_id: item.id.clone(),
                item_type: item.item_type,
                agent_target: item.agent_target.clone(),
                work_context: match &item.work_context {
                    Value::Null => None,
                    other => Some(other.clone()),
                },
            }),
            correlation_id,
            causation_id,
        )
        .await?;

        // Persist the new status before the lease goes away.
        self.backlog
            .set_status(project_id, &item.id, BacklogStatus::InProgress)
            .await?;
        self.metrics.record_dispatch();
        self.metrics.record_status_transition(
            BacklogStatus::Ready.as_str(),
            BacklogStatus::InProgress.as_str(),
        );
        info!(
            project_id = %project_id,
            backlog_item_id = %item.id,
            agent_target = item.agent_target.as_deref().unwrap_or("-"),
            "dispatched backlog item"
        );
        Ok(true)
    }
}

fn merge_evidence(current: &mut Value, incoming: &Value) {
    match (current.as_object_mut(), incoming.as_object()) {
        (Some(current), Some(incoming)) => {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
        }
        _ => *current = incoming.clone(),
    }
}

#[async_trait]
impl<S: Substrate> EventHandler for Orchestrator<S> {
    async fn handle(
        &self,
        envelope: &Envelope,
        _raw: &RawFields,
    ) -> std::result::Result<(), HandlerError> {
        let Ok(payload) = envelope.typed_payload() else {
            // Unknown-but-schema-valid types are not ours to handle.
            return Ok(());
        };
        let result: Result<()> = match payload {
            EventPayload::InitialRequestReceived(payload) => {
                self.on_intake(envelope, payload).await
            }
            EventPayload::AnswerSubmitted(payload) => self.on_answer(envelope, payload).await,
            EventPayload::ItemCompleted(payload) => self.on_completed(envelope, payload).await,
            EventPayload::ItemFailed(payload) => self.on_failed(envelope, payload).await,
            _ => Ok(()),
        };
        result.map_err(|error: Error| {
            HandlerError::fatal(reasons::ORCHESTRATOR_HANDLER_ERROR, error.to_string())
        })
    }
}
