//! Definition-of-Done evaluation.
//!
//! One pluggable registry decides, on every `WORK.ITEM_COMPLETED`, whether
//! the submitted evidence is accepted (`DONE`), needs clarification
//! (`BLOCKED` plus an open question), or is rejected (`FAILED`). Evaluators
//! are looked up by the item's agent target first, then its item type, then
//! a default rule.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::failure::FailureCategory;
use crate::store::backlog::BacklogItem;

/// Outcome of a DoD evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DodVerdict {
    /// Evidence satisfies the Definition of Done.
    Accepted,
    /// Evidence is insufficient; block the item and ask.
    Blocked {
        /// Why the evidence is insufficient.
        reason: String,
        /// Names of the missing evidence fields.
        missing_fields: Vec<String>,
    },
    /// Evidence is contradictory or invalid; fail the item.
    Failed {
        /// Failure taxonomy category.
        category: FailureCategory,
        /// Why the evidence was rejected.
        reason: String,
    },
}

/// Per-item-type acceptance predicate over completion evidence.
pub trait DodEvaluator: Send + Sync {
    /// Evaluates the evidence submitted for an item.
    fn evaluate(&self, item: &BacklogItem, evidence: &Value) -> DodVerdict;
}

/// Default rule: any non-empty evidence object is accepted.
#[derive(Debug, Clone, Default)]
pub struct EvidencePresentEvaluator;

impl DodEvaluator for EvidencePresentEvaluator {
    fn evaluate(&self, _item: &BacklogItem, evidence: &Value) -> DodVerdict {
        match evidence.as_object() {
            Some(map) if !map.is_empty() => DodVerdict::Accepted,
            _ => DodVerdict::Blocked {
                reason: "completion carried no evidence".to_string(),
                missing_fields: vec!["evidence".to_string()],
            },
        }
    }
}

/// Sanity checks for time-analysis evidence.
///
/// Totals must be present, non-negative, and mutually consistent
/// (`total_hours` is `total_minutes / 60`).
#[derive(Debug, Clone, Default)]
pub struct TimeMetricsDod;

impl DodEvaluator for TimeMetricsDod {
    fn evaluate(&self, _item: &BacklogItem, evidence: &Value) -> DodVerdict {
        let Some(total_minutes) = evidence.get("total_minutes").and_then(Value::as_f64) else {
            return DodVerdict::Blocked {
                reason: "time analysis evidence lacks total_minutes".to_string(),
                missing_fields: vec!["total_minutes".to_string()],
            };
        };
        let Some(total_hours) = evidence.get("total_hours").and_then(Value::as_f64) else {
            return DodVerdict::Blocked {
                reason: "time analysis evidence lacks total_hours".to_string(),
                missing_fields: vec!["total_hours".to_string()],
            };
        };
        if total_minutes < 0.0 || total_hours < 0.0 {
            return DodVerdict::Failed {
                category: FailureCategory::Reasoning,
                reason: format!(
                    "negative totals: total_minutes={total_minutes}, total_hours={total_hours}"
                ),
            };
        }
        if (total_hours - total_minutes / 60.0).abs() > 0.51 {
            return DodVerdict::Failed {
                category: FailureCategory::Reasoning,
                reason: format!(
                    "inconsistent totals: {total_minutes} minutes vs {total_hours} hours"
                ),
            };
        }
        DodVerdict::Accepted
    }
}

/// Registry of DoD evaluators.
pub struct DodRegistry {
    evaluators: HashMap<String, Arc<dyn DodEvaluator>>,
    default: Arc<dyn DodEvaluator>,
}

impl DodRegistry {
    /// Creates an empty registry with the given default evaluator.
    #[must_use]
    pub fn new(default: Arc<dyn DodEvaluator>) -> Self {
        Self {
            evaluators: HashMap::new(),
            default,
        }
    }

    /// Creates the standard registry: evidence-present default plus the
    /// time-analysis sanity checks.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new(Arc::new(EvidencePresentEvaluator));
        registry.register("time_analyst", Arc::new(TimeMetricsDod));
        registry
    }

    /// Registers an evaluator under an agent target or item type name.
    pub fn register(&mut self, key: impl Into<String>, evaluator: Arc<dyn DodEvaluator>) {
        self.evaluators.insert(key.into(), evaluator);
    }

    /// Evaluates an item's completion evidence.
    ///
    /// Lookup order: the item's `agent_target`, then its item type name,
    /// then the default evaluator.
    #[must_use]
    pub fn evaluate(&self, item: &BacklogItem, evidence: &Value) -> DodVerdict {
        let by_target = item
            .agent_target
            .as_deref()
            .and_then(|target| self.evaluators.get(target));
        let evaluator = by_target
            .or_else(|| self.evaluators.get(item.item_type.as_str()))
            .unwrap_or(&self.default);
        evaluator.evaluate(item, evidence)
    }
}
