//! Built-in worker agents.
//!
//! The runtime ships three small agents exercising the worker protocol:
//! requirements analysis, per-category time metrics, and report writing.
//! Their arithmetic is deliberately simple; the protocol around them
//! (required inputs, deliverable plus evidence, failure taxonomy) is what
//! the rest of the system depends on.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{AgentError, AgentOutcome, WorkOrder, WorkerAgent};

/// Summarizes the intake request into scope terms.
#[derive(Debug, Clone, Default)]
pub struct RequirementsAgent;

/// Worker target served by [`RequirementsAgent`].
pub const REQUIREMENTS_TARGET: &str = "requirements_analyst";

#[async_trait]
impl WorkerAgent for RequirementsAgent {
    fn target(&self) -> &str {
        REQUIREMENTS_TARGET
    }

    fn required_fields(&self) -> &[&str] {
        &["request_text"]
    }

    async fn execute(&self, order: &WorkOrder) -> Result<AgentOutcome, AgentError> {
        let request_text = order
            .work_context
            .get("request_text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let terms: Vec<&str> = request_text
            .split_whitespace()
            .filter(|word| word.len() > 3)
            .collect();

        Ok(AgentOutcome {
            deliverable: json!({
                "type": "requirements_summary",
                "request_text": request_text,
                "scope_terms": terms,
            }),
            evidence: json!({
                "agent": self.target(),
                "scope_term_count": terms.len(),
            }),
        })
    }
}

/// Computes per-category minute/hour breakdowns from `work_context.rows`.
#[derive(Debug, Clone, Default)]
pub struct TimeMetricsAgent;

/// Worker target served by [`TimeMetricsAgent`].
pub const TIME_METRICS_TARGET: &str = "time_analyst";

fn row_minutes(row: &Value) -> f64 {
    match row.get("estimated_minutes") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl TimeMetricsAgent {
    /// Computes `(total_minutes, total_hours, breakdown)` over the rows.
    fn compute(rows: &[Value]) -> (f64, f64, Vec<Value>) {
        let mut total_minutes = 0.0;
        let mut category_minutes: BTreeMap<String, f64> = BTreeMap::new();
        for row in rows {
            let minutes = row_minutes(row);
            total_minutes += minutes;
            let category = row
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or("uncategorized")
                .to_string();
            *category_minutes.entry(category).or_insert(0.0) += minutes;
        }

        let breakdown = category_minutes
            .into_iter()
            .map(|(category, minutes)| {
                let share = if total_minutes > 0.0 {
                    minutes / total_minutes * 100.0
                } else {
                    0.0
                };
                json!({
                    "category": category,
                    "minutes": round2(minutes),
                    "hours": round2(minutes / 60.0),
                    "share_percent": round2(share),
                })
            })
            .collect();
        (round2(total_minutes), round2(total_minutes / 60.0), breakdown)
    }

    /// Confidence heuristic over the supplied context.
    fn confidence(rows: &[Value], work_context: &Value) -> f64 {
        let mut confidence: f64 = 0.6;
        if work_context.get("hourly_rate").is_some() {
            confidence += 0.1;
        }
        if rows.len() > 5 {
            confidence += 0.05;
        }
        let categories: std::collections::BTreeSet<&str> = rows
            .iter()
            .filter_map(|row| row.get("category").and_then(Value::as_str))
            .collect();
        if categories.len() > 1 {
            confidence += 0.05;
        }
        let missing = rows
            .iter()
            .filter(|row| row_minutes(row) == 0.0)
            .count();
        if missing > 2 {
            confidence -= 0.1;
        }
        round2(confidence.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl WorkerAgent for TimeMetricsAgent {
    fn target(&self) -> &str {
        TIME_METRICS_TARGET
    }

    fn required_fields(&self) -> &[&str] {
        &["rows"]
    }

    fn missing_inputs(&self, work_context: &Value) -> Vec<String> {
        match work_context.get("rows").and_then(Value::as_array) {
            Some(rows) if !rows.is_empty() => Vec::new(),
            _ => vec!["rows".to_string()],
        }
    }

    async fn execute(&self, order: &WorkOrder) -> Result<AgentOutcome, AgentError> {
        let rows = order
            .work_context
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let (total_minutes, total_hours, breakdown) = Self::compute(&rows);
        let confidence = Self::confidence(&rows, &order.work_context);

        Ok(AgentOutcome {
            deliverable: json!({
                "type": "time_analysis",
                "confidence": confidence,
                "content": {
                    "total_minutes": total_minutes,
                    "total_hours": total_hours,
                    "breakdown": breakdown,
                },
            }),
            evidence: json!({
                "agent": self.target(),
                "total_minutes": total_minutes,
                "total_hours": total_hours,
            }),
        })
    }
}

/// Writes the closing summary report.
#[derive(Debug, Clone, Default)]
pub struct ReportAgent;

/// Worker target served by [`ReportAgent`].
pub const REPORT_TARGET: &str = "report_writer";

#[async_trait]
impl WorkerAgent for ReportAgent {
    fn target(&self) -> &str {
        REPORT_TARGET
    }

    fn required_fields(&self) -> &[&str] {
        &["request_text"]
    }

    async fn execute(&self, order: &WorkOrder) -> Result<AgentOutcome, AgentError> {
        let request_text = order
            .work_context
            .get("request_text")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let sections = vec![
            json!({"title": "Scope", "body": request_text}),
            json!({"title": "Findings", "body": "See attached analysis deliverables."}),
            json!({"title": "Next steps", "body": "Review findings with the requesting team."}),
        ];

        Ok(AgentOutcome {
            deliverable: json!({
                "type": "summary_report",
                "headline": format!("Audit report: {request_text}"),
                "sections": sections,
            }),
            evidence: json!({
                "agent": self.target(),
                "sections": 3,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workstream_core::{BacklogItemId, ProjectId};

    fn order(work_context: Value) -> WorkOrder {
        WorkOrder {
            project_id: ProjectId::generate(),
            backlog_item_id: BacklogItemId::generate(),
            work_context,
            correlation_id: "corr-1".to_string(),
        }
    }

    #[tokio::test]
    async fn time_metrics_breaks_down_by_category() {
        let agent = TimeMetricsAgent;
        let outcome = agent
            .execute(&order(json!({
                "rows": [
                    {"category": "email", "estimated_minutes": 90},
                    {"category": "email", "estimated_minutes": 30},
                    {"category": "meetings", "estimated_minutes": 60},
                ]
            })))
            .await
            .unwrap();

        assert_eq!(outcome.evidence["total_minutes"], 180.0);
        assert_eq!(outcome.evidence["total_hours"], 3.0);
        let breakdown = outcome.deliverable["content"]["breakdown"]
            .as_array()
            .unwrap();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0]["category"], "email");
        assert_eq!(breakdown[0]["minutes"], 120.0);
        assert_eq!(breakdown[1]["category"], "meetings");
        assert_eq!(breakdown[1]["share_percent"], 33.33);
    }

    #[tokio::test]
    async fn time_metrics_reads_string_estimates() {
        let agent = TimeMetricsAgent;
        let outcome = agent
            .execute(&order(json!({
                "rows": [{"category": "email", "estimated_minutes": "45"}]
            })))
            .await
            .unwrap();
        assert_eq!(outcome.evidence["total_minutes"], 45.0);
    }

    #[test]
    fn time_metrics_requires_non_empty_rows() {
        let agent = TimeMetricsAgent;
        assert_eq!(agent.missing_inputs(&json!({})), vec!["rows"]);
        assert_eq!(agent.missing_inputs(&json!({"rows": []})), vec!["rows"]);
        assert!(agent
            .missing_inputs(&json!({"rows": [{"estimated_minutes": 5}]}))
            .is_empty());
    }

    #[test]
    fn confidence_grows_with_context() {
        let sparse = TimeMetricsAgent::confidence(&[], &json!({}));
        let rows: Vec<Value> = (0..6)
            .map(|i| json!({"category": format!("c{i}"), "estimated_minutes": 10}))
            .collect();
        let rich = TimeMetricsAgent::confidence(&rows, &json!({"hourly_rate": 80}));
        assert!(rich > sparse);
        assert!(rich <= 1.0);
    }

    #[tokio::test]
    async fn requirements_agent_extracts_scope_terms() {
        let agent = RequirementsAgent;
        let outcome = agent
            .execute(&order(json!({"request_text": "full audit of the support workflow"})))
            .await
            .unwrap();
        assert_eq!(outcome.deliverable["type"], "requirements_summary");
        assert!(outcome.evidence["scope_term_count"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn report_agent_produces_sections() {
        let agent = ReportAgent;
        let outcome = agent
            .execute(&order(json!({"request_text": "quarterly audit"})))
            .await
            .unwrap();
        assert_eq!(outcome.evidence["sections"], 3);
        assert!(outcome.deliverable["headline"]
            .as_str()
            .unwrap()
            .contains("quarterly audit"));
    }
}
