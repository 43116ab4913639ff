//! Backlog generation from an intake request.
//!
//! The planner turns a clear intake into a deterministic template of agent
//! tasks with fresh ids, and an ambiguous intake into a single blocked
//! placeholder item that the clarification loop can later release.

use serde_json::json;

use workstream_core::ProjectId;

use crate::state::BacklogStatus;
use crate::store::backlog::{BacklogItem, ItemType};
use crate::worker::agents::{REPORT_TARGET, REQUIREMENTS_TARGET};

/// Pluggable backlog generation policy.
pub trait BacklogPlanner: Send + Sync {
    /// Generates the backlog for a clear intake: at least one item, all
    /// `READY`, with fresh ids.
    fn plan(&self, project_id: &ProjectId, request_text: &str) -> Vec<BacklogItem>;

    /// Generates the single `BLOCKED` placeholder for an ambiguous intake.
    fn clarification_item(&self, project_id: &ProjectId, request_text: &str) -> BacklogItem;
}

/// Default two-stage template: requirements analysis then report writing.
#[derive(Debug, Clone, Default)]
pub struct DefaultPlanner;

impl DefaultPlanner {
    /// Creates the default planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BacklogPlanner for DefaultPlanner {
    fn plan(&self, project_id: &ProjectId, request_text: &str) -> Vec<BacklogItem> {
        let work_context = json!({ "request_text": request_text });
        vec![
            BacklogItem::new(
                project_id.clone(),
                ItemType::AgentTask,
                Some(REQUIREMENTS_TARGET.to_string()),
                BacklogStatus::Ready,
                work_context.clone(),
            ),
            BacklogItem::new(
                project_id.clone(),
                ItemType::AgentTask,
                Some(REPORT_TARGET.to_string()),
                BacklogStatus::Ready,
                work_context,
            ),
        ]
    }

    fn clarification_item(&self, project_id: &ProjectId, request_text: &str) -> BacklogItem {
        BacklogItem::new(
            project_id.clone(),
            ItemType::AgentTask,
            Some(REQUIREMENTS_TARGET.to_string()),
            BacklogStatus::Blocked,
            json!({ "request_text": request_text }),
        )
    }
}
