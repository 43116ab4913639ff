//! Backlog item store.
//!
//! Key layout (prefix configurable):
//!
//! ```text
//! {prefix}:backlog:{project_id}:{item_id}        item document (JSON)
//! {prefix}:backlog_index:{project_id}            set of item ids
//! {prefix}:backlog_status:{project_id}:{STATUS}  set of item ids per status
//! {prefix}:projects:index                        set of project ids
//! ```
//!
//! Invariant: every item is in the all-items index and exactly one status
//! index, and its project is in the registry while any item exists for it.
//! `put_item` applies the reindex as one logical update. Items are never
//! deleted by the runtime.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use workstream_core::{BacklogItemId, ProjectId};

use crate::envelope::{rfc3339_seconds, utc_now_secs};
use crate::error::{Error, Result};
use crate::state::BacklogStatus;
use crate::substrate::Substrate;

/// Kind of a backlog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    /// A task with no worker routing.
    GenericTask,
    /// A task routed to a worker agent (`agent_target` required).
    AgentTask,
}

impl ItemType {
    /// Returns the wire representation of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GenericTask => "GENERIC_TASK",
            Self::AgentTask => "AGENT_TASK",
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// One unit of dispatchable work owned by a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogItem {
    /// Unique item identifier.
    pub id: BacklogItemId,
    /// The owning project.
    pub project_id: ProjectId,
    /// The item's kind.
    pub item_type: ItemType,
    /// Worker agent the item routes to (required for agent tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_target: Option<String>,
    /// Current lifecycle status.
    pub status: BacklogStatus,
    /// Opaque per-type inputs handed to the worker at dispatch.
    #[serde(default = "empty_object")]
    pub work_context: Value,
    /// Evidence accumulated by completion.
    #[serde(default = "empty_object")]
    pub evidence: Value,
    /// When the item was created.
    #[serde(with = "rfc3339_seconds")]
    pub created_at: DateTime<Utc>,
    /// When the item was last stored.
    #[serde(with = "rfc3339_seconds")]
    pub updated_at: DateTime<Utc>,
}

impl BacklogItem {
    /// Creates an item with a fresh id and current timestamps.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        item_type: ItemType,
        agent_target: Option<String>,
        status: BacklogStatus,
        work_context: Value,
    ) -> Self {
        let now = utc_now_secs();
        Self {
            id: BacklogItemId::generate(),
            project_id,
            item_type,
            agent_target,
            status,
            work_context,
            evidence: empty_object(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Store for backlog items and their indices.
#[derive(Debug, Clone)]
pub struct BacklogStore<S> {
    substrate: Arc<S>,
    prefix: String,
}

impl<S: Substrate> BacklogStore<S> {
    /// Creates a store under the given key prefix.
    pub fn new(substrate: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            substrate,
            prefix: prefix.into(),
        }
    }

    fn item_key(&self, project_id: &ProjectId, item_id: &BacklogItemId) -> String {
        format!("{}:backlog:{}:{}", self.prefix, project_id, item_id)
    }

    fn index_key(&self, project_id: &ProjectId) -> String {
        format!("{}:backlog_index:{}", self.prefix, project_id)
    }

    fn status_key(&self, project_id: &ProjectId, status: BacklogStatus) -> String {
        format!("{}:backlog_status:{}:{}", self.prefix, project_id, status)
    }

    fn projects_key(&self) -> String {
        format!("{}:projects:index", self.prefix)
    }

    /// Upserts an item, maintaining the all-items index, the status indices,
    /// and the project registry.
    ///
    /// # Errors
    ///
    /// Fails on serialization or substrate errors.
    pub async fn put_item(&self, item: &BacklogItem) -> Result<()> {
        let prev_status = self
            .get_item(&item.project_id, &item.id)
            .await?
            .map(|prev| prev.status);

        let encoded = serde_json::to_string(item)?;
        self.substrate
            .set(&self.item_key(&item.project_id, &item.id), &encoded)
            .await?;
        self.substrate
            .set_add(&self.index_key(&item.project_id), item.id.as_str())
            .await?;
        if let Some(prev_status) = prev_status {
            if prev_status != item.status {
                self.substrate
                    .set_remove(
                        &self.status_key(&item.project_id, prev_status),
                        item.id.as_str(),
                    )
                    .await?;
            }
        }
        self.substrate
            .set_add(
                &self.status_key(&item.project_id, item.status),
                item.id.as_str(),
            )
            .await?;
        self.substrate
            .set_add(&self.projects_key(), item.project_id.as_str())
            .await?;
        Ok(())
    }

    /// Changes an item's status, reindexing it.
    ///
    /// Mechanical: legality of the transition is the caller's concern (the
    /// orchestrator asserts against the state machine first).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ItemNotFound`] when the item is absent.
    pub async fn set_status(
        &self,
        project_id: &ProjectId,
        item_id: &BacklogItemId,
        new_status: BacklogStatus,
    ) -> Result<BacklogItem> {
        let Some(mut item) = self.get_item(project_id, item_id).await? else {
            return Err(Error::ItemNotFound {
                project_id: project_id.clone(),
                item_id: item_id.clone(),
            });
        };
        if item.status == new_status {
            return Ok(item);
        }
        item.status = new_status;
        item.updated_at = utc_now_secs();
        self.put_item(&item).await?;
        Ok(item)
    }

    /// Loads an item, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Propagates substrate and deserialization failures.
    pub async fn get_item(
        &self,
        project_id: &ProjectId,
        item_id: &BacklogItemId,
    ) -> Result<Option<BacklogItem>> {
        let raw = self
            .substrate
            .get(&self.item_key(project_id, item_id))
            .await?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    /// Lists all item ids of a project, sorted.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn list_item_ids(&self, project_id: &ProjectId) -> Result<Vec<BacklogItemId>> {
        let mut ids = self.substrate.set_members(&self.index_key(project_id)).await?;
        ids.sort();
        ids.into_iter()
            .map(|id| BacklogItemId::new(id).map_err(Error::from))
            .collect()
    }

    /// Lists the item ids of a project in one status, sorted.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn list_item_ids_by_status(
        &self,
        project_id: &ProjectId,
        status: BacklogStatus,
    ) -> Result<Vec<BacklogItemId>> {
        let mut ids = self
            .substrate
            .set_members(&self.status_key(project_id, status))
            .await?;
        ids.sort();
        ids.into_iter()
            .map(|id| BacklogItemId::new(id).map_err(Error::from))
            .collect()
    }

    /// Lists all registered project ids, sorted.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn list_project_ids(&self) -> Result<Vec<ProjectId>> {
        let mut ids = self.substrate.set_members(&self.projects_key()).await?;
        ids.sort();
        ids.into_iter()
            .map(|id| ProjectId::new(id).map_err(Error::from))
            .collect()
    }
}
