//! Clarification question store.
//!
//! Key layout (prefix configurable):
//!
//! ```text
//! {prefix}:question:{project_id}:{question_id}   question document (JSON)
//! {prefix}:question_index:{project_id}           set of question ids
//! {prefix}:question_open:{project_id}            set of OPEN question ids
//! {prefix}:question_answer:{question_id}         normalized answer (JSON)
//! ```
//!
//! A question is OPEN iff its id is in the per-project open index; closing
//! removes it and is idempotent. Answers live under separate keys so the
//! question document stays immutable apart from its status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use workstream_core::{BacklogItemId, ProjectId, QuestionId};

use crate::envelope::{rfc3339_seconds, utc_now_secs};
use crate::error::Result;
use crate::substrate::Substrate;

/// Kind of answer a question expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerType {
    /// Free-form text.
    Text,
    /// A numeric value.
    Number,
    /// One of a fixed set of options.
    Choice,
}

/// Lifecycle status of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    /// Awaiting a human answer.
    Open,
    /// Answered or otherwise resolved.
    Closed,
}

/// A clarification question blocking a backlog item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Unique question identifier.
    pub id: QuestionId,
    /// The owning project.
    pub project_id: ProjectId,
    /// The backlog item blocked by this question.
    pub backlog_item_id: BacklogItemId,
    /// The question text shown to a human.
    pub question_text: String,
    /// The kind of answer expected.
    pub expected_answer_type: AnswerType,
    /// Current status.
    pub status: QuestionStatus,
    /// Correlation id of the workflow that raised the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// When the question was created.
    #[serde(with = "rfc3339_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Store for clarification questions and their answers.
#[derive(Debug, Clone)]
pub struct QuestionStore<S> {
    substrate: Arc<S>,
    prefix: String,
}

impl<S: Substrate> QuestionStore<S> {
    /// Creates a store under the given key prefix.
    pub fn new(substrate: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            substrate,
            prefix: prefix.into(),
        }
    }

    fn question_key(&self, project_id: &ProjectId, question_id: &QuestionId) -> String {
        format!("{}:question:{}:{}", self.prefix, project_id, question_id)
    }

    fn index_key(&self, project_id: &ProjectId) -> String {
        format!("{}:question_index:{}", self.prefix, project_id)
    }

    fn open_key(&self, project_id: &ProjectId) -> String {
        format!("{}:question_open:{}", self.prefix, project_id)
    }

    fn answer_key(&self, question_id: &QuestionId) -> String {
        format!("{}:question_answer:{}", self.prefix, question_id)
    }

    /// Creates an OPEN question with a fresh id and persists it.
    ///
    /// # Errors
    ///
    /// Fails on serialization or substrate errors.
    pub async fn create(
        &self,
        project_id: &ProjectId,
        backlog_item_id: &BacklogItemId,
        question_text: impl Into<String>,
        expected_answer_type: AnswerType,
        correlation_id: Option<String>,
    ) -> Result<Question> {
        let question = Question {
            id: QuestionId::generate(),
            project_id: project_id.clone(),
            backlog_item_id: backlog_item_id.clone(),
            question_text: question_text.into(),
            expected_answer_type,
            status: QuestionStatus::Open,
            correlation_id,
            created_at: utc_now_secs(),
        };
        self.put_question(&question).await?;
        Ok(question)
    }

    /// Persists a question, maintaining the indices.
    ///
    /// # Errors
    ///
    /// Fails on serialization or substrate errors.
    pub async fn put_question(&self, question: &Question) -> Result<()> {
        let encoded = serde_json::to_string(question)?;
        self.substrate
            .set(&self.question_key(&question.project_id, &question.id), &encoded)
            .await?;
        self.substrate
            .set_add(&self.index_key(&question.project_id), question.id.as_str())
            .await?;
        match question.status {
            QuestionStatus::Open => {
                self.substrate
                    .set_add(&self.open_key(&question.project_id), question.id.as_str())
                    .await?;
            }
            QuestionStatus::Closed => {
                self.substrate
                    .set_remove(&self.open_key(&question.project_id), question.id.as_str())
                    .await?;
            }
        }
        Ok(())
    }

    /// Loads a question, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Propagates substrate and deserialization failures.
    pub async fn get_question(
        &self,
        project_id: &ProjectId,
        question_id: &QuestionId,
    ) -> Result<Option<Question>> {
        let raw = self
            .substrate
            .get(&self.question_key(project_id, question_id))
            .await?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    /// Closes a question and removes it from the open index.
    ///
    /// Idempotent: closing a closed or missing question is a no-op.
    ///
    /// # Errors
    ///
    /// Fails on serialization or substrate errors.
    pub async fn close(&self, project_id: &ProjectId, question_id: &QuestionId) -> Result<()> {
        if let Some(mut question) = self.get_question(project_id, question_id).await? {
            if question.status != QuestionStatus::Closed {
                question.status = QuestionStatus::Closed;
                self.put_question(&question).await?;
                return Ok(());
            }
        }
        // keep the open index consistent even when the document is gone
        self.substrate
            .set_remove(&self.open_key(project_id), question_id.as_str())
            .await?;
        Ok(())
    }

    /// Stores the normalized answer and closes the question.
    ///
    /// # Errors
    ///
    /// Fails on serialization or substrate errors.
    pub async fn set_answer(
        &self,
        project_id: &ProjectId,
        question_id: &QuestionId,
        normalized_answer: &Value,
    ) -> Result<()> {
        let encoded = serde_json::to_string(normalized_answer)?;
        self.substrate
            .set(&self.answer_key(question_id), &encoded)
            .await?;
        self.close(project_id, question_id).await
    }

    /// Loads the answer of a question, or `None` when unanswered.
    ///
    /// # Errors
    ///
    /// Propagates substrate and deserialization failures.
    pub async fn get_answer(&self, question_id: &QuestionId) -> Result<Option<Value>> {
        let raw = self.substrate.get(&self.answer_key(question_id)).await?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    /// Lists the OPEN question ids of a project, sorted.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn list_open(&self, project_id: &ProjectId) -> Result<Vec<QuestionId>> {
        let mut ids = self.substrate.set_members(&self.open_key(project_id)).await?;
        ids.sort();
        ids.into_iter()
            .map(|id| QuestionId::new(id).map_err(crate::error::Error::from))
            .collect()
    }

    /// Lists all question ids of a project, sorted.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn list_all(&self, project_id: &ProjectId) -> Result<Vec<QuestionId>> {
        let mut ids = self.substrate.set_members(&self.index_key(project_id)).await?;
        ids.sort();
        ids.into_iter()
            .map(|id| QuestionId::new(id).map_err(crate::error::Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::memory::InMemorySubstrate;
    use serde_json::json;

    fn store() -> QuestionStore<InMemorySubstrate> {
        QuestionStore::new(Arc::new(InMemorySubstrate::new()), "audit")
    }

    #[tokio::test]
    async fn create_lists_as_open() {
        let store = store();
        let project: ProjectId = "P1".parse().unwrap();
        let item = BacklogItemId::generate();
        let question = store
            .create(&project, &item, "Which KPIs?", AnswerType::Text, None)
            .await
            .unwrap();

        assert_eq!(question.status, QuestionStatus::Open);
        assert_eq!(store.list_open(&project).await.unwrap(), vec![question.id.clone()]);
        assert_eq!(store.list_all(&project).await.unwrap(), vec![question.id]);
    }

    #[tokio::test]
    async fn set_answer_stores_and_closes() {
        let store = store();
        let project: ProjectId = "P1".parse().unwrap();
        let item = BacklogItemId::generate();
        let question = store
            .create(&project, &item, "Which KPIs?", AnswerType::Text, Some("corr".into()))
            .await
            .unwrap();

        store
            .set_answer(&project, &question.id, &json!("SLA and MTTR"))
            .await
            .unwrap();

        let stored = store
            .get_question(&project, &question.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, QuestionStatus::Closed);
        assert!(store.list_open(&project).await.unwrap().is_empty());
        assert_eq!(
            store.get_answer(&question.id).await.unwrap(),
            Some(json!("SLA and MTTR"))
        );
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = store();
        let project: ProjectId = "P1".parse().unwrap();
        let item = BacklogItemId::generate();
        let question = store
            .create(&project, &item, "Scope?", AnswerType::Text, None)
            .await
            .unwrap();

        store.close(&project, &question.id).await.unwrap();
        store.close(&project, &question.id).await.unwrap();

        let stored = store
            .get_question(&project, &question.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, QuestionStatus::Closed);
        assert!(store.list_open(&project).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closing_a_missing_question_is_a_noop() {
        let store = store();
        let project: ProjectId = "P1".parse().unwrap();
        store
            .close(&project, &QuestionId::generate())
            .await
            .unwrap();
    }
}
