//! Error types for the workflow runtime.

use workstream_core::{BacklogItemId, ProjectId, QuestionId};

use crate::state::BacklogStatus;

/// The result type used throughout workstream-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The schema registry could not be loaded.
    #[error("schema load failed: {message}")]
    SchemaLoad {
        /// Description of the load failure.
        message: String,
    },

    /// An instance failed JSON Schema validation.
    #[error("schema validation failed: {message}")]
    Schema {
        /// The first validation error in document order.
        message: String,
        /// The `$id` of the schema that rejected the instance, if declared.
        schema_id: Option<String>,
    },

    /// No payload schema is registered for the event type.
    #[error("no schema for event_type={event_type}")]
    UnknownEventType {
        /// The unrecognized event type.
        event_type: String,
    },

    /// A raw stream entry could not be decoded into an envelope.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// A substrate (KV/stream) operation failed.
    #[error("substrate error: {message}")]
    Substrate {
        /// Description of the substrate failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A backlog item was not found.
    #[error("backlog item not found: {project_id}/{item_id}")]
    ItemNotFound {
        /// The project that was searched.
        project_id: ProjectId,
        /// The item ID that was not found.
        item_id: BacklogItemId,
    },

    /// A clarification question was not found.
    #[error("question not found: {project_id}/{question_id}")]
    QuestionNotFound {
        /// The project that was searched.
        project_id: ProjectId,
        /// The question ID that was not found.
        question_id: QuestionId,
    },

    /// An invalid backlog status transition was attempted.
    #[error("illegal transition: {from} -> {to} ({reason})")]
    IllegalTransition {
        /// The current status.
        from: BacklogStatus,
        /// The attempted target status.
        to: BacklogStatus,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration failure.
        message: String,
    },

    /// An error from workstream-core.
    #[error("core error: {0}")]
    Core(#[from] workstream_core::Error),
}

impl Error {
    /// Creates a new schema-load error.
    #[must_use]
    pub fn schema_load(message: impl Into<String>) -> Self {
        Self::SchemaLoad {
            message: message.into(),
        }
    }

    /// Creates a new decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a new substrate error.
    #[must_use]
    pub fn substrate(message: impl Into<String>) -> Self {
        Self::Substrate {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new substrate error with a source.
    #[must_use]
    pub fn substrate_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Substrate {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn illegal_transition_display() {
        let err = Error::IllegalTransition {
            from: BacklogStatus::Done,
            to: BacklogStatus::Ready,
            reason: "DONE is terminal".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DONE"));
        assert!(msg.contains("READY"));
        assert!(msg.contains("terminal"));
    }

    #[test]
    fn substrate_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::substrate_with_source("failed to read key", source);
        assert!(err.to_string().contains("substrate error"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn serde_json_errors_convert() {
        let parse_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse_error.into();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
