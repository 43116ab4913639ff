//! Failure taxonomy shared by `WORK.ITEM_FAILED` payloads and DLQ reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Envelope or payload schema violation.
    Contract,
    /// Unparseable raw stream entry.
    Decode,
    /// Required inputs absent from `work_context`.
    ///
    /// Normally surfaced as `CLARIFICATION.NEEDED` rather than a failure.
    DataInsufficiency,
    /// Transient failure calling an external collaborator.
    Tool,
    /// Internal contradiction detected by a DoD or sanity check.
    Reasoning,
    /// The state machine rejected a status change.
    IllegalTransition,
    /// A handler exceeded its wall-clock budget.
    Timeout,
    /// Retried to exhaustion.
    MaxAttempts,
}

impl FailureCategory {
    /// Returns the wire representation of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Decode => "decode",
            Self::DataInsufficiency => "data_insufficiency",
            Self::Tool => "tool",
            Self::Reasoning => "reasoning",
            Self::IllegalTransition => "illegal_transition",
            Self::Timeout => "timeout",
            Self::MaxAttempts => "max_attempts",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&FailureCategory::DataInsufficiency).unwrap();
        assert_eq!(json, "\"data_insufficiency\"");
        let parsed: FailureCategory = serde_json::from_str("\"max_attempts\"").unwrap();
        assert_eq!(parsed, FailureCategory::MaxAttempts);
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(FailureCategory::Tool.to_string(), "tool");
        assert_eq!(
            FailureCategory::IllegalTransition.to_string(),
            "illegal_transition"
        );
    }
}
