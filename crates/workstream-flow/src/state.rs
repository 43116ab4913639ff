//! Backlog status state machine.
//!
//! Statuses and the allowed-transition table. Dispatch moves items
//! `READY -> IN_PROGRESS`; `WORK.ITEM_DISPATCHED` is an event type, not a
//! status. `DONE` and `FAILED` are absorbing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Lifecycle status of a backlog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BacklogStatus {
    /// Created but not yet schedulable.
    Created,
    /// Eligible for dispatch.
    Ready,
    /// Waiting on a clarification answer.
    Blocked,
    /// Dispatched to a worker.
    InProgress,
    /// Completed and accepted by the Definition of Done.
    Done,
    /// Terminally failed.
    Failed,
}

impl BacklogStatus {
    /// Returns the wire representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Ready => "READY",
            Self::Blocked => "BLOCKED",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    /// Returns true when no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for BacklogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the statuses reachable from `from` in one transition.
#[must_use]
pub const fn allowed_targets(from: BacklogStatus) -> &'static [BacklogStatus] {
    match from {
        BacklogStatus::Created => &[
            BacklogStatus::Ready,
            BacklogStatus::Blocked,
            BacklogStatus::Failed,
        ],
        BacklogStatus::Ready => &[
            BacklogStatus::InProgress,
            BacklogStatus::Blocked,
            BacklogStatus::Failed,
        ],
        BacklogStatus::Blocked => &[BacklogStatus::Ready, BacklogStatus::Failed],
        BacklogStatus::InProgress => &[
            BacklogStatus::Done,
            BacklogStatus::Failed,
            BacklogStatus::Blocked,
        ],
        BacklogStatus::Done | BacklogStatus::Failed => &[],
    }
}

/// Returns true when the transition `from -> to` is in the allowed table.
#[must_use]
pub fn is_allowed(from: BacklogStatus, to: BacklogStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Asserts that the transition `from -> to` is allowed.
///
/// # Errors
///
/// Returns [`Error::IllegalTransition`] for any pair outside the table.
pub fn assert_transition(from: BacklogStatus, to: BacklogStatus) -> Result<()> {
    if is_allowed(from, to) {
        return Ok(());
    }
    let reason = if from.is_terminal() {
        format!("{from} is terminal")
    } else {
        format!("{from} does not transition to {to}")
    };
    Err(Error::IllegalTransition { from, to, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_path_is_allowed() {
        assert!(is_allowed(BacklogStatus::Created, BacklogStatus::Ready));
        assert!(is_allowed(BacklogStatus::Ready, BacklogStatus::InProgress));
        assert!(is_allowed(BacklogStatus::InProgress, BacklogStatus::Done));
    }

    #[test]
    fn clarification_path_is_allowed() {
        assert!(is_allowed(BacklogStatus::Created, BacklogStatus::Blocked));
        assert!(is_allowed(BacklogStatus::Ready, BacklogStatus::Blocked));
        assert!(is_allowed(BacklogStatus::Blocked, BacklogStatus::Ready));
        assert!(is_allowed(BacklogStatus::InProgress, BacklogStatus::Blocked));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for target in [
            BacklogStatus::Created,
            BacklogStatus::Ready,
            BacklogStatus::Blocked,
            BacklogStatus::InProgress,
            BacklogStatus::Done,
            BacklogStatus::Failed,
        ] {
            let done = assert_transition(BacklogStatus::Done, target);
            assert!(matches!(done, Err(Error::IllegalTransition { .. })));
            let failed = assert_transition(BacklogStatus::Failed, target);
            assert!(matches!(failed, Err(Error::IllegalTransition { .. })));
        }
    }

    #[test]
    fn ready_does_not_jump_to_done() {
        let result = assert_transition(BacklogStatus::Ready, BacklogStatus::Done);
        assert!(result.is_err());
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&BacklogStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let parsed: BacklogStatus = serde_json::from_str("\"READY\"").unwrap();
        assert_eq!(parsed, BacklogStatus::Ready);
    }
}
