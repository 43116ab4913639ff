//! Strongly-typed identifiers for workstream entities.
//!
//! All identifiers in workstream are:
//! - **Strongly typed**: prevents mixing up different ID kinds at compile time
//! - **Opaque**: external producers may supply any non-empty unique token;
//!   locally generated values are ULIDs, which sort by creation time
//! - **Globally unique**: no coordination required for generation
//!
//! # Example
//!
//! ```rust
//! use workstream_core::{BacklogItemId, ProjectId};
//!
//! let project: ProjectId = "P1".parse().unwrap();
//! let item = BacklogItemId::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: ProjectId = item;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for a project.
///
/// Projects own backlog items and clarification questions; the project id
/// appears in the project registry while at least one item exists for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Generates a new unique project ID (ULID, lexicographically sortable).
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Creates a project ID from an externally supplied token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] when the token is empty.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::invalid_id("project id must not be empty"));
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A unique identifier for a backlog item.
///
/// Backlog items are the unit of dispatchable work; their ids key the
/// per-item dispatch lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BacklogItemId(String);

impl BacklogItemId {
    /// Generates a new unique backlog item ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Creates a backlog item ID from an externally supplied token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] when the token is empty.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::invalid_id("backlog item id must not be empty"));
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BacklogItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BacklogItemId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A unique identifier for a clarification question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(String);

impl QuestionId {
    /// Generates a new unique question ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Creates a question ID from an externally supplied token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] when the token is empty.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::invalid_id("question id must not be empty"));
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QuestionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A unique identifier for an event envelope.
///
/// Locally generated event ids are ULIDs; ids received from foreign
/// producers are kept verbatim (any opaque unique token is acceptable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generates a new unique event ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Creates an event ID from an externally supplied token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] when the token is empty.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::invalid_id("event id must not be empty"));
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
