//! Error types shared across the workstream crates.

/// The result type used throughout workstream-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by core building blocks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed validation.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the validation failure.
        message: String,
    },
}

impl Error {
    /// Creates a new invalid-identifier error.
    #[must_use]
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_display() {
        let err = Error::invalid_id("empty project id");
        assert!(err.to_string().contains("invalid identifier"));
        assert!(err.to_string().contains("empty project id"));
    }
}
