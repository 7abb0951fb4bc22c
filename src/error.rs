//! Error types for livetune
//!
//! Failures are split the way the control loop reacts to them: retryable
//! conditions are retried on the next scheduling tick, everything else forces
//! the owning pipeline into its `Failed` stage.

use thiserror::Error;

use crate::pipeline::PipelineId;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// livetune error types
#[derive(Error, Debug)]
pub enum Error {
    /// Retryable condition (transient network or population-source error)
    #[error("Temporary failure: {0}\nThe step will be retried on the next scheduling tick")]
    TemporaryFailure(String),

    /// Non-retryable condition
    #[error("Permanent failure: {0}")]
    PermanentFailure(String),

    /// A bounded suspension point ran out of time
    #[error("{operation} exceeded its deadline of {deadline_ms} ms")]
    DeadlineExceeded {
        /// Operation that timed out
        operation: String,
        /// Deadline that elapsed, in milliseconds
        deadline_ms: u64,
    },

    /// Backend name not present in the registry
    #[error("Unknown {kind} backend '{name}'\nRegistered backends: {available}")]
    UnknownBackend {
        /// Backend family ("datastore" or "history datastore")
        kind: &'static str,
        /// Requested name
        name: String,
        /// Comma-separated list of registered names
        available: String,
    },

    /// Configuration is malformed or violates a constraint
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pipeline with this id already exists in the datastore
    #[error("Pipeline {0} already exists in the datastore")]
    PipelineConflict(PipelineId),

    /// Illegal pipeline stage transition (programming error)
    #[error("Invalid pipeline stage transition: {from} -> {to}")]
    InvalidTransition {
        /// Stage being left
        from: String,
        /// Stage requested
        to: String,
    },

    /// Shutdown requested while suspended
    #[error("Operation cancelled by shutdown request")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the iteration loop may retry the step that produced this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TemporaryFailure(_) | Self::DeadlineExceeded { .. })
    }

    /// Convenience constructor for [`Error::TemporaryFailure`].
    pub fn temporary(message: impl Into<String>) -> Self {
        Self::TemporaryFailure(message.into())
    }

    /// Convenience constructor for [`Error::PermanentFailure`].
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::PermanentFailure(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::temporary("census source flapping").is_retryable());
        assert!(Error::DeadlineExceeded {
            operation: "population census".to_string(),
            deadline_ms: 100,
        }
        .is_retryable());

        assert!(!Error::permanent("no such cluster").is_retryable());
        assert!(!Error::InvalidConfig("bad".to_string()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_unknown_backend_lists_available() {
        let error = Error::UnknownBackend {
            kind: "datastore",
            name: "bigtable".to_string(),
            available: "memory".to_string(),
        };
        let message = format!("{error}");
        assert!(message.contains("bigtable"));
        assert!(message.contains("Registered backends: memory"));
    }
}
