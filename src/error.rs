//! # Error Types
//!
//! Crate-wide error handling built on thiserror, with the Transient/Permanent
//! classification the pipeline uses to decide between redelivery and
//! acknowledgement.

use thiserror::Error;

/// Crate-wide error type for pipeline operations
#[derive(Error, Debug)]
pub enum PropcastError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {operation}: {message}")]
    Store { operation: String, message: String },

    #[error("Messaging error: {0}")]
    Messaging(#[from] crate::messaging::MessagingError),

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Scoring error: {0}")]
    Scoring(#[from] crate::scoring::ScoringError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl PropcastError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(message.into())
    }

    /// Classify this error for retry handling.
    ///
    /// Transient errors are surfaced to the queue provider for redelivery
    /// with backoff; permanent errors are acknowledged and logged, never
    /// retried.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Store { .. }
            | Self::Messaging(_)
            | Self::Timeout { .. }
            | Self::UpstreamUnavailable(_) => ErrorClass::Transient,
            Self::Configuration(_)
            | Self::Orchestration(_)
            | Self::Scoring(_)
            | Self::Validation(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<sqlx::Error> for PropcastError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => PropcastError::timeout("database_pool", 30_000),
            sqlx::Error::Configuration(config_err) => {
                PropcastError::configuration(config_err.to_string())
            }
            other => PropcastError::store("database", other.to_string()),
        }
    }
}

/// Retry classification for pipeline errors.
///
/// The queue provider only sees two behaviors: redeliver or don't. Every
/// failure in the system collapses into one of these before it reaches an
/// acknowledgement decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// May succeed on retry; surfaced as 5xx for provider-managed redelivery
    Transient,
    /// Will never succeed on retry; acknowledged immediately
    Permanent,
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PropcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let store_err = PropcastError::store("merge_active", "connection reset");
        assert_eq!(store_err.class(), ErrorClass::Transient);

        let config_err = PropcastError::configuration("unknown mode 'weekly'");
        assert_eq!(config_err.class(), ErrorClass::Permanent);

        let timeout_err = PropcastError::timeout("invoke_next_stage", 10_000);
        assert!(timeout_err.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = PropcastError::store("record_producer", "row lock timeout");
        let display = format!("{err}");
        assert!(display.contains("record_producer"));
        assert!(display.contains("row lock timeout"));
    }
}
