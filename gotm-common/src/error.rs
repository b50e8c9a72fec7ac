//! Common error types for GOTM

use thiserror::Error;

/// Common result type for GOTM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across GOTM crates
#[derive(Error, Debug)]
pub enum Error {
    /// Key-value backend failure (transport, auth, locking).
    ///
    /// Always retryable by the caller; the store itself never retries.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Attribute map could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored item exists but does not decode into the expected record
    #[error("Invalid record {endpoint}/{tag}: {reason}")]
    InvalidRecord {
        endpoint: String,
        tag: String,
        reason: String,
    },

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether a caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_retryable() {
        let err = Error::Store(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_config_errors_are_not_retryable() {
        let err = Error::Config("missing token".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Configuration error: missing token");
    }
}
