//! Error types for scoutlight

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Key Errors ===
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key '{parent}' is not a parent of '{key}'")]
    KeyRelation { key: String, parent: String },

    #[error("Key does not exist: {0}")]
    KeyDoesNotExist(String),

    // === Discovery Errors ===
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    // === Lifecycle Errors ===
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Already running: {0}")]
    AlreadyRunning(String),

    // === Store Errors ===
    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Lease not found: {0}")]
    LeaseNotFound(i64),

    #[error("Transaction not applied: {0}")]
    TransactionFailed(String),

    // === Properties Errors ===
    #[error("Malformed properties: {0}")]
    MalformedProperties(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::ServiceUnavailable(_) | Error::TransactionFailed(_)
        )
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedProperties(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Store("unreachable".into()).is_retryable());
        assert!(Error::ServiceUnavailable("printer".into()).is_retryable());
        assert!(!Error::InvalidKey("".into()).is_retryable());
        assert!(!Error::Lifecycle("destroyed".into()).is_retryable());
    }

    #[test]
    fn test_key_relation_message() {
        let err = Error::KeyRelation {
            key: "/a/b".into(),
            parent: "/x".into(),
        };
        assert_eq!(err.to_string(), "Key '/x' is not a parent of '/a/b'");
    }
}
