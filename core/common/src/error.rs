//! Common error types for indexsync.

use thiserror::Error;

/// Top-level error type for indexsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading from the source system failed.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Writing documents to the target store failed.
    #[error("Write error: {0}")]
    Write(String),

    /// A non-write document store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Waiting on an operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether a whole-operation retry may succeed after this error.
    ///
    /// Extraction failures and invalid input are final for an attempt;
    /// target-side and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Write(_) | Error::Store(_) | Error::Timeout(_) | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Write("boom".into()).is_retryable());
        assert!(Error::Store("down".into()).is_retryable());
        assert!(Error::Timeout("task 3".into()).is_retryable());
        assert!(!Error::Extraction("ORA-12541".into()).is_retryable());
        assert!(!Error::InvalidInput("bad".into()).is_retryable());
    }

    #[test]
    fn test_display_carries_message() {
        let err = Error::Write("index not found".into());
        assert_eq!(err.to_string(), "Write error: index not found");
    }
}
