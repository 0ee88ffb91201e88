//! # Index Errors
//!
//! Absent artifacts, AUs and namespaces are not errors: lookups return
//! `None`, empty listings or `false`.

use thiserror::Error;

use crate::journal::JournalError;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Index errors
///
/// `Clone` so that a failed size recomputation can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("Search backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Search backend rejected request (status {status}): {message}")]
    BackendRejected { status: u16, message: String },

    #[error("Journal write failed: {0}")]
    JournalWriteFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid index state: {0}")]
    InvalidState(String),

    #[error("Aggregate store error: {0}")]
    AggregateStore(String),

    #[error("Byte storage error: {0}")]
    ByteStorage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl IndexError {
    /// Shorthand for a rejected request
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        IndexError::BackendRejected {
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IndexError::BackendUnavailable(_)
                | IndexError::JournalWriteFailed(_)
                | IndexError::Io(_)
        )
    }
}

impl From<JournalError> for IndexError {
    fn from(e: JournalError) -> Self {
        IndexError::JournalWriteFailed(e.to_string())
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Io(e.to_string())
    }
}
