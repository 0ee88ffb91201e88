//! Journal error types
//!
//! Error codes:
//! - JOURNAL_APPEND_FAILED
//! - JOURNAL_ROTATE_FAILED
//! - JOURNAL_READ_FAILED
//! - JOURNAL_MALFORMED_ENTRY

use std::fmt;
use std::io;

/// Journal-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalErrorCode {
    /// Writing or syncing an entry failed
    AppendFailed,
    /// Opening a replacement segment failed
    RotateFailed,
    /// A segment could not be opened, listed or removed
    ReadFailed,
    /// A line in a segment could not be decoded
    MalformedEntry,
}

impl JournalErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            JournalErrorCode::AppendFailed => "JOURNAL_APPEND_FAILED",
            JournalErrorCode::RotateFailed => "JOURNAL_ROTATE_FAILED",
            JournalErrorCode::ReadFailed => "JOURNAL_READ_FAILED",
            JournalErrorCode::MalformedEntry => "JOURNAL_MALFORMED_ENTRY",
        }
    }

    /// Whether the failing entry can be skipped while the rest of the
    /// segment is still replayed
    pub fn is_entry_local(&self) -> bool {
        matches!(self, JournalErrorCode::MalformedEntry)
    }
}

impl fmt::Display for JournalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Journal error with code, message and optional context
#[derive(Debug)]
pub struct JournalError {
    code: JournalErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl JournalError {
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: JournalErrorCode::AppendFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Append attempted while no segment is active
    pub fn no_active_segment() -> Self {
        Self {
            code: JournalErrorCode::AppendFailed,
            message: "no active journal segment".into(),
            details: None,
            source: None,
        }
    }

    pub fn rotate_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: JournalErrorCode::RotateFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: JournalErrorCode::ReadFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// A line that does not decode, with its 1-based line number
    pub fn malformed_at_line(line: u64, reason: impl Into<String>) -> Self {
        Self {
            code: JournalErrorCode::MalformedEntry,
            message: reason.into(),
            details: Some(format!("line: {}", line)),
            source: None,
        }
    }

    pub fn code(&self) -> JournalErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn is_entry_local(&self) -> bool {
        self.code.is_entry_local()
    }
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for JournalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for journal operations
pub type JournalResult<T> = Result<T, JournalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(JournalErrorCode::AppendFailed.code(), "JOURNAL_APPEND_FAILED");
        assert_eq!(JournalErrorCode::RotateFailed.code(), "JOURNAL_ROTATE_FAILED");
        assert_eq!(JournalErrorCode::ReadFailed.code(), "JOURNAL_READ_FAILED");
        assert_eq!(JournalErrorCode::MalformedEntry.code(), "JOURNAL_MALFORMED_ENTRY");
    }

    #[test]
    fn test_only_malformed_entries_are_skippable() {
        assert!(JournalError::malformed_at_line(3, "bad column count").is_entry_local());
        assert!(!JournalError::no_active_segment().is_entry_local());
    }

    #[test]
    fn test_display_contains_context() {
        let err = JournalError::malformed_at_line(12, "unknown operation 'NOPE'");
        let display = err.to_string();
        assert!(display.contains("JOURNAL_MALFORMED_ENTRY"));
        assert!(display.contains("unknown operation 'NOPE'"));
        assert!(display.contains("line: 12"));
    }

    #[test]
    fn test_display_includes_io_source() {
        let err = JournalError::append_failed(
            "write failed",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert!(err.to_string().ends_with(": disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
