//! Error taxonomy for garbage collection runs
//!
//! Recoverable errors are contained by the component that hit them and
//! recorded against the entity involved (reference, snapshot, file). Only
//! `CheckpointUnavailable` halts a whole run.

use std::time::Duration;
use thiserror::Error;

/// Result type for lakesweep operations
pub type Result<T> = std::result::Result<T, GcError>;

#[derive(Debug, Error)]
pub enum GcError {
    /// Network or storage hiccup, retried at the call site
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A branch or tag could not be resolved to a head commit
    #[error("failed to resolve reference '{reference}': {reason}")]
    ReferenceResolution { reference: String, reason: String },

    /// The table-format layer already expired part of a snapshot
    #[error("snapshot {snapshot} of content {content} is partially unreadable: {reason}")]
    PartiallyUnreadable {
        content: String,
        snapshot: String,
        reason: String,
    },

    /// Progress can no longer be tracked; fatal to the run
    #[error("checkpoint repository unavailable: {0}")]
    CheckpointUnavailable(String),

    #[error("failed to delete {file}: {reason}")]
    DeleteFailed { file: String, reason: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Another orchestrator owns the run, or the run id already exists
    #[error("run conflict: {0}")]
    RunConflict(String),

    #[error("invalid run state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GcError {
    /// Whether a call site should retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, GcError::TransientIo(_) | GcError::Timeout(_))
    }

    /// Whether this error must stop the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GcError::CheckpointUnavailable(_) | GcError::Cancelled | GcError::RunConflict(_)
        )
    }

    /// Wrap any displayable error as a checkpoint repository failure
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        GcError::CheckpointUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for GcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => GcError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => GcError::Unauthorized(err.to_string()),
            _ => GcError::TransientIo(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GcError::TransientIo("reset".into()).is_retryable());
        assert!(GcError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!GcError::NotFound("x".into()).is_retryable());
        assert!(!GcError::CheckpointUnavailable("db".into()).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GcError::CheckpointUnavailable("db".into()).is_fatal());
        assert!(GcError::Cancelled.is_fatal());
        assert!(!GcError::DeleteFailed { file: "a".into(), reason: "b".into() }.is_fatal());
    }

    #[test]
    fn test_io_error_mapping() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(GcError::from(not_found), GcError::NotFound(_)));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(GcError::from(denied), GcError::Unauthorized(_)));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(GcError::from(reset).is_retryable());
    }
}
