//! Error types for the sync engine.

use clinsync_protocol::{InvalidWrite, UnknownEntity};
use serde_json::Value;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur inside the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The state store failed.
    #[error("store error: {0}")]
    Store(#[from] clinsync_store::StoreError),

    /// Persisted state could not be encoded or decoded.
    #[error("state codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The change stream could not be opened.
    #[error("change stream error: {0}")]
    Stream(String),

    /// The coordinator has not been started, or was stopped.
    #[error("engine is not running")]
    NotStarted,
}

/// Failure classes a backend write attempt can report.
///
/// The engine routes each class differently: a conflict goes to the
/// conflict resolver and is not counted against the retry budget; the
/// other classes drive the retry scheduler.
#[derive(Error, Debug, Clone)]
pub enum WriteError {
    /// The write was rejected because the backend's state diverged from
    /// the state the write assumed. Carries the backend's current record.
    #[error("write conflicts with remote state")]
    Conflict {
        /// The backend's current record state.
        remote: Value,
    },

    /// The backend or network is unavailable. Retryable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The attempt exceeded the request timeout. Treated identically to
    /// a transient network failure.
    #[error("write attempt timed out")]
    Timeout,
}

impl WriteError {
    /// Returns true for the conflict class.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WriteError::Conflict { .. })
    }

    /// Returns true if the failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WriteError::Unavailable(_) | WriteError::Timeout)
    }

    /// Classifies a free-text backend error message.
    ///
    /// This is a legacy fallback for backend adapters that cannot report
    /// a structured conflict: a message mentioning "409" or "conflict"
    /// is treated as a conflict with no remote record attached. New
    /// adapters should construct [`WriteError::Conflict`] directly; the
    /// engine core never inspects message text.
    pub fn classify_legacy(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("409") || lower.contains("conflict") {
            WriteError::Conflict { remote: Value::Null }
        } else {
            WriteError::Unavailable(message)
        }
    }
}

/// Errors surfaced synchronously by `submit`.
///
/// Malformed submissions are the only failure class a caller sees
/// directly; everything else is asynchronous and observable via status
/// and notifications.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The write request failed per-action validation.
    #[error(transparent)]
    Invalid(#[from] InvalidWrite),

    /// The named collection is not tracked.
    #[error(transparent)]
    UnknownEntity(#[from] UnknownEntity),

    /// The coordinator has not been started.
    #[error("engine is not running")]
    NotStarted,

    /// The operation could not be durably enqueued.
    #[error(transparent)]
    Engine(#[from] SyncError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conflict_is_not_retryable() {
        let err = WriteError::Conflict {
            remote: json!({"id": "p-1"}),
        };
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(WriteError::Unavailable("connection reset".into()).is_retryable());
        assert!(WriteError::Timeout.is_retryable());
    }

    #[test]
    fn legacy_classifier_spots_conflicts() {
        assert!(WriteError::classify_legacy("HTTP 409 returned").is_conflict());
        assert!(WriteError::classify_legacy("version Conflict on patients").is_conflict());

        let other = WriteError::classify_legacy("connection refused");
        assert!(!other.is_conflict());
        assert!(other.is_retryable());
    }

    #[test]
    fn submit_error_from_invalid_write() {
        let err: SubmitError = InvalidWrite::EmptyKey.into();
        assert!(matches!(err, SubmitError::Invalid(_)));
        assert_eq!(err.to_string(), "record key must not be empty");
    }
}
