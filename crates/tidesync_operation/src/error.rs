//! Error types for the operation engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tidesync_storage::StorageError;

/// Result type for operation engine calls.
pub type OperationResult<T> = Result<T, OperationError>;

/// Digest code recorded when nobody picked an operation up in time.
pub const PICKUP_TIMEOUT_CODE: &str = "pickup_timeout";

/// Digest code recorded when an actor did not finish in time.
pub const EXECUTION_TIMEOUT_CODE: &str = "execution_timeout";

/// Digest code recorded when an actor misbehaved (panic, bad output).
pub const INTERNAL_ERROR_CODE: &str = "internal_error";

/// Structured description of a failed operation.
///
/// This is the payload stored as the output of a `Failure` row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorDigest {
    /// Machine-readable error code.
    pub code: Option<String>,
    /// Message suitable for showing to a user.
    pub human_message: Option<String>,
}

impl ErrorDigest {
    /// Creates a digest.
    pub fn new(code: Option<String>, human_message: Option<String>) -> Self {
        Self {
            code,
            human_message,
        }
    }

    /// Digest for an operation that was never picked up.
    pub fn pickup_timeout() -> Self {
        Self::new(
            Some(PICKUP_TIMEOUT_CODE.into()),
            Some("operation was not picked up in time".into()),
        )
    }

    /// Digest for an actor that ran past the execution timeout.
    pub fn execution_timeout() -> Self {
        Self::new(
            Some(EXECUTION_TIMEOUT_CODE.into()),
            Some("operation did not complete in time".into()),
        )
    }

    /// Digest for a bug in an actor.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(Some(INTERNAL_ERROR_CODE.into()), Some(detail.into()))
    }
}

impl fmt::Display for ErrorDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.human_message) {
            (Some(code), Some(message)) => write!(f, "{code}: {message}"),
            (Some(code), None) => f.write_str(code),
            (None, Some(message)) => f.write_str(message),
            (None, None) => f.write_str("unknown error"),
        }
    }
}

/// Errors that can occur while enqueuing or awaiting operations.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An input or output could not be serialized.
    #[error("codec error: {0}")]
    Codec(String),

    /// No actor is registered for the operation type.
    #[error("no actor registered for operation type {0}")]
    UnknownOperationType(String),

    /// The definition opted out of deduplication, so the operation cannot be
    /// looked up by input.
    #[error("operation type {0} has no deduplication key")]
    NoDeduplicationKey(String),

    /// The actor reported a failure.
    #[error("operation failed: {0}")]
    Failed(ErrorDigest),

    /// The actor parked the operation until connectivity returns.
    #[error("operation suspended")]
    Suspended,

    /// The operation was not picked up within the pickup timeout.
    #[error("operation was not picked up in time")]
    PickupTimeout,

    /// The operation did not complete within the execution timeout.
    #[error("operation did not complete in time")]
    ExecutionTimeout,

    /// The engine was shut down.
    #[error("operation engine is shut down")]
    Closed,
}

impl OperationError {
    /// Maps a stored failure digest to an error, keeping timeouts distinct.
    pub fn from_digest(digest: ErrorDigest) -> Self {
        match digest.code.as_deref() {
            Some(PICKUP_TIMEOUT_CODE) => Self::PickupTimeout,
            Some(EXECUTION_TIMEOUT_CODE) => Self::ExecutionTimeout,
            _ => Self::Failed(digest),
        }
    }

    /// Returns the failure digest, if the actor produced one.
    pub fn digest(&self) -> Option<&ErrorDigest> {
        match self {
            Self::Failed(digest) => Some(digest),
            _ => None,
        }
    }

    /// Returns true if re-enqueuing the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Suspended | Self::PickupTimeout | Self::ExecutionTimeout => true,
            Self::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_distinct_errors() {
        assert!(matches!(
            OperationError::from_digest(ErrorDigest::pickup_timeout()),
            OperationError::PickupTimeout
        ));
        assert!(matches!(
            OperationError::from_digest(ErrorDigest::execution_timeout()),
            OperationError::ExecutionTimeout
        ));
        let digest = ErrorDigest::new(Some("404".into()), Some("missing".into()));
        let err = OperationError::from_digest(digest.clone());
        assert_eq!(err.digest(), Some(&digest));
    }

    #[test]
    fn retryable_errors() {
        assert!(OperationError::Suspended.is_retryable());
        assert!(OperationError::ExecutionTimeout.is_retryable());
        assert!(!OperationError::Failed(ErrorDigest::internal("boom")).is_retryable());
        assert!(!OperationError::Closed.is_retryable());
    }

    #[test]
    fn digest_display() {
        assert_eq!(
            ErrorDigest::new(Some("E1".into()), Some("bad".into())).to_string(),
            "E1: bad"
        );
        assert_eq!(ErrorDigest::default().to_string(), "unknown error");
    }
}
