//! Error types for the paging engine.

use thiserror::Error;
use tidesync_operation::OperationError;
use tidesync_storage::StorageError;

/// Result type for paging calls.
pub type PagingResult<T> = Result<T, PagingError>;

/// Errors that can occur while setting up or driving a paging session.
#[derive(Debug, Error)]
pub enum PagingError {
    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The operation engine failed.
    #[error("operation error: {0}")]
    Operation(#[from] OperationError),

    /// The configuration is unusable.
    #[error("invalid paging config: {0}")]
    InvalidConfig(String),
}

impl PagingError {
    /// Returns true if retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PagingError::Operation(e) => e.is_retryable(),
            PagingError::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }
}
