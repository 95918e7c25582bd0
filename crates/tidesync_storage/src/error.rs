//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// No operation exists with the given id.
    #[error("operation {0} not found")]
    OperationNotFound(u64),

    /// No collection exists with the given id.
    #[error("collection {0} not found")]
    CollectionNotFound(u64),

    /// The snapshot file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
