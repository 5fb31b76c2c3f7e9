//! Error types for backend operations.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during backend operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No record is stored under the requested key.
    #[error("record not found: {key}")]
    NotFound {
        /// The requested record key.
        key: String,
    },

    /// The persisted image is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The backend has not been initialized, or was deinitialized.
    #[error("storage is closed")]
    Closed,

    /// A failure scripted by [`crate::MockBackend`].
    #[error("injected failure during {operation}")]
    Injected {
        /// The operation that was made to fail.
        operation: &'static str,
    },
}

impl StorageError {
    /// Creates a not-found error for the given record key.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
