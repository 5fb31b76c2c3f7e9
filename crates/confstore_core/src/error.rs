//! Error types for the configuration manager.

use crate::types::ValueType;
use confstore_storage::StorageError;
use thiserror::Error;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors returned by configuration operations.
///
/// Every failure is an explicit value; nothing panics on bad input.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An argument was empty, malformed or out of range.
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the offending parameter.
        message: String,
    },

    /// The manager has not been initialized.
    #[error("configuration manager is not initialized")]
    NotInitialized,

    /// The manager is already initialized.
    #[error("configuration manager is already initialized")]
    AlreadyInitialized,

    /// A fixed-capacity table is full.
    #[error("no space left in {table} table (capacity {capacity})")]
    NoSpace {
        /// Which table is full.
        table: &'static str,
        /// The table's capacity.
        capacity: usize,
    },

    /// The requested item does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// The item being created already exists.
    #[error("already exists: {what}")]
    AlreadyExists {
        /// What already exists.
        what: String,
    },

    /// A key exists with a different type than requested.
    #[error("type mismatch for key '{key}': stored {stored}, requested {requested}")]
    TypeMismatch {
        /// The key involved.
        key: String,
        /// Type of the stored entry.
        stored: ValueType,
        /// Type the caller asked for.
        requested: ValueType,
    },

    /// A key or name exceeds the configured maximum length.
    #[error("key too long: {len} bytes, maximum {max}")]
    KeyTooLong {
        /// Actual length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A value exceeds the configured maximum size.
    #[error("value too large: {len} bytes, maximum {max}")]
    ValueTooLarge {
        /// Actual size in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The caller's buffer cannot hold the output.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes provided.
        available: usize,
    },

    /// The entry is read-only.
    #[error("entry '{key}' is read-only")]
    ReadOnly {
        /// The key involved.
        key: String,
    },

    /// Reading from the backend failed.
    #[error("backend read failed: {0}")]
    BackendRead(#[source] StorageError),

    /// Writing to the backend failed.
    #[error("backend write failed: {0}")]
    BackendWrite(#[source] StorageError),

    /// Serialized input is malformed.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// An encrypted value was touched without a configured key.
    #[error("no encryption key configured")]
    NoEncryptionKey,

    /// Encryption or decryption failed.
    #[error("crypto failure: {message}")]
    CryptoFailure {
        /// Description of the failure.
        message: String,
    },

    /// No persistence backend is bound.
    #[error("no backend attached")]
    NoBackend,
}

impl ConfigError {
    /// Creates an invalid parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates a no-space error for the named table.
    pub fn no_space(table: &'static str, capacity: usize) -> Self {
        Self::NoSpace { table, capacity }
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an already-exists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(key: impl Into<String>, stored: ValueType, requested: ValueType) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            stored,
            requested,
        }
    }

    /// Creates a read-only error.
    pub fn read_only(key: impl Into<String>) -> Self {
        Self::ReadOnly { key: key.into() }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a crypto failure error.
    pub fn crypto_failure(message: impl Into<String>) -> Self {
        Self::CryptoFailure {
            message: message.into(),
        }
    }

    /// Returns true for errors that reject one record rather than the whole
    /// import document.
    pub(crate) fn is_record_level(&self) -> bool {
        !matches!(
            self,
            Self::NotInitialized | Self::BackendWrite(_) | Self::BackendRead(_) | Self::NoBackend
        )
    }
}
