//! Backend trait definition.

use crate::error::StorageResult;

/// A persistence medium for configuration records.
///
/// Backends are **opaque record stores**. Each record is a byte payload
/// stored under a string key chosen by the configuration manager. The
/// backend does not interpret either.
///
/// # Invariants
///
/// - `read` returns exactly the bytes last written under that key
/// - `erase` of a missing key succeeds
/// - after `commit` returns, every preceding `write`/`erase` is durable
///   to the extent the medium allows
/// - `keys` enumerates every record visible to `read`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - Volatile storage
/// - [`super::FileBackend`] - Persistent storage
/// - [`super::MockBackend`] - Test double
pub trait ConfigBackend: Send {
    /// Prepares the medium for use.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be opened or its persisted
    /// image is unreadable.
    fn init(&mut self) -> StorageResult<()>;

    /// Releases the medium. Staged, uncommitted writes may be lost.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing the medium fails.
    fn deinit(&mut self) -> StorageResult<()>;

    /// Reads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if no record exists, or an
    /// I/O error from the medium.
    fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Stores `data` under `key`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write(&mut self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the record stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the erase fails.
    fn erase(&mut self, key: &str) -> StorageResult<()>;

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the erase fails.
    fn erase_all(&mut self) -> StorageResult<()>;

    /// Makes every preceding write and erase durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be synced.
    fn commit(&mut self) -> StorageResult<()>;

    /// Enumerates the keys of every stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be enumerated.
    fn keys(&self) -> StorageResult<Vec<String>>;
}
