//! In-memory backend.

use crate::backend::ConfigBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A volatile in-memory backend.
///
/// Records live in a map shared by every clone of the backend, so a test
/// can keep one handle while the manager owns another and observe exactly
/// what was committed. Data lives as long as any clone does; nothing
/// survives the process.
///
/// This backend is suitable for:
/// - Unit and integration tests
/// - RAM-only settings that only need to outlive a manager re-init
///
/// # Example
///
/// ```rust
/// use confstore_storage::{ConfigBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.init().unwrap();
/// backend.write("default/k", b"v").unwrap();
/// assert_eq!(observer.record_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    records: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    open: bool,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with records.
    ///
    /// Useful for testing load paths.
    #[must_use]
    pub fn with_records<I, K>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        let map = records.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            records: Arc::new(RwLock::new(map)),
            open: false,
        }
    }

    /// Returns a copy of every stored record.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.records.read().clone()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Overwrites a stored record directly, bypassing the open check.
    ///
    /// Useful for simulating corruption.
    pub fn poke(&self, key: &str, data: Vec<u8>) {
        self.records.write().insert(key.to_string(), data);
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StorageError::Closed)
        }
    }
}

impl ConfigBackend for InMemoryBackend {
    fn init(&mut self) -> StorageResult<()> {
        self.open = true;
        Ok(())
    }

    fn deinit(&mut self) -> StorageResult<()> {
        self.open = false;
        Ok(())
    }

    fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        self.records
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    fn write(&mut self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        self.records.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn erase(&mut self, key: &str) -> StorageResult<()> {
        self.ensure_open()?;
        self.records.write().remove(key);
        Ok(())
    }

    fn erase_all(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.records.write().clear();
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        // Writes are applied immediately
        self.ensure_open()
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.records.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> InMemoryBackend {
        let mut backend = InMemoryBackend::new();
        backend.init().unwrap();
        backend
    }

    #[test]
    fn memory_new_is_empty() {
        let backend = opened();
        assert_eq!(backend.record_count(), 0);
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn memory_write_then_read() {
        let mut backend = opened();
        backend.write("a", b"hello").unwrap();
        assert_eq!(backend.read("a").unwrap(), b"hello");
    }

    #[test]
    fn memory_write_replaces() {
        let mut backend = opened();
        backend.write("a", b"one").unwrap();
        backend.write("a", b"two").unwrap();
        assert_eq!(backend.read("a").unwrap(), b"two");
        assert_eq!(backend.record_count(), 1);
    }

    #[test]
    fn memory_read_missing_fails() {
        let backend = opened();
        let result = backend.read("missing");
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn memory_erase_missing_is_ok() {
        let mut backend = opened();
        assert!(backend.erase("missing").is_ok());
    }

    #[test]
    fn memory_erase_all() {
        let mut backend = opened();
        backend.write("a", b"1").unwrap();
        backend.write("b", b"2").unwrap();
        backend.erase_all().unwrap();
        assert_eq!(backend.record_count(), 0);
    }

    #[test]
    fn memory_keys_are_sorted() {
        let mut backend = opened();
        backend.write("b", b"2").unwrap();
        backend.write("a", b"1").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn memory_clones_share_records() {
        let mut backend = opened();
        let observer = backend.clone();
        backend.write("shared", b"x").unwrap();
        assert_eq!(observer.snapshot().get("shared").unwrap(), b"x");
    }

    #[test]
    fn memory_data_survives_deinit() {
        let mut backend = opened();
        backend.write("k", b"v").unwrap();
        backend.deinit().unwrap();
        assert!(matches!(backend.read("k"), Err(StorageError::Closed)));

        backend.init().unwrap();
        assert_eq!(backend.read("k").unwrap(), b"v");
    }

    #[test]
    fn memory_requires_init() {
        let mut backend = InMemoryBackend::new();
        assert!(matches!(backend.write("k", b"v"), Err(StorageError::Closed)));
    }

    #[test]
    fn memory_with_records() {
        let mut backend = InMemoryBackend::with_records([("k", b"preloaded".to_vec())]);
        backend.init().unwrap();
        assert_eq!(backend.read("k").unwrap(), b"preloaded");
    }
}
