//! Mock backend for tests.

use crate::backend::ConfigBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One call observed by a [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `init` was called.
    Init,
    /// `deinit` was called.
    Deinit,
    /// `read` was called with this key.
    Read(String),
    /// `write` was called with this key.
    Write(String),
    /// `erase` was called with this key.
    Erase(String),
    /// `erase_all` was called.
    EraseAll,
    /// `commit` was called.
    Commit,
    /// `keys` was called.
    Keys,
}

#[derive(Debug, Default)]
struct MockState {
    records: BTreeMap<String, Vec<u8>>,
    calls: Vec<BackendCall>,
    writes_before_failure: Option<usize>,
    fail_reads: bool,
    fail_commit: bool,
    fail_init: bool,
}

/// A scriptable backend that records every call.
///
/// Clones share state, so a test keeps one handle to script failures and
/// inspect the call log while the manager owns the other.
///
/// # Example
///
/// ```rust
/// use confstore_storage::{BackendCall, ConfigBackend, MockBackend};
///
/// let mock = MockBackend::new();
/// let mut backend = mock.clone();
/// backend.init().unwrap();
/// mock.fail_writes_after(0);
/// assert!(backend.write("k", b"v").is_err());
/// assert_eq!(mock.calls(), vec![BackendCall::Init, BackendCall::Write("k".into())]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Creates a mock with no records and no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `count` more writes succeed, then fails every later write.
    pub fn fail_writes_after(&self, count: usize) {
        self.state.lock().writes_before_failure = Some(count);
    }

    /// Makes every `read` and `keys` call fail.
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Makes every `commit` call fail.
    pub fn fail_commit(&self, fail: bool) {
        self.state.lock().fail_commit = fail;
    }

    /// Makes every `init` call fail.
    pub fn fail_init(&self, fail: bool) {
        self.state.lock().fail_init = fail;
    }

    /// Removes all scripted failures.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.writes_before_failure = None;
        state.fail_reads = false;
        state.fail_commit = false;
        state.fail_init = false;
    }

    /// Returns the calls observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    /// Forgets the observed calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Returns a copy of every stored record.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.lock().records.clone()
    }
}

impl ConfigBackend for MockBackend {
    fn init(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Init);
        if state.fail_init {
            return Err(StorageError::Injected { operation: "init" });
        }
        Ok(())
    }

    fn deinit(&mut self) -> StorageResult<()> {
        self.state.lock().calls.push(BackendCall::Deinit);
        Ok(())
    }

    fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Read(key.to_string()));
        if state.fail_reads {
            return Err(StorageError::Injected { operation: "read" });
        }
        state
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    fn write(&mut self, key: &str, data: &[u8]) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Write(key.to_string()));
        let budget = state.writes_before_failure;
        match budget {
            Some(0) => return Err(StorageError::Injected { operation: "write" }),
            Some(n) => state.writes_before_failure = Some(n - 1),
            None => {}
        }
        state.records.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn erase(&mut self, key: &str) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Erase(key.to_string()));
        state.records.remove(key);
        Ok(())
    }

    fn erase_all(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::EraseAll);
        state.records.clear();
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Commit);
        if state.fail_commit {
            return Err(StorageError::Injected { operation: "commit" });
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Keys);
        if state.fail_reads {
            return Err(StorageError::Injected { operation: "keys" });
        }
        Ok(state.records.keys().cloned().collect())
    }
}
