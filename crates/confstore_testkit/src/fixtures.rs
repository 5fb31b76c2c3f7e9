//! Test fixtures and manager helpers.
//!
//! Provides initialized managers bound to a backend, with a `reopen` that
//! simulates a power cycle: deinit, init, attach the same storage, load.

use confstore_core::{
    Config, ConfigBackend, ConfigManager, FileBackend, InMemoryBackend, NamespaceId,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

enum Storage {
    Memory(InMemoryBackend),
    File {
        path: PathBuf,
        _dir: TempDir,
    },
}

impl Storage {
    fn backend(&self) -> Box<dyn ConfigBackend> {
        match self {
            Self::Memory(backend) => Box::new(backend.clone()),
            Self::File { path, .. } => Box::new(FileBackend::new(path)),
        }
    }
}

/// An initialized manager with a backend and automatic cleanup.
pub struct TestManager {
    /// The manager instance.
    pub manager: ConfigManager,
    config: Config,
    storage: Storage,
}

impl TestManager {
    /// Creates a manager over a fresh in-memory backend.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates a manager with `config` over a fresh in-memory backend.
    pub fn memory_with(config: Config) -> Self {
        Self::start(config, Storage::Memory(InMemoryBackend::new()))
    }

    /// Creates a manager over a file backend in a temporary directory.
    pub fn file() -> Self {
        Self::file_with(Config::default())
    }

    /// Creates a manager with `config` over a file backend in a temporary
    /// directory.
    pub fn file_with(config: Config) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("config.img");
        Self::start(config, Storage::File { path, _dir: dir })
    }

    fn start(config: Config, storage: Storage) -> Self {
        let manager = ConfigManager::new();
        manager
            .init(config.clone())
            .expect("Failed to initialize manager");
        manager
            .attach_backend(storage.backend())
            .expect("Failed to attach backend");
        Self {
            manager,
            config,
            storage,
        }
    }

    /// Deinitializes and reinitializes the manager over the same storage,
    /// then loads it. Uncommitted changes are lost.
    pub fn reopen(&self) -> usize {
        self.manager.deinit().expect("Failed to deinitialize manager");
        self.manager
            .init(self.config.clone())
            .expect("Failed to initialize manager");
        self.manager
            .attach_backend(self.storage.backend())
            .expect("Failed to attach backend");
        self.manager.load().expect("Failed to load")
    }

    /// Returns the image file path for file-backed fixtures.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Memory(_) => None,
            Storage::File { path, .. } => Some(path),
        }
    }

    /// Returns a handle sharing the in-memory fixture's records.
    pub fn memory_backend(&self) -> Option<InMemoryBackend> {
        match &self.storage {
            Storage::Memory(backend) => Some(backend.clone()),
            Storage::File { .. } => None,
        }
    }
}

impl std::ops::Deref for TestManager {
    type Target = ConfigManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Runs a test with an initialized in-memory manager.
///
/// # Example
///
/// ```rust,ignore
/// use confstore_testkit::with_manager;
///
/// #[test]
/// fn my_test() {
///     with_manager(|config| {
///         config.set("k", 1i32).unwrap();
///     });
/// }
/// ```
pub fn with_manager<F, R>(f: F) -> R
where
    F: FnOnce(&ConfigManager) -> R,
{
    let fixture = TestManager::memory();
    f(&fixture.manager)
}

/// Installs a test-friendly tracing subscriber once.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed by another test
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Fills `manager` with one entry of every type in the default
    /// namespace and a few entries in `wifi` and `motor`. Returns the ids
    /// of the two extra namespaces.
    pub fn populate(manager: &ConfigManager) -> (NamespaceId, NamespaceId) {
        let wifi = manager.open_namespace("wifi").expect("Failed to open namespace");
        let motor = manager.open_namespace("motor").expect("Failed to open namespace");

        manager.set("app.port", 9000i32).expect("set");
        manager.set("app.id", 7u32).expect("set");
        manager.set("uptime", 1_234_567_890_123i64).expect("set");
        manager.set("gain", 0.75f32).expect("set");
        manager.set("debug", true).expect("set");
        manager.set("name", "sensor-01").expect("set");
        manager.set("calib", vec![1u8, 2, 3, 4]).expect("set");

        manager.set_in(wifi, "ssid", "home").expect("set");
        manager.set_in(wifi, "channel", 11u32).expect("set");
        manager.set_in(motor, "max.rpm", 3000i32).expect("set");
        manager.set_in(motor, "value", 1i32).expect("set");

        (wifi, motor)
    }

    /// Number of entries written by [`populate`].
    pub const POPULATED_ENTRIES: usize = 11;
}

#[cfg(test)]
mod tests {
    use super::*;
    use confstore_core::Scope;

    #[test]
    fn memory_fixture_reopens() {
        let fixture = TestManager::memory();
        fixture.set("k", 5i32).unwrap();
        fixture.commit().unwrap();
        assert_eq!(fixture.reopen(), 1);
        assert_eq!(fixture.get::<i32>("k").unwrap(), 5);
    }

    #[test]
    fn file_fixture_reopens() {
        let fixture = TestManager::file();
        scenarios::populate(&fixture);
        fixture.commit().unwrap();
        assert!(fixture.path().unwrap().exists());
        assert_eq!(fixture.reopen(), scenarios::POPULATED_ENTRIES);
    }

    #[test]
    fn uncommitted_changes_are_lost_on_reopen() {
        let fixture = TestManager::memory();
        fixture.set("k", 5i32).unwrap();
        assert_eq!(fixture.reopen(), 0);
        assert!(!fixture.exists("k").unwrap());
    }

    #[test]
    fn populated_scenario() {
        with_manager(|config| {
            let (wifi, _) = scenarios::populate(config);
            assert_eq!(
                config.count(Scope::All).unwrap(),
                scenarios::POPULATED_ENTRIES
            );
            assert_eq!(config.count(Scope::Namespace(wifi)).unwrap(), 2);
        });
    }

    #[test]
    fn logging_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
