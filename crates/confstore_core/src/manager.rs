//! The configuration manager.

use crate::codec::{self, Record};
use crate::config::Config;
use crate::crypto::{CipherAlgorithm, CryptoManager, EncryptionKey};
use crate::defaults::DefaultRegistry;
use crate::error::{ConfigError, ConfigResult};
use crate::namespace::{NamespaceTable, DEFAULT_NAMESPACE};
use crate::notify::{CallbackError, ChangeEvent, NotificationManager};
use crate::persist::{decode_record, encode_record, record_key, PersistedRecord};
use crate::store::{EntryRef, EntryStore};
use crate::types::{
    CallbackHandle, ConfigType, EntryFlags, EntryInfo, ExportFlags, ExportFormat, ImportFlags,
    ImportReport, NamespaceId, Scope, Value, ValueType,
};
use confstore_storage::{ConfigBackend, StorageError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// An embedded configuration store.
///
/// `ConfigManager` holds typed entries scoped by namespace, falls back to
/// registered defaults on read misses, notifies observers of changes,
/// encrypts selected values at rest, and persists through a pluggable
/// [`ConfigBackend`].
///
/// Every table is allocated to its configured capacity by
/// [`init`](Self::init) and never grows afterwards.
///
/// # Example
///
/// ```rust,ignore
/// use confstore_core::{Config, ConfigManager};
/// use confstore_storage::InMemoryBackend;
///
/// let config = ConfigManager::new();
/// config.init(Config::default())?;
/// config.attach_backend(Box::new(InMemoryBackend::new()))?;
///
/// config.set("app.port", 9000i32)?;
/// let port: i32 = config.get("app.port")?;
/// config.commit()?;
/// ```
///
/// # Concurrency
///
/// One mutex guards the whole state, so every call is atomic with respect
/// to every other and the manager can be shared across threads. Change
/// callbacks run while that mutex is held and must not call back into the
/// same manager.
pub struct ConfigManager {
    state: Mutex<Option<State>>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Fails on the empty key before anything else is checked.
fn require_key(key: &str) -> ConfigResult<()> {
    if key.is_empty() {
        return Err(ConfigError::invalid_parameter("key must not be empty"));
    }
    Ok(())
}

impl ConfigManager {
    /// Creates an uninitialized manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> ConfigResult<R>) -> ConfigResult<R> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(ConfigError::NotInitialized)?;
        f(state)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initializes the manager, allocating every table to capacity.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `config` is out of range
    /// - `AlreadyInitialized` if already initialized
    pub fn init(&self, config: Config) -> ConfigResult<()> {
        config.validate()?;
        let mut guard = self.state.lock();
        if guard.is_some() {
            return Err(ConfigError::AlreadyInitialized);
        }
        info!(
            max_keys = config.max_keys,
            max_namespaces = config.max_namespaces,
            auto_commit = config.auto_commit,
            "configuration manager initialized"
        );
        *guard = Some(State::new(config));
        Ok(())
    }

    /// Releases every table and deinitializes a bound backend.
    ///
    /// Uncommitted changes are lost.
    pub fn deinit(&self) -> ConfigResult<()> {
        let mut guard = self.state.lock();
        let mut state = guard.take().ok_or(ConfigError::NotInitialized)?;
        if let Some(mut backend) = state.backend.take() {
            if let Err(e) = backend.deinit() {
                warn!(error = %e, "backend deinit failed");
            }
        }
        if state.dirty {
            warn!("configuration manager deinitialized with uncommitted changes");
        }
        info!("configuration manager deinitialized");
        Ok(())
    }

    /// Returns true between `init` and `deinit`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Returns the active configuration.
    pub fn config(&self) -> ConfigResult<Config> {
        self.with_state(|state| Ok(state.config.clone()))
    }

    // ========================================================================
    // Typed access
    // ========================================================================

    /// Stores `value` under `key` in the default namespace.
    ///
    /// A new entry is persistent. An existing entry keeps its flags, so an
    /// encrypted entry stays encrypted.
    ///
    /// # Errors
    ///
    /// - `TypeMismatch` if `key` holds a value of another type
    /// - `ReadOnly` if the entry is read-only
    /// - `KeyTooLong`, `ValueTooLarge` or `NoSpace` on limits
    /// - `BackendWrite` if auto-commit fails (the change stays applied)
    pub fn set(&self, key: &str, value: impl Into<Value>) -> ConfigResult<()> {
        self.set_in(NamespaceId::DEFAULT, key, value)
    }

    /// Stores `value` under `key` in namespace `ns`.
    pub fn set_in(&self, ns: NamespaceId, key: &str, value: impl Into<Value>) -> ConfigResult<()> {
        require_key(key)?;
        let value = value.into();
        self.with_state(|state| {
            state.check_target(ns, key)?;
            let flags = state
                .store
                .lookup(ns, key)
                .map_or(EntryFlags::DEFAULT, |entry| entry.flags);
            state.write_value(ns, key, &value, flags)?;
            state.finish_mutation()
        })
    }

    /// Stores `value` with explicit flags.
    ///
    /// `ENCRYPTED` encrypts the value with the current key; only strings and
    /// blobs can be encrypted.
    pub fn set_with_flags(
        &self,
        ns: NamespaceId,
        key: &str,
        value: impl Into<Value>,
        flags: EntryFlags,
    ) -> ConfigResult<()> {
        require_key(key)?;
        let value = value.into();
        self.with_state(|state| {
            state.check_target(ns, key)?;
            state.write_value(ns, key, &value, flags)?;
            state.finish_mutation()
        })
    }

    /// Reads `key` from the default namespace.
    ///
    /// On a miss the registered default for `key` is returned if it has
    /// type `T`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if neither an entry nor a matching default exists
    /// - `TypeMismatch` if the entry has another type
    /// - `NoEncryptionKey` or `CryptoFailure` for encrypted entries
    pub fn get<T: ConfigType>(&self, key: &str) -> ConfigResult<T> {
        self.get_in(NamespaceId::DEFAULT, key)
    }

    /// Reads `key` from namespace `ns`.
    pub fn get_in<T: ConfigType>(&self, ns: NamespaceId, key: &str) -> ConfigResult<T> {
        require_key(key)?;
        self.with_state(|state| {
            state.check_target(ns, key)?;
            let value = state.read_or_default(ns, key, T::VALUE_TYPE)?;
            extract(key, value)
        })
    }

    /// Reads `key` from the default namespace, returning `default` when
    /// neither an entry nor a registered default exists.
    ///
    /// Never creates an entry.
    pub fn get_or<T: ConfigType>(&self, key: &str, default: T) -> ConfigResult<T> {
        self.get_or_in(NamespaceId::DEFAULT, key, default)
    }

    /// Namespaced form of [`get_or`](Self::get_or).
    pub fn get_or_in<T: ConfigType>(&self, ns: NamespaceId, key: &str, default: T) -> ConfigResult<T> {
        require_key(key)?;
        self.with_state(|state| {
            state.check_target(ns, key)?;
            match state.read_or_default(ns, key, T::VALUE_TYPE) {
                Ok(value) => extract(key, value),
                Err(ConfigError::NotFound { .. }) => Ok(default),
                Err(e) => Err(e),
            }
        })
    }

    /// Deletes `key` from the default namespace.
    pub fn delete(&self, key: &str) -> ConfigResult<()> {
        self.delete_in(NamespaceId::DEFAULT, key)
    }

    /// Deletes `key` from namespace `ns`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the entry does not exist
    /// - `ReadOnly` if the entry is read-only
    pub fn delete_in(&self, ns: NamespaceId, key: &str) -> ConfigResult<()> {
        require_key(key)?;
        self.with_state(|state| {
            state.check_target(ns, key)?;
            state.remove_entry(ns, key)?;
            state.finish_mutation()
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns true if `key` exists in the default namespace.
    pub fn exists(&self, key: &str) -> ConfigResult<bool> {
        self.exists_in(NamespaceId::DEFAULT, key)
    }

    /// Returns true if `key` exists in namespace `ns`. Defaults do not
    /// count.
    pub fn exists_in(&self, ns: NamespaceId, key: &str) -> ConfigResult<bool> {
        require_key(key)?;
        self.with_state(|state| {
            state.check_target(ns, key)?;
            Ok(state.store.lookup(ns, key).is_some())
        })
    }

    /// Returns the type of `key` in the default namespace.
    pub fn type_of(&self, key: &str) -> ConfigResult<ValueType> {
        self.type_of_in(NamespaceId::DEFAULT, key)
    }

    /// Returns the type of `key` in namespace `ns`.
    pub fn type_of_in(&self, ns: NamespaceId, key: &str) -> ConfigResult<ValueType> {
        self.entry_info(ns, key).map(|info| info.value_type)
    }

    /// Returns true if `key` in the default namespace is stored encrypted.
    pub fn is_encrypted(&self, key: &str) -> ConfigResult<bool> {
        self.is_encrypted_in(NamespaceId::DEFAULT, key)
    }

    /// Returns true if `key` in namespace `ns` is stored encrypted.
    pub fn is_encrypted_in(&self, ns: NamespaceId, key: &str) -> ConfigResult<bool> {
        self.entry_info(ns, key)
            .map(|info| info.flags.contains(EntryFlags::ENCRYPTED))
    }

    /// Returns the descriptor of one entry.
    pub fn entry_info(&self, ns: NamespaceId, key: &str) -> ConfigResult<EntryInfo> {
        require_key(key)?;
        self.with_state(|state| {
            state.check_target(ns, key)?;
            state
                .store
                .lookup(ns, key)
                .map(|entry| entry.info())
                .ok_or_else(|| ConfigError::not_found(key))
        })
    }

    /// Counts entries in `scope`.
    pub fn count(&self, scope: Scope) -> ConfigResult<usize> {
        self.with_state(|state| {
            state.check_scope(scope)?;
            Ok(state.store.count(scope))
        })
    }

    /// Calls `f` with the descriptor of every entry in `scope`, in slot
    /// order.
    ///
    /// Runs under the manager lock; `f` must not call back into the
    /// manager.
    pub fn for_each_entry(&self, scope: Scope, mut f: impl FnMut(&EntryInfo)) -> ConfigResult<()> {
        self.with_state(|state| {
            state.check_scope(scope)?;
            for entry in state.store.iter(scope) {
                f(&entry.info());
            }
            Ok(())
        })
    }

    /// Returns the descriptors of every entry in `scope`, in slot order.
    pub fn entries(&self, scope: Scope) -> ConfigResult<Vec<EntryInfo>> {
        let mut entries = Vec::new();
        self.for_each_entry(scope, |info| entries.push(info.clone()))?;
        Ok(entries)
    }

    /// Returns true if there are changes not yet committed.
    pub fn is_dirty(&self) -> ConfigResult<bool> {
        self.with_state(|state| Ok(state.dirty))
    }

    // ========================================================================
    // Namespaces
    // ========================================================================

    /// Opens (or reopens) a namespace by name.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an empty name or one containing `/`
    /// - `KeyTooLong` if the name exceeds `max_key_len`
    /// - `NoSpace` if the namespace table is full
    pub fn open_namespace(&self, name: &str) -> ConfigResult<NamespaceId> {
        self.with_state(|state| {
            let id = state.namespaces.open(name)?;
            debug!(namespace = name, id = id.as_u8(), "namespace opened");
            Ok(id)
        })
    }

    /// Closes a namespace handle. Its entries are kept.
    pub fn close_namespace(&self, ns: NamespaceId) -> ConfigResult<()> {
        self.with_state(|state| {
            state.namespaces.close(ns)?;
            debug!(id = ns.as_u8(), "namespace closed");
            Ok(())
        })
    }

    /// Removes every entry of the named namespace. Returns how many were
    /// removed.
    ///
    /// Read-only entries are removed too. No change callbacks fire.
    pub fn erase_namespace(&self, name: &str) -> ConfigResult<usize> {
        self.with_state(|state| {
            let id = state
                .namespaces
                .lookup(name)
                .ok_or_else(|| ConfigError::not_found(format!("namespace '{name}'")))?;
            let removed = state.store.remove_scope(Scope::Namespace(id));
            state.full_resync = true;
            state.dirty = true;
            info!(namespace = name, removed, "namespace erased");
            state.finish_mutation()?;
            Ok(removed)
        })
    }

    /// Returns the id registered for `name`.
    pub fn namespace_id(&self, name: &str) -> ConfigResult<NamespaceId> {
        self.with_state(|state| {
            state
                .namespaces
                .lookup(name)
                .ok_or_else(|| ConfigError::not_found(format!("namespace '{name}'")))
        })
    }

    /// Returns the name registered for `ns`.
    pub fn namespace_name(&self, ns: NamespaceId) -> ConfigResult<String> {
        self.with_state(|state| state.namespace_name(ns).map(str::to_string))
    }

    /// Lists registered namespaces in id order.
    pub fn namespaces(&self) -> ConfigResult<Vec<(NamespaceId, String)>> {
        self.with_state(|state| {
            Ok(state
                .namespaces
                .iter()
                .map(|(id, name)| (id, name.to_string()))
                .collect())
        })
    }

    // ========================================================================
    // Defaults
    // ========================================================================

    /// Registers (or replaces) the default for `key`.
    pub fn register_default(&self, key: &str, value: impl Into<Value>) -> ConfigResult<()> {
        require_key(key)?;
        let value = value.into();
        self.with_state(|state| state.defaults.register(key, &value))
    }

    /// Removes the default for `key`.
    pub fn unregister_default(&self, key: &str) -> ConfigResult<()> {
        require_key(key)?;
        self.with_state(|state| state.defaults.unregister(key))
    }

    /// Writes the registered default for `key` into the default namespace.
    pub fn reset_to_default(&self, key: &str) -> ConfigResult<()> {
        self.reset_to_default_in(NamespaceId::DEFAULT, key)
    }

    /// Writes the registered default for `key` into namespace `ns` as a
    /// normal set.
    pub fn reset_to_default_in(&self, ns: NamespaceId, key: &str) -> ConfigResult<()> {
        require_key(key)?;
        self.with_state(|state| {
            state.check_target(ns, key)?;
            state.reset_entry(ns, key)?;
            state.finish_mutation()
        })
    }

    /// Resets every key with a registered default in the default namespace.
    ///
    /// Stops at the first failure; earlier resets stay applied. Returns how
    /// many keys were reset.
    pub fn reset_all_to_defaults(&self) -> ConfigResult<usize> {
        self.with_state(|state| {
            let keys: Vec<String> = state.defaults.keys().map(str::to_string).collect();
            for (done, key) in keys.iter().enumerate() {
                if let Err(e) = state.reset_entry(NamespaceId::DEFAULT, key) {
                    if done > 0 {
                        state.finish_mutation()?;
                    }
                    return Err(e);
                }
            }
            state.finish_mutation()?;
            info!(count = keys.len(), "entries reset to defaults");
            Ok(keys.len())
        })
    }

    // ========================================================================
    // Change notification
    // ========================================================================

    /// Registers a callback for changes to `key` in any namespace.
    ///
    /// The callback runs under the manager lock and must not call back
    /// into this manager.
    pub fn register_callback<F>(&self, key: &str, callback: F) -> ConfigResult<CallbackHandle>
    where
        F: Fn(&ChangeEvent<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        require_key(key)?;
        self.with_state(|state| {
            state.store.check_key(key)?;
            state.notify.register(key, callback)
        })
    }

    /// Registers a callback for every change.
    pub fn register_wildcard_callback<F>(&self, callback: F) -> ConfigResult<CallbackHandle>
    where
        F: Fn(&ChangeEvent<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.with_state(|state| state.notify.register_wildcard(callback))
    }

    /// Removes a callback registration.
    pub fn unregister_callback(&self, handle: CallbackHandle) -> ConfigResult<()> {
        self.with_state(|state| state.notify.unregister(handle))
    }

    // ========================================================================
    // Encryption
    // ========================================================================

    /// Installs the value encryption key.
    ///
    /// Replacing a key this way does not re-encrypt existing entries; use
    /// [`rotate_encryption_key`](Self::rotate_encryption_key) for that.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `key` does not match the algorithm's key size.
    pub fn set_encryption_key(&self, key: &[u8], algorithm: CipherAlgorithm) -> ConfigResult<()> {
        let key = EncryptionKey::from_bytes(key, algorithm)?;
        self.with_state(|state| {
            state.crypto = Some(CryptoManager::new(&key));
            info!(?algorithm, "encryption key installed");
            Ok(())
        })
    }

    /// Forgets the encryption key. Encrypted entries become unreadable
    /// until a key is installed again.
    pub fn clear_encryption_key(&self) -> ConfigResult<()> {
        self.with_state(|state| {
            state.crypto = None;
            info!("encryption key cleared");
            Ok(())
        })
    }

    /// Re-encrypts every encrypted entry under a new key and installs it.
    ///
    /// All or nothing: if any entry fails to decrypt with the current key
    /// nothing changes. Returns how many entries were re-encrypted.
    pub fn rotate_encryption_key(
        &self,
        new_key: &[u8],
        algorithm: CipherAlgorithm,
    ) -> ConfigResult<usize> {
        let new_key = EncryptionKey::from_bytes(new_key, algorithm)?;
        self.with_state(|state| {
            let rotated = state.rotate(&new_key)?;
            if rotated > 0 {
                state.finish_mutation()?;
            }
            Ok(rotated)
        })
    }

    /// Stores an encrypted string under `key` in the default namespace.
    pub fn set_encrypted(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.set_encrypted_in(NamespaceId::DEFAULT, key, value)
    }

    /// Stores an encrypted string under `key` in namespace `ns`.
    ///
    /// # Errors
    ///
    /// - `NoEncryptionKey` if no key is installed
    /// - `ValueTooLarge` if the ciphertext exceeds `max_value_size`
    pub fn set_encrypted_in(&self, ns: NamespaceId, key: &str, value: &str) -> ConfigResult<()> {
        self.set_encrypted_value(ns, key, Value::from(value))
    }

    /// Stores an encrypted blob under `key` in the default namespace.
    pub fn set_blob_encrypted(&self, key: &str, value: &[u8]) -> ConfigResult<()> {
        self.set_blob_encrypted_in(NamespaceId::DEFAULT, key, value)
    }

    /// Stores an encrypted blob under `key` in namespace `ns`.
    pub fn set_blob_encrypted_in(&self, ns: NamespaceId, key: &str, value: &[u8]) -> ConfigResult<()> {
        self.set_encrypted_value(ns, key, Value::from(value))
    }

    fn set_encrypted_value(&self, ns: NamespaceId, key: &str, value: Value) -> ConfigResult<()> {
        require_key(key)?;
        self.with_state(|state| {
            state.check_target(ns, key)?;
            let flags = state
                .store
                .lookup(ns, key)
                .map_or(EntryFlags::DEFAULT, |entry| entry.flags)
                | EntryFlags::ENCRYPTED;
            state.write_value(ns, key, &value, flags)?;
            state.finish_mutation()
        })
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Binds a persistence backend and initializes it.
    ///
    /// The next commit rewrites the backend to mirror memory.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if a backend is already bound
    /// - `BackendWrite` if the backend fails to initialize
    pub fn attach_backend(&self, mut backend: Box<dyn ConfigBackend>) -> ConfigResult<()> {
        self.with_state(|state| {
            if state.backend.is_some() {
                return Err(ConfigError::already_exists("backend"));
            }
            backend.init().map_err(ConfigError::BackendWrite)?;
            state.backend = Some(backend);
            state.full_resync = true;
            info!("backend attached");
            Ok(())
        })
    }

    /// Deinitializes and unbinds the backend, handing it back.
    pub fn detach_backend(&self) -> ConfigResult<Box<dyn ConfigBackend>> {
        self.with_state(|state| {
            let mut backend = state.backend.take().ok_or(ConfigError::NoBackend)?;
            if let Err(e) = backend.deinit() {
                state.backend = Some(backend);
                return Err(ConfigError::BackendWrite(e));
            }
            info!("backend detached");
            Ok(backend)
        })
    }

    /// Writes pending changes to the backend.
    ///
    /// # Errors
    ///
    /// - `NoBackend` if no backend is bound
    /// - `BackendWrite` if the backend fails; the store stays dirty
    pub fn commit(&self) -> ConfigResult<()> {
        self.with_state(State::commit)
    }

    /// Replaces the store contents with the backend's records.
    ///
    /// Namespaces are rebuilt from the records; ids handed out earlier may
    /// change. No change callbacks fire. Returns how many entries were
    /// loaded.
    ///
    /// # Errors
    ///
    /// - `NoBackend` if no backend is bound
    /// - `BackendRead` if a record cannot be read or decoded; the store is
    ///   left unchanged
    pub fn load(&self) -> ConfigResult<usize> {
        self.with_state(State::load)
    }

    // ========================================================================
    // Import / export
    // ========================================================================

    /// Returns the size in bytes of the document [`export`](Self::export)
    /// would produce.
    pub fn export_size(
        &self,
        format: ExportFormat,
        scope: Scope,
        flags: ExportFlags,
    ) -> ConfigResult<usize> {
        self.with_state(|state| Ok(state.export_document(format, scope, flags)?.len()))
    }

    /// Serializes `scope` into `buf`. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// - `BufferTooSmall` if `buf` cannot hold the document; nothing is
    ///   written
    /// - `NoEncryptionKey` or `CryptoFailure` with `DECRYPT`
    pub fn export(
        &self,
        format: ExportFormat,
        scope: Scope,
        flags: ExportFlags,
        buf: &mut [u8],
    ) -> ConfigResult<usize> {
        self.with_state(|state| {
            let document = state.export_document(format, scope, flags)?;
            if buf.len() < document.len() {
                return Err(ConfigError::BufferTooSmall {
                    needed: document.len(),
                    available: buf.len(),
                });
            }
            buf[..document.len()].copy_from_slice(&document);
            debug!(?format, bytes = document.len(), "exported");
            Ok(document.len())
        })
    }

    /// Serializes the named namespace into `buf`.
    pub fn export_namespace(
        &self,
        name: &str,
        format: ExportFormat,
        flags: ExportFlags,
        buf: &mut [u8],
    ) -> ConfigResult<usize> {
        let id = self.namespace_id(name)?;
        self.export(format, Scope::Namespace(id), flags, buf)
    }

    /// Applies a document produced by [`export`](Self::export).
    ///
    /// The document is validated before anything changes. Records are then
    /// applied in order as ordinary sets; there is no rollback if a record
    /// fails part way.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the document is malformed
    /// - the first record-level error, unless `SKIP_ERRORS` is given
    pub fn import(
        &self,
        format: ExportFormat,
        bytes: &[u8],
        flags: ImportFlags,
    ) -> ConfigResult<ImportReport> {
        self.with_state(|state| state.import(None, format, bytes, flags))
    }

    /// Applies a document, placing every record in the named namespace
    /// regardless of where it came from. The namespace is opened if needed.
    pub fn import_namespace(
        &self,
        name: &str,
        format: ExportFormat,
        bytes: &[u8],
        flags: ImportFlags,
    ) -> ConfigResult<ImportReport> {
        self.with_state(|state| state.import(Some(name), format, bytes, flags))
    }
}

fn extract<T: ConfigType>(key: &str, value: Value) -> ConfigResult<T> {
    let stored = value.value_type();
    T::from_value(value).ok_or_else(|| ConfigError::type_mismatch(key, stored, T::VALUE_TYPE))
}

/// Everything owned by an initialized manager.
struct State {
    config: Config,
    store: EntryStore,
    namespaces: NamespaceTable,
    defaults: DefaultRegistry,
    notify: NotificationManager,
    backend: Option<Box<dyn ConfigBackend>>,
    crypto: Option<CryptoManager>,
    /// Mutations not yet committed.
    dirty: bool,
    /// Backend record keys of deleted persistent entries.
    pending_erase: Vec<String>,
    /// Next commit rewrites the whole backend.
    full_resync: bool,
}

impl State {
    fn new(config: Config) -> Self {
        Self {
            store: EntryStore::new(config.max_keys, config.max_key_len, config.max_value_size),
            namespaces: NamespaceTable::new(config.max_namespaces, config.max_key_len),
            defaults: DefaultRegistry::new(config.max_keys, config.max_key_len, config.max_value_size),
            notify: NotificationManager::new(config.max_callbacks),
            backend: None,
            crypto: None,
            dirty: false,
            pending_erase: Vec::with_capacity(config.max_keys),
            full_resync: false,
            config,
        }
    }

    /// Key length, then namespace state.
    fn check_target(&self, ns: NamespaceId, key: &str) -> ConfigResult<()> {
        self.store.check_key(key)?;
        self.namespaces.ensure_active(ns)
    }

    fn check_scope(&self, scope: Scope) -> ConfigResult<()> {
        match scope {
            Scope::All => Ok(()),
            Scope::Namespace(ns) => self.namespaces.ensure_active(ns),
        }
    }

    fn namespace_name(&self, ns: NamespaceId) -> ConfigResult<&str> {
        self.namespaces
            .name_of(ns)
            .ok_or_else(|| ConfigError::not_found(format!("namespace {ns}")))
    }

    fn crypto(&self) -> ConfigResult<&CryptoManager> {
        self.crypto.as_ref().ok_or(ConfigError::NoEncryptionKey)
    }

    /// Decodes an entry to a plaintext value.
    fn decode_entry(&self, entry: &EntryRef<'_>) -> ConfigResult<Value> {
        if entry.is_encrypted() {
            let plaintext = self.decrypt_entry(entry)?;
            Value::from_bytes(entry.value_type, &plaintext)
        } else {
            Value::from_bytes(entry.value_type, entry.value)
        }
    }

    fn decrypt_entry(&self, entry: &EntryRef<'_>) -> ConfigResult<Zeroizing<Vec<u8>>> {
        let plaintext = self.crypto()?.decrypt(entry.value, entry.key.as_bytes())?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Plaintext snapshot for change events; `None` if absent or
    /// undecryptable.
    fn snapshot(&self, ns: NamespaceId, key: &str) -> Option<Value> {
        let entry = self.store.lookup(ns, key)?;
        self.decode_entry(&entry).ok()
    }

    fn read_or_default(&self, ns: NamespaceId, key: &str, expected: ValueType) -> ConfigResult<Value> {
        match self.store.get(ns, key, expected) {
            Ok(entry) => self.decode_entry(&entry),
            Err(ConfigError::NotFound { .. }) => self
                .defaults
                .lookup_typed(key, expected)
                .ok_or_else(|| ConfigError::not_found(key)),
            Err(e) => Err(e),
        }
    }

    /// Encodes, encrypts if `flags` asks for it, and stores a value.
    fn write_value(
        &mut self,
        ns: NamespaceId,
        key: &str,
        value: &Value,
        flags: EntryFlags,
    ) -> ConfigResult<()> {
        let value_type = value.value_type();
        if let Some(existing) = self.store.lookup(ns, key) {
            if existing.value_type != value_type {
                return Err(ConfigError::type_mismatch(key, existing.value_type, value_type));
            }
            if existing.flags.contains(EntryFlags::READ_ONLY) {
                return Err(ConfigError::read_only(key));
            }
        }

        let plaintext = Zeroizing::new(value.to_bytes());
        if flags.contains(EntryFlags::ENCRYPTED) {
            if !value_type.is_encryptable() {
                return Err(ConfigError::invalid_parameter(format!(
                    "{value_type} values cannot be encrypted"
                )));
            }
            let ciphertext = self.crypto()?.encrypt(&plaintext, key.as_bytes())?;
            self.put_entry(ns, key, value_type, &ciphertext, flags)
        } else {
            self.put_entry(ns, key, value_type, &plaintext, flags)
        }
    }

    /// Stores raw bytes, then records the change and notifies observers.
    fn put_entry(
        &mut self,
        ns: NamespaceId,
        key: &str,
        value_type: ValueType,
        bytes: &[u8],
        flags: EntryFlags,
    ) -> ConfigResult<()> {
        let previous = self.store.lookup(ns, key).map(|entry| entry.flags);
        let old = self.snapshot(ns, key);
        let outcome = self.store.put(ns, key, value_type, bytes, flags)?;

        // A persistent entry turned volatile must leave the backend
        let was_persistent = previous.is_some_and(|f| f.contains(EntryFlags::PERSISTENT));
        if was_persistent && !flags.contains(EntryFlags::PERSISTENT) {
            let name = self.namespace_name(ns)?.to_string();
            self.queue_erase(record_key(&name, key));
        }
        self.dirty = true;
        debug!(
            namespace = ns.as_u8(),
            key,
            %value_type,
            created = outcome.created,
            "entry written"
        );

        let new = self.snapshot(ns, key);
        self.dispatch(ns, key, value_type, old.as_ref(), new.as_ref());
        Ok(())
    }

    fn remove_entry(&mut self, ns: NamespaceId, key: &str) -> ConfigResult<()> {
        let (value_type, persistent) = self
            .store
            .lookup(ns, key)
            .map(|entry| (entry.value_type, entry.flags.contains(EntryFlags::PERSISTENT)))
            .ok_or_else(|| ConfigError::not_found(key))?;
        let old = self.snapshot(ns, key);
        self.store.delete(ns, key)?;

        if persistent {
            let name = self.namespace_name(ns)?.to_string();
            self.queue_erase(record_key(&name, key));
        }
        self.dirty = true;
        debug!(namespace = ns.as_u8(), key, "entry deleted");

        self.dispatch(ns, key, value_type, old.as_ref(), None);
        Ok(())
    }

    fn reset_entry(&mut self, ns: NamespaceId, key: &str) -> ConfigResult<()> {
        let value = self
            .defaults
            .lookup(key)
            .ok_or_else(|| ConfigError::not_found(format!("default for '{key}'")))?;
        let flags = self
            .store
            .lookup(ns, key)
            .map_or(EntryFlags::DEFAULT, |entry| entry.flags);
        self.write_value(ns, key, &value, flags)
    }

    fn dispatch(
        &self,
        ns: NamespaceId,
        key: &str,
        value_type: ValueType,
        old: Option<&Value>,
        new: Option<&Value>,
    ) {
        let event = ChangeEvent {
            namespace: ns,
            namespace_name: self.namespaces.name_of(ns).unwrap_or_default(),
            key,
            value_type,
            old,
            new,
        };
        self.notify.dispatch(&event);
    }

    fn queue_erase(&mut self, record_key: String) {
        if self.full_resync || self.pending_erase.contains(&record_key) {
            return;
        }
        if self.pending_erase.len() >= self.config.max_keys {
            debug!("pending erase list full, next commit rewrites the backend");
            self.pending_erase.clear();
            self.full_resync = true;
            return;
        }
        self.pending_erase.push(record_key);
    }

    /// Commits after a mutation when auto-commit is on and a backend is
    /// bound.
    fn finish_mutation(&mut self) -> ConfigResult<()> {
        if self.config.auto_commit && self.backend.is_some() {
            self.commit()
        } else {
            Ok(())
        }
    }

    fn commit(&mut self) -> ConfigResult<()> {
        let backend = self.backend.as_mut().ok_or(ConfigError::NoBackend)?;
        let full = self.full_resync;
        let mut written = 0usize;
        let mut erased = 0usize;

        if full {
            backend.erase_all().map_err(ConfigError::BackendWrite)?;
        } else {
            for record in &self.pending_erase {
                backend.erase(record).map_err(ConfigError::BackendWrite)?;
                erased += 1;
            }
        }

        for entry in self.store.iter(Scope::All) {
            if !entry.flags.contains(EntryFlags::PERSISTENT) || !(full || entry.changed) {
                continue;
            }
            let namespace = self
                .namespaces
                .name_of(entry.namespace)
                .ok_or_else(|| ConfigError::not_found(format!("namespace {}", entry.namespace)))?;
            backend
                .write(&record_key(namespace, entry.key), &encode_record(namespace, &entry))
                .map_err(ConfigError::BackendWrite)?;
            written += 1;
        }

        backend.commit().map_err(ConfigError::BackendWrite)?;

        self.store.mark_all_clean();
        self.pending_erase.clear();
        self.full_resync = false;
        self.dirty = false;
        info!(full, written, erased, "configuration committed");
        Ok(())
    }

    fn load(&mut self) -> ConfigResult<usize> {
        let backend = self.backend.as_ref().ok_or(ConfigError::NoBackend)?;
        let keys = backend.keys().map_err(ConfigError::BackendRead)?;

        // Read everything before touching the store
        let mut records = Vec::with_capacity(keys.len());
        for key in &keys {
            let bytes = backend.read(key).map_err(ConfigError::BackendRead)?;
            let record = decode_record(&bytes)
                .and_then(|record| {
                    codec::validate_value(&record.key, record.value_type, record.flags, &record.value)?;
                    Ok(record)
                })
                .map_err(|e| {
                    ConfigError::BackendRead(StorageError::corrupted(format!("record '{key}': {e}")))
                })?;
            records.push(record);
        }
        self.check_loadable(&records).map_err(|e| {
            ConfigError::BackendRead(StorageError::corrupted(format!("backend records do not fit: {e}")))
        })?;

        self.store.clear();
        self.namespaces.reset();
        for record in &records {
            let ns = self.namespaces.open(&record.namespace)?;
            self.store
                .put(ns, &record.key, record.value_type, &record.value, record.flags)?;
        }

        self.store.mark_all_clean();
        self.pending_erase.clear();
        // Records that failed to decode under an older layout would
        // otherwise linger
        self.full_resync = true;
        self.dirty = false;
        info!(records = records.len(), "configuration loaded");
        Ok(records.len())
    }

    /// Fails if `records` cannot all be placed in this store's tables.
    fn check_loadable(&self, records: &[PersistedRecord]) -> ConfigResult<()> {
        if records.len() > self.config.max_keys {
            return Err(ConfigError::no_space("entry", self.config.max_keys));
        }

        let mut names = BTreeSet::new();
        let mut entries = BTreeSet::new();
        names.insert(DEFAULT_NAMESPACE);
        for record in records {
            self.namespaces.check_name(&record.namespace)?;
            self.store.check_key(&record.key)?;
            self.store.check_value(record.value.len())?;
            names.insert(record.namespace.as_str());
            if !entries.insert((record.namespace.as_str(), record.key.as_str())) {
                return Err(ConfigError::invalid_format(format!(
                    "duplicate record for '{}' in namespace '{}'",
                    record.key, record.namespace
                )));
            }
        }

        if names.len() > self.config.max_namespaces {
            return Err(ConfigError::no_space("namespace", self.config.max_namespaces));
        }
        Ok(())
    }

    fn rotate(&mut self, new_key: &EncryptionKey) -> ConfigResult<usize> {
        let new_crypto = CryptoManager::new(new_key);

        let mut staged = Vec::new();
        for entry in self.store.iter(Scope::All).filter(EntryRef::is_encrypted) {
            let plaintext = self.decrypt_entry(&entry)?;
            let ciphertext = new_crypto.encrypt(&plaintext, entry.key.as_bytes())?;
            self.store.check_value(ciphertext.len())?;
            staged.push((entry.index, ciphertext));
        }

        for (index, ciphertext) in &staged {
            self.store.replace_value(*index, ciphertext)?;
        }
        self.crypto = Some(new_crypto);
        if !staged.is_empty() {
            self.dirty = true;
        }
        info!(
            algorithm = ?new_key.algorithm(),
            rotated = staged.len(),
            "encryption key rotated"
        );
        Ok(staged.len())
    }

    fn export_document(
        &self,
        format: ExportFormat,
        scope: Scope,
        flags: ExportFlags,
    ) -> ConfigResult<Vec<u8>> {
        self.check_scope(scope)?;
        let decrypt = flags.contains(ExportFlags::DECRYPT);

        let mut records = Vec::with_capacity(self.store.count(scope));
        for entry in self.store.iter(scope) {
            let (entry_flags, value) = if decrypt && entry.is_encrypted() {
                let plaintext = self.decrypt_entry(&entry)?;
                (entry.flags - EntryFlags::ENCRYPTED, plaintext.to_vec())
            } else {
                (entry.flags, entry.value.to_vec())
            };
            records.push(Record {
                namespace_id: entry.namespace,
                namespace: self.namespace_name(entry.namespace)?.to_string(),
                key: entry.key.to_string(),
                value_type: entry.value_type,
                flags: entry_flags,
                value,
            });
        }
        codec::encode(format, &records)
    }

    fn import(
        &mut self,
        target: Option<&str>,
        format: ExportFormat,
        bytes: &[u8],
        flags: ImportFlags,
    ) -> ConfigResult<ImportReport> {
        let records = codec::decode(format, bytes)?;

        let target = match target {
            Some(name) => Some(self.namespaces.open(name)?),
            None => None,
        };

        if flags.contains(ImportFlags::CLEAR) {
            let scope = target.map_or(Scope::All, Scope::Namespace);
            let removed = self.store.remove_scope(scope);
            self.pending_erase.clear();
            self.full_resync = true;
            self.dirty = true;
            debug!(removed, "import cleared target scope");
        }

        let mut report = ImportReport::default();
        for record in records {
            let result = record.and_then(|record| {
                let ns = match target {
                    Some(ns) => ns,
                    None => self.namespaces.open(&record.namespace)?,
                };
                self.put_entry(ns, &record.key, record.value_type, &record.value, record.flags)
            });
            match result {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_record_level() && flags.contains(ImportFlags::SKIP_ERRORS) => {
                    warn!(error = %e, "import record skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    // Records applied before the failure stay and are
                    // committed like any other mutation
                    if report.applied > 0 || flags.contains(ImportFlags::CLEAR) {
                        self.finish_mutation()?;
                    }
                    return Err(e);
                }
            }
        }

        info!(
            ?format,
            applied = report.applied,
            skipped = report.skipped,
            "import finished"
        );
        self.finish_mutation()?;
        Ok(report)
    }
}
