//! # confstore Core
//!
//! Typed, namespaced configuration manager for embedded targets.
//!
//! This crate provides:
//! - A fixed-capacity entry store for seven value types
//! - Namespaces isolating identical keys
//! - Registered defaults consulted on read misses
//! - Synchronous change callbacks
//! - Transparent AES-GCM encryption of string and blob values, with key
//!   rotation
//! - JSON and compact binary import/export
//! - Commit/load against a [`ConfigBackend`]
//!
//! Every table is allocated when the manager is initialized and never
//! grows afterwards.
//!
//! ## Example
//!
//! ```rust
//! use confstore_core::{Config, ConfigManager, InMemoryBackend};
//!
//! let config = ConfigManager::new();
//! config.init(Config::default()).unwrap();
//! config.attach_backend(Box::new(InMemoryBackend::new())).unwrap();
//!
//! config.register_default("app.port", 8080i32).unwrap();
//! assert_eq!(config.get::<i32>("app.port").unwrap(), 8080);
//!
//! config.set("app.port", 9000i32).unwrap();
//! config.commit().unwrap();
//! assert_eq!(config.get::<i32>("app.port").unwrap(), 9000);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod crypto;
mod defaults;
mod error;
mod manager;
mod namespace;
mod notify;
mod persist;
mod store;
mod types;

pub use config::{
    Config, MAX_KEYS_RANGE, MAX_KEY_LEN_RANGE, MAX_NAMESPACES_RANGE, MAX_VALUE_SIZE_RANGE,
    MIN_CALLBACKS,
};
pub use crypto::{
    CipherAlgorithm, CryptoManager, EncryptionKey, CIPHERTEXT_OVERHEAD, NONCE_SIZE, TAG_SIZE,
};
pub use error::{ConfigError, ConfigResult};
pub use manager::ConfigManager;
pub use namespace::DEFAULT_NAMESPACE;
pub use notify::{CallbackError, ChangeCallback, ChangeEvent};
pub use types::{
    CallbackHandle, ConfigType, EntryFlags, EntryInfo, ExportFlags, ExportFormat, ImportFlags,
    ImportReport, NamespaceId, Scope, Value, ValueType,
};

// Re-export storage types for convenience
pub use confstore_storage::{
    ConfigBackend, FileBackend, InMemoryBackend, StorageError, StorageResult,
};
