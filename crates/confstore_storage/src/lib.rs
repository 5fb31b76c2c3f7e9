//! # confstore Storage
//!
//! Persistence backend trait and reference backends for confstore.
//!
//! Backends are **opaque record stores**: they map a record key to a byte
//! payload and know nothing about entry types, namespaces or encryption.
//! The configuration manager owns the record format.
//!
//! ## Design Principles
//!
//! - Backends are simple keyed byte stores (read, write, erase, commit)
//! - `commit` is the durability point; writes before it may be staged
//! - Must be `Send` so a manager holding one can be shared across threads
//! - Failures are reported verbatim; retrying is the caller's decision
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Volatile RAM storage; clones share one map
//! - [`FileBackend`] - Persistent image file, rewritten atomically on commit
//! - [`MockBackend`] - Records calls and injects failures for tests
//!
//! ## Example
//!
//! ```rust
//! use confstore_storage::{ConfigBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.init().unwrap();
//! backend.write("default/app.port", &[0x28, 0x23]).unwrap();
//! backend.commit().unwrap();
//! assert_eq!(backend.read("default/app.port").unwrap(), vec![0x28, 0x23]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod mock;

pub use backend::ConfigBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use mock::{BackendCall, MockBackend};
