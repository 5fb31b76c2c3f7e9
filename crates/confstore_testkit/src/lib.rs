//! # confstore Testkit
//!
//! Test utilities for confstore.
//!
//! This crate provides:
//! - Manager fixtures over in-memory and file backends
//! - Property-based test generators using proptest
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confstore_testkit::prelude::*;
//!
//! #[test]
//! fn survives_reopen() {
//!     let mut fixture = TestManager::memory();
//!     fixture.set("app.port", 9000i32).unwrap();
//!     fixture.commit().unwrap();
//!     fixture.reopen();
//!     assert_eq!(fixture.get::<i32>("app.port").unwrap(), 9000);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
