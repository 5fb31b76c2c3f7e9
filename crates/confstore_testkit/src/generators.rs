//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, namespace names and values that fit the
//! default [`Config`](confstore_core::Config) limits.

use confstore_core::{EntryFlags, Value};
use proptest::prelude::*;

/// Strategy for generating valid keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9._]{0,15}").expect("Invalid regex")
}

/// Strategy for generating valid namespace names.
pub fn namespace_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for generating finite floats.
///
/// NaN never compares equal to itself, so properties that compare typed
/// values use finite ones.
pub fn finite_f32_strategy() -> impl Strategy<Value = f32> {
    prop_oneof![
        Just(0.0f32),
        Just(-0.0f32),
        Just(f32::MIN_POSITIVE),
        Just(f32::MAX),
        -1.0e6f32..1.0e6f32,
    ]
}

/// Strategy for generating values of every type.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::I32),
        any::<u32>().prop_map(Value::U32),
        any::<i64>().prop_map(Value::I64),
        finite_f32_strategy().prop_map(Value::F32),
        any::<bool>().prop_map(Value::Bool),
        "\\PC{0,32}".prop_map(Value::Str),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Blob),
    ]
}

/// Strategy for generating string or blob values, the encryptable types.
pub fn secret_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        "\\PC{0,32}".prop_map(Value::Str),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Blob),
    ]
}

/// Strategy for generating a set of entries with distinct keys.
pub fn entries_strategy(max: usize) -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..max)
        .prop_map(|entries| entries.into_iter().collect())
}

/// Strategy for generating any combination of entry flags.
///
/// Callers drop [`EntryFlags::ENCRYPTED`] for types that cannot be
/// encrypted.
pub fn entry_flags_strategy() -> impl Strategy<Value = EntryFlags> {
    (0u8..8).prop_map(EntryFlags::from_bits_truncate)
}

/// A generated manager operation.
#[derive(Debug, Clone)]
pub enum ConfigOperation {
    /// Set a value
    Set {
        /// Key
        key: String,
        /// Value
        value: Value,
    },
    /// Delete a key
    Delete {
        /// Key
        key: String,
    },
    /// Commit to the backend
    Commit,
}

fn small_key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(String::from)
}

/// Strategy for generating operations over a small key space, so that
/// overwrites and deletes hit existing entries.
pub fn operation_strategy() -> impl Strategy<Value = ConfigOperation> {
    prop_oneof![
        4 => (small_key_strategy(), any::<i32>())
            .prop_map(|(key, v)| ConfigOperation::Set { key, value: Value::I32(v) }),
        2 => small_key_strategy().prop_map(|key| ConfigOperation::Delete { key }),
        1 => Just(ConfigOperation::Commit),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ConfigOperation>> {
    prop::collection::vec(operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
