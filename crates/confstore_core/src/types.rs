//! Core type definitions for confstore.

use crate::error::{ConfigError, ConfigResult};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of a stored value.
///
/// The discriminant is the one-byte tag used by the binary export format
/// and the backend record format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ValueType {
    /// 32-bit signed integer.
    I32 = 0,
    /// 32-bit unsigned integer.
    U32 = 1,
    /// 64-bit signed integer.
    I64 = 2,
    /// 32-bit float.
    F32 = 3,
    /// Boolean.
    Bool = 4,
    /// UTF-8 string bounded by `max_value_size`.
    Str = 5,
    /// Byte blob bounded by `max_value_size`.
    Blob = 6,
}

impl ValueType {
    /// Every supported type, in tag order.
    pub const ALL: [ValueType; 7] = [
        ValueType::I32,
        ValueType::U32,
        ValueType::I64,
        ValueType::F32,
        ValueType::Bool,
        ValueType::Str,
        ValueType::Blob,
    ];

    /// Returns the wire tag.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    /// Returns the lowercase name used in JSON documents.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::Bool => "bool",
            Self::Str => "str",
            Self::Blob => "blob",
        }
    }

    /// Returns the encoded size for fixed-width types.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 => Some(8),
            Self::Bool => Some(1),
            Self::Str | Self::Blob => None,
        }
    }

    /// Returns true for the types that may be stored encrypted.
    #[must_use]
    pub const fn is_encryptable(self) -> bool {
        matches!(self, Self::Str | Self::Blob)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 32-bit signed integer.
    I32(i32),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 64-bit signed integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Str(String),
    /// Byte blob.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the type tag of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::I32(_) => ValueType::I32,
            Self::U32(_) => ValueType::U32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::Bool(_) => ValueType::Bool,
            Self::Str(_) => ValueType::Str,
            Self::Blob(_) => ValueType::Blob,
        }
    }

    /// Encodes the value to its stored byte form (little-endian scalars,
    /// raw UTF-8, raw blob).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::I32(v) => v.to_le_bytes().to_vec(),
            Self::U32(v) => v.to_le_bytes().to_vec(),
            Self::I64(v) => v.to_le_bytes().to_vec(),
            Self::F32(v) => v.to_bits().to_le_bytes().to_vec(),
            Self::Bool(v) => vec![u8::from(*v)],
            Self::Str(s) => s.as_bytes().to_vec(),
            Self::Blob(b) => b.clone(),
        }
    }

    /// Decodes a value of type `value_type` from its stored byte form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFormat`] if the length is wrong for a
    /// fixed-width type, a boolean byte is not 0 or 1, or a string is not
    /// valid UTF-8.
    pub fn from_bytes(value_type: ValueType, bytes: &[u8]) -> ConfigResult<Self> {
        if let Some(size) = value_type.fixed_size() {
            if bytes.len() != size {
                return Err(ConfigError::invalid_format(format!(
                    "{value_type} value must be {size} bytes, got {}",
                    bytes.len()
                )));
            }
        }

        let value = match value_type {
            ValueType::I32 => Self::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ValueType::U32 => Self::U32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ValueType::I64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Self::I64(i64::from_le_bytes(raw))
            }
            ValueType::F32 => Self::F32(f32::from_bits(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            ValueType::Bool => match bytes[0] {
                0 => Self::Bool(false),
                1 => Self::Bool(true),
                other => {
                    return Err(ConfigError::invalid_format(format!(
                        "invalid boolean byte {other:#04x}"
                    )))
                }
            },
            ValueType::Str => Self::Str(
                std::str::from_utf8(bytes)
                    .map_err(|_| ConfigError::invalid_format("string value is not UTF-8"))?
                    .to_string(),
            ),
            ValueType::Blob => Self::Blob(bytes.to_vec()),
        };
        Ok(value)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

/// A Rust type that can be read from the store.
///
/// Implemented for the seven supported value types. A read of type `T`
/// against an entry of another type fails with
/// [`ConfigError::TypeMismatch`]; no coercion happens.
pub trait ConfigType: Sized {
    /// The stored type tag for this Rust type.
    const VALUE_TYPE: ValueType;

    /// Extracts `Self` from a value of the matching type.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_config_type {
    ($ty:ty, $variant:ident) => {
        impl ConfigType for $ty {
            const VALUE_TYPE: ValueType = ValueType::$variant;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_config_type!(i32, I32);
impl_config_type!(u32, U32);
impl_config_type!(i64, I64);
impl_config_type!(f32, F32);
impl_config_type!(bool, Bool);
impl_config_type!(String, Str);
impl_config_type!(Vec<u8>, Blob);

bitflags! {
    /// Per-entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u8 {
        /// Value bytes are ciphertext.
        const ENCRYPTED = 0b0000_0001;
        /// Setters and deletes are rejected.
        const READ_ONLY = 0b0000_0010;
        /// Entry is written to the backend on commit.
        const PERSISTENT = 0b0000_0100;
    }
}

impl EntryFlags {
    /// Flags given to entries created by the plain setters.
    pub const DEFAULT: Self = Self::PERSISTENT;

    /// Lowercase names of the set flags, as used in JSON documents.
    pub fn json_names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::ENCRYPTED) {
            names.push("encrypted");
        }
        if self.contains(Self::READ_ONLY) {
            names.push("read_only");
        }
        if self.contains(Self::PERSISTENT) {
            names.push("persistent");
        }
        names
    }

    /// Parses a flag name produced by [`EntryFlags::json_names`].
    pub fn from_json_name(name: &str) -> Option<Self> {
        match name {
            "encrypted" => Some(Self::ENCRYPTED),
            "read_only" => Some(Self::READ_ONLY),
            "persistent" => Some(Self::PERSISTENT),
            _ => None,
        }
    }
}

bitflags! {
    /// Options for export.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExportFlags: u8 {
        /// Decrypt encrypted values and clear their encrypted flag.
        const DECRYPT = 0b0000_0001;
    }
}

bitflags! {
    /// Options for import.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImportFlags: u8 {
        /// Erase the target scope before applying records.
        const CLEAR = 0b0000_0001;
        /// Skip rejected records instead of aborting.
        const SKIP_ERRORS = 0b0000_0010;
    }
}

/// Identifier for a namespace.
///
/// Ids are small table indices assigned when a name is first opened; they
/// are not stable across stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceId(pub u8);

impl NamespaceId {
    /// The default namespace, always present and always active.
    pub const DEFAULT: Self = Self(0);

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the id as a table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns:{}", self.0)
    }
}

/// Handle returned by callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub(crate) u32);

impl CallbackHandle {
    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Which entries an operation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every namespace.
    All,
    /// One namespace.
    Namespace(NamespaceId),
}

impl Scope {
    /// Returns true if `ns` is inside this scope.
    #[must_use]
    pub fn contains(self, ns: NamespaceId) -> bool {
        match self {
            Self::All => true,
            Self::Namespace(id) => id == ns,
        }
    }
}

/// Serialization format for import and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Human-readable JSON document.
    Json,
    /// Compact binary document.
    Binary,
}

/// Descriptor of a stored entry, as produced by iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Namespace the entry belongs to.
    pub namespace: NamespaceId,
    /// Unqualified key.
    pub key: String,
    /// Stored type.
    pub value_type: ValueType,
    /// Stored size in bytes (ciphertext size for encrypted entries).
    pub size: usize,
    /// Entry flags.
    pub flags: EntryFlags,
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportReport {
    /// Records stored.
    pub applied: usize,
    /// Records rejected and skipped under [`ImportFlags::SKIP_ERRORS`].
    pub skipped: usize,
}
