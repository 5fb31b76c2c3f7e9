//! Import/export document formats.
//!
//! Both formats carry the same information: for every entry its namespace
//! name, key, type, flags and stored value bytes. Encrypted values travel
//! as ciphertext unless the caller asked the manager to decrypt first.
//!
//! Decoding is split in two levels. Structural problems (bad magic,
//! truncation, malformed JSON, unknown namespace ids) fail the whole
//! document with [`ConfigError::InvalidFormat`]. Problems confined to one
//! record (a value that does not fit its type) are reported per record so
//! the importer can skip them.

pub(crate) mod binary;
pub(crate) mod json;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{EntryFlags, ExportFormat, NamespaceId, Value, ValueType};

/// One entry as carried by an export document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    /// Namespace id in the exporting store. Only meaningful for encoding.
    pub namespace_id: NamespaceId,
    pub namespace: String,
    pub key: String,
    pub value_type: ValueType,
    pub flags: EntryFlags,
    /// Stored bytes: plaintext encoding, or ciphertext when
    /// [`EntryFlags::ENCRYPTED`] is set.
    pub value: Vec<u8>,
}

/// Result of decoding a single record.
pub(crate) type DecodedRecord = ConfigResult<Record>;

/// Serializes `records` in `format`.
pub(crate) fn encode(format: ExportFormat, records: &[Record]) -> ConfigResult<Vec<u8>> {
    match format {
        ExportFormat::Json => json::encode(records),
        ExportFormat::Binary => binary::encode(records),
    }
}

/// Parses a whole document.
///
/// The outer error is structural; the inner per-record results carry
/// record-level failures.
pub(crate) fn decode(format: ExportFormat, bytes: &[u8]) -> ConfigResult<Vec<DecodedRecord>> {
    match format {
        ExportFormat::Json => json::decode(bytes),
        ExportFormat::Binary => binary::decode(bytes),
    }
}

/// Checks that `bytes` is a valid stored form for `value_type`.
pub(crate) fn validate_value(
    key: &str,
    value_type: ValueType,
    flags: EntryFlags,
    bytes: &[u8],
) -> ConfigResult<()> {
    if flags.contains(EntryFlags::ENCRYPTED) {
        if !value_type.is_encryptable() {
            return Err(ConfigError::invalid_format(format!(
                "'{key}': {value_type} values cannot be encrypted"
            )));
        }
        return Ok(());
    }
    Value::from_bytes(value_type, bytes)
        .map(|_| ())
        .map_err(|e| ConfigError::invalid_format(format!("'{key}': {e}")))
}

/// Little-endian cursor over a byte slice.
///
/// Every read is bounds-checked and fails with `InvalidFormat` on
/// truncation.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, len: usize) -> ConfigResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ConfigError::invalid_format(format!(
                "truncated input: need {len} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> ConfigResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> ConfigResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> ConfigResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_str(&mut self, len: usize) -> ConfigResult<&'a str> {
        std::str::from_utf8(self.take(len)?)
            .map_err(|_| ConfigError::invalid_format("name is not valid UTF-8"))
    }
}
