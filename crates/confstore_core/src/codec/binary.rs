//! Compact binary export format.
//!
//! ```text
//! header   [magic "CFGX":4][version:1][record_count:4]
//! ns table [ns_count:1] ([ns_id:1][name_len:1][name])*
//! records  ([ns_id:1][key_len:1][key][type:1][flags:1][value_len:2][value])*
//! ```
//!
//! All integers are little-endian. Namespace ids are local to the
//! document; the table resolves them to names on import.

use super::{validate_value, ByteReader, DecodedRecord, Record};
use crate::error::{ConfigError, ConfigResult};
use crate::types::{EntryFlags, NamespaceId, ValueType};
use std::collections::BTreeMap;

/// Document magic.
pub(crate) const MAGIC: &[u8; 4] = b"CFGX";

/// Current format version.
pub(crate) const VERSION: u8 = 1;

const HEADER_SIZE: usize = 4 + 1 + 4;

fn length_u8(len: usize, what: &str) -> ConfigResult<u8> {
    u8::try_from(len).map_err(|_| ConfigError::invalid_parameter(format!("{what} too long: {len}")))
}

pub(crate) fn encode(records: &[Record]) -> ConfigResult<Vec<u8>> {
    let mut namespaces: BTreeMap<u8, &str> = BTreeMap::new();
    for record in records {
        namespaces
            .entry(record.namespace_id.as_u8())
            .or_insert(record.namespace.as_str());
    }

    let count = u32::try_from(records.len())
        .map_err(|_| ConfigError::invalid_parameter("too many records"))?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + 1);
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&count.to_le_bytes());

    buf.push(length_u8(namespaces.len(), "namespace table")?);
    for (id, name) in &namespaces {
        buf.push(*id);
        buf.push(length_u8(name.len(), "namespace name")?);
        buf.extend_from_slice(name.as_bytes());
    }

    for record in records {
        let value_len = u16::try_from(record.value.len())
            .map_err(|_| ConfigError::invalid_parameter("value too long for binary export"))?;
        buf.push(record.namespace_id.as_u8());
        buf.push(length_u8(record.key.len(), "key")?);
        buf.extend_from_slice(record.key.as_bytes());
        buf.push(record.value_type.as_u8());
        buf.push(record.flags.bits());
        buf.extend_from_slice(&value_len.to_le_bytes());
        buf.extend_from_slice(&record.value);
    }
    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> ConfigResult<Vec<DecodedRecord>> {
    let mut reader = ByteReader::new(bytes);

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(ConfigError::invalid_format("bad magic, not a binary export"));
    }
    let version = reader.read_u8()?;
    if version != VERSION {
        return Err(ConfigError::invalid_format(format!(
            "unsupported version {version}, expected {VERSION}"
        )));
    }
    let record_count = reader.read_u32()? as usize;

    let ns_count = reader.read_u8()?;
    let mut namespaces: BTreeMap<u8, String> = BTreeMap::new();
    for _ in 0..ns_count {
        let id = reader.read_u8()?;
        let name_len = usize::from(reader.read_u8()?);
        let name = reader.read_str(name_len)?;
        if namespaces.insert(id, name.to_string()).is_some() {
            return Err(ConfigError::invalid_format(format!(
                "duplicate namespace id {id}"
            )));
        }
    }

    // Every record is at least 6 bytes; reject absurd counts before
    // reserving
    if record_count > reader.remaining() / 6 {
        return Err(ConfigError::invalid_format(format!(
            "record count {record_count} exceeds document size"
        )));
    }

    let mut records = Vec::with_capacity(record_count);
    for _ in 0..record_count {
        let ns_id = reader.read_u8()?;
        let namespace = namespaces.get(&ns_id).cloned().ok_or_else(|| {
            ConfigError::invalid_format(format!("record refers to unknown namespace id {ns_id}"))
        })?;
        let key_len = usize::from(reader.read_u8()?);
        let key = reader.read_str(key_len)?.to_string();
        let tag = reader.read_u8()?;
        let value_type = ValueType::from_u8(tag)
            .ok_or_else(|| ConfigError::invalid_format(format!("unknown type tag {tag}")))?;
        let flag_bits = reader.read_u8()?;
        let flags = EntryFlags::from_bits(flag_bits).ok_or_else(|| {
            ConfigError::invalid_format(format!("unknown flag bits {flag_bits:#04x}"))
        })?;
        let value_len = usize::from(reader.read_u16()?);
        let value = reader.take(value_len)?.to_vec();

        let record = validate_value(&key, value_type, flags, &value).map(|()| Record {
            namespace_id: NamespaceId(ns_id),
            namespace,
            key,
            value_type,
            flags,
            value,
        });
        records.push(record);
    }

    if !reader.is_empty() {
        return Err(ConfigError::invalid_format(format!(
            "{} trailing bytes after last record",
            reader.remaining()
        )));
    }
    Ok(records)
}
