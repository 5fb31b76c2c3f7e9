//! Backend record format.
//!
//! Each persistent entry is stored as one backend record under the key
//! `"<namespace>/<key>"`. The record is self-describing so `load` can
//! rebuild the namespace table from the records alone:
//!
//! ```text
//! [ns_len:1][ns_name][key_len:1][key][type:1][flags:1][value_len:2][value]
//! ```

use crate::codec::ByteReader;
use crate::error::{ConfigError, ConfigResult};
use crate::namespace::RECORD_KEY_SEPARATOR;
use crate::store::EntryRef;
use crate::types::{EntryFlags, ValueType};

/// A decoded backend record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PersistedRecord {
    pub namespace: String,
    pub key: String,
    pub value_type: ValueType,
    pub flags: EntryFlags,
    pub value: Vec<u8>,
}

/// Backend key for an entry.
pub(crate) fn record_key(namespace: &str, key: &str) -> String {
    let mut record_key = String::with_capacity(namespace.len() + 1 + key.len());
    record_key.push_str(namespace);
    record_key.push(RECORD_KEY_SEPARATOR);
    record_key.push_str(key);
    record_key
}

/// Encodes an entry as a backend record.
///
/// Lengths fit their fields because keys, names and values are bounded by
/// the validated configuration limits.
pub(crate) fn encode_record(namespace: &str, entry: &EntryRef<'_>) -> Vec<u8> {
    let mut buf =
        Vec::with_capacity(1 + namespace.len() + 1 + entry.key.len() + 4 + entry.value.len());
    buf.push(namespace.len() as u8);
    buf.extend_from_slice(namespace.as_bytes());
    buf.push(entry.key.len() as u8);
    buf.extend_from_slice(entry.key.as_bytes());
    buf.push(entry.value_type.as_u8());
    buf.push(entry.flags.bits());
    buf.extend_from_slice(&(entry.value.len() as u16).to_le_bytes());
    buf.extend_from_slice(entry.value);
    buf
}

/// Decodes a backend record.
pub(crate) fn decode_record(bytes: &[u8]) -> ConfigResult<PersistedRecord> {
    let mut reader = ByteReader::new(bytes);
    let ns_len = usize::from(reader.read_u8()?);
    let namespace = reader.read_str(ns_len)?.to_string();
    let key_len = usize::from(reader.read_u8()?);
    let key = reader.read_str(key_len)?.to_string();
    let tag = reader.read_u8()?;
    let value_type = ValueType::from_u8(tag)
        .ok_or_else(|| ConfigError::invalid_format(format!("unknown type tag {tag}")))?;
    let flag_bits = reader.read_u8()?;
    let flags = EntryFlags::from_bits(flag_bits)
        .ok_or_else(|| ConfigError::invalid_format(format!("unknown flag bits {flag_bits:#04x}")))?;
    let value_len = usize::from(reader.read_u16()?);
    let value = reader.take(value_len)?.to_vec();

    if !reader.is_empty() {
        return Err(ConfigError::invalid_format(format!(
            "trailing bytes in record: {} left",
            reader.remaining()
        )));
    }

    Ok(PersistedRecord {
        namespace,
        key,
        value_type,
        flags,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NamespaceId;

    fn entry<'a>(key: &'a str, value: &'a [u8]) -> EntryRef<'a> {
        EntryRef {
            index: 0,
            namespace: NamespaceId(2),
            key,
            value_type: ValueType::Str,
            flags: EntryFlags::PERSISTENT | EntryFlags::ENCRYPTED,
            value,
            changed: true,
        }
    }

    #[test]
    fn record_key_joins_namespace_and_key() {
        assert_eq!(record_key("wifi", "psk"), "wifi/psk");
    }

    #[test]
    fn encode_layout() {
        let bytes = encode_record("ns", &entry("k", b"xy"));
        assert_eq!(
            bytes,
            vec![2, b'n', b's', 1, b'k', 5, 0b101, 2, 0, b'x', b'y']
        );
    }

    #[test]
    fn decode_encoded_record() {
        let bytes = encode_record("wifi", &entry("psk", b"cipher"));
        let record = decode_record(&bytes).unwrap();
        assert_eq!(record.namespace, "wifi");
        assert_eq!(record.key, "psk");
        assert_eq!(record.value_type, ValueType::Str);
        assert_eq!(record.flags, EntryFlags::PERSISTENT | EntryFlags::ENCRYPTED);
        assert_eq!(record.value, b"cipher");
    }

    #[test]
    fn decode_rejects_damage() {
        let bytes = encode_record("wifi", &entry("psk", b"cipher"));
        assert!(decode_record(&bytes[..bytes.len() - 1]).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(decode_record(&trailing).is_err());

        let mut bad_type = bytes.clone();
        bad_type[1 + 4 + 1 + 3] = 42;
        assert!(matches!(
            decode_record(&bad_type),
            Err(ConfigError::InvalidFormat { .. })
        ));
    }
}
