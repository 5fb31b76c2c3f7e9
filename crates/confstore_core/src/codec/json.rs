//! JSON export format.
//!
//! ```json
//! {
//!   "default": {
//!     "app.port": { "type": "i32", "value": 9000, "flags": ["persistent"] }
//!   }
//! }
//! ```
//!
//! Namespaces and keys are emitted sorted. Blobs and ciphertext are
//! lowercase hex; non-finite floats are the strings `"nan"`, `"inf"` and
//! `"-inf"`. A NaN other than the canonical one is written as
//! `"nan:<bits>"` with its eight hex digits so the payload survives.

use super::{DecodedRecord, Record};
use crate::error::{ConfigError, ConfigResult};
use crate::types::{EntryFlags, NamespaceId, Value, ValueType};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonEntry {
    #[serde(rename = "type")]
    value_type: ValueType,
    value: JsonValue,
    #[serde(default)]
    flags: Vec<String>,
}

type Document = BTreeMap<String, BTreeMap<String, JsonEntry>>;

pub(crate) fn encode(records: &[Record]) -> ConfigResult<Vec<u8>> {
    let mut document = Document::new();
    for record in records {
        let value = encode_value(record)?;
        let entry = JsonEntry {
            value_type: record.value_type,
            value,
            flags: record.flags.json_names().into_iter().map(String::from).collect(),
        };
        document
            .entry(record.namespace.clone())
            .or_default()
            .insert(record.key.clone(), entry);
    }
    serde_json::to_vec_pretty(&document)
        .map_err(|e| ConfigError::invalid_format(format!("JSON encoding failed: {e}")))
}

fn encode_value(record: &Record) -> ConfigResult<JsonValue> {
    if record.flags.contains(EntryFlags::ENCRYPTED) {
        return Ok(JsonValue::String(hex::encode(&record.value)));
    }
    let value = match Value::from_bytes(record.value_type, &record.value)? {
        Value::I32(v) => JsonValue::from(v),
        Value::U32(v) => JsonValue::from(v),
        Value::I64(v) => JsonValue::from(v),
        Value::F32(v) => match Number::from_f64(f64::from(v)) {
            Some(n) => JsonValue::Number(n),
            None if v.to_bits() == f32::NAN.to_bits() => JsonValue::from("nan"),
            None if v.is_nan() => JsonValue::from(format!("nan:{:08x}", v.to_bits())),
            None if v > 0.0 => JsonValue::from("inf"),
            None => JsonValue::from("-inf"),
        },
        Value::Bool(v) => JsonValue::Bool(v),
        Value::Str(v) => JsonValue::String(v),
        Value::Blob(v) => JsonValue::String(hex::encode(v)),
    };
    Ok(value)
}

pub(crate) fn decode(bytes: &[u8]) -> ConfigResult<Vec<DecodedRecord>> {
    let document: Document = serde_json::from_slice(bytes)
        .map_err(|e| ConfigError::invalid_format(format!("malformed JSON document: {e}")))?;

    let mut records = Vec::new();
    for (ns_index, (namespace, entries)) in document.into_iter().enumerate() {
        // Ids in a JSON document are positional and only used for grouping
        let namespace_id = NamespaceId(u8::try_from(ns_index).map_err(|_| {
            ConfigError::invalid_format("too many namespaces in document")
        })?);
        for (key, entry) in entries {
            let flags = parse_flags(&key, &entry.flags)?;
            let record = decode_value(&key, entry.value_type, flags, &entry.value).map(|value| {
                Record {
                    namespace_id,
                    namespace: namespace.clone(),
                    key,
                    value_type: entry.value_type,
                    flags,
                    value,
                }
            });
            records.push(record);
        }
    }
    Ok(records)
}

fn parse_flags(key: &str, names: &[String]) -> ConfigResult<EntryFlags> {
    names.iter().try_fold(EntryFlags::empty(), |flags, name| {
        EntryFlags::from_json_name(name)
            .map(|flag| flags | flag)
            .ok_or_else(|| ConfigError::invalid_format(format!("'{key}': unknown flag '{name}'")))
    })
}

fn bad_value(key: &str, value_type: ValueType, value: &JsonValue) -> ConfigError {
    ConfigError::invalid_format(format!("'{key}': {value} is not a valid {value_type}"))
}

fn decode_hex(key: &str, value_type: ValueType, value: &JsonValue) -> ConfigResult<Vec<u8>> {
    value
        .as_str()
        .and_then(|s| hex::decode(s).ok())
        .ok_or_else(|| bad_value(key, value_type, value))
}

/// Converts a JSON value to stored bytes.
fn decode_value(
    key: &str,
    value_type: ValueType,
    flags: EntryFlags,
    value: &JsonValue,
) -> ConfigResult<Vec<u8>> {
    let bad = || bad_value(key, value_type, value);

    if flags.contains(EntryFlags::ENCRYPTED) {
        if !value_type.is_encryptable() {
            return Err(ConfigError::invalid_format(format!(
                "'{key}': {value_type} values cannot be encrypted"
            )));
        }
        return decode_hex(key, value_type, value);
    }

    let typed = match value_type {
        ValueType::I32 => Value::I32(
            value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(bad)?,
        ),
        ValueType::U32 => Value::U32(
            value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(bad)?,
        ),
        ValueType::I64 => Value::I64(value.as_i64().ok_or_else(bad)?),
        ValueType::F32 => Value::F32(match value {
            JsonValue::Number(n) => n.as_f64().ok_or_else(bad)? as f32,
            JsonValue::String(s) => match s.as_str() {
                "nan" => f32::NAN,
                "inf" => f32::INFINITY,
                "-inf" => f32::NEG_INFINITY,
                other => other
                    .strip_prefix("nan:")
                    .filter(|bits| bits.len() == 8)
                    .and_then(|bits| u32::from_str_radix(bits, 16).ok())
                    .map(f32::from_bits)
                    .filter(|v| v.is_nan())
                    .ok_or_else(bad)?,
            },
            _ => return Err(bad()),
        }),
        ValueType::Bool => Value::Bool(value.as_bool().ok_or_else(bad)?),
        ValueType::Str => Value::Str(value.as_str().ok_or_else(bad)?.to_string()),
        ValueType::Blob => Value::Blob(decode_hex(key, value_type, value)?),
    };
    Ok(typed.to_bytes())
}
