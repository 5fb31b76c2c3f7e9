//! Property tests across the manager, codecs and backends.

use confstore_core::{
    CipherAlgorithm, ConfigError, ConfigManager, EntryFlags, ExportFlags, ExportFormat,
    ImportFlags, NamespaceId, Scope, Value, ValueType,
};
use confstore_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn set_value(config: &ConfigManager, ns: NamespaceId, key: &str, value: &Value) {
    config.set_in(ns, key, value.clone()).unwrap();
}

fn read_typed(config: &ConfigManager, ns: NamespaceId, key: &str, ty: ValueType) -> Value {
    match ty {
        ValueType::I32 => Value::I32(config.get_in(ns, key).unwrap()),
        ValueType::U32 => Value::U32(config.get_in(ns, key).unwrap()),
        ValueType::I64 => Value::I64(config.get_in(ns, key).unwrap()),
        ValueType::F32 => Value::F32(config.get_in(ns, key).unwrap()),
        ValueType::Bool => Value::Bool(config.get_in(ns, key).unwrap()),
        ValueType::Str => Value::Str(config.get_in(ns, key).unwrap()),
        ValueType::Blob => Value::Blob(config.get_in(ns, key).unwrap()),
    }
}

fn read_value(config: &ConfigManager, ns: NamespaceId, key: &str, like: &Value) -> Value {
    read_typed(config, ns, key, like.value_type())
}

/// Every entry keyed by namespace name and key, with its type, flags,
/// stored size and plaintext bytes.
type Snapshot = BTreeMap<(String, String), (ValueType, EntryFlags, usize, Vec<u8>)>;

fn snapshot(config: &ConfigManager) -> Snapshot {
    config
        .entries(Scope::All)
        .unwrap()
        .into_iter()
        .map(|info| {
            let name = config.namespace_name(info.namespace).unwrap();
            let value = read_typed(config, info.namespace, &info.key, info.value_type);
            (
                (name, info.key),
                (info.value_type, info.flags, info.size, value.to_bytes()),
            )
        })
        .collect()
}

fn export_all(config: &ConfigManager, format: ExportFormat) -> Vec<u8> {
    let size = config
        .export_size(format, Scope::All, ExportFlags::empty())
        .unwrap();
    let mut buf = vec![0u8; size];
    config
        .export(format, Scope::All, ExportFlags::empty(), &mut buf)
        .unwrap();
    buf
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn set_get_is_bit_exact(entries in entries_strategy(32)) {
        with_manager(|config| {
            for (key, value) in &entries {
                set_value(config, NamespaceId::DEFAULT, key, value);
            }
            for (key, value) in &entries {
                let stored = read_value(config, NamespaceId::DEFAULT, key, value);
                assert_eq!(stored.to_bytes(), value.to_bytes());
            }
        });
    }

    #[test]
    fn export_import_roundtrip(
        entries in entries_strategy(24),
        flags in prop::collection::vec(entry_flags_strategy(), 24),
        ns_name in namespace_name_strategy(),
        binary in any::<bool>(),
    ) {
        let format = if binary { ExportFormat::Binary } else { ExportFormat::Json };
        let source = TestManager::memory();
        source.set_encryption_key(&[0x42; 32], CipherAlgorithm::Aes256Gcm).unwrap();
        let ns = source.open_namespace(&ns_name).unwrap();
        for (i, (key, value)) in entries.iter().enumerate() {
            let target_ns = if i % 2 == 0 { NamespaceId::DEFAULT } else { ns };
            let mut entry_flags = flags[i];
            if !value.value_type().is_encryptable() {
                entry_flags.remove(EntryFlags::ENCRYPTED);
            }
            source.set_with_flags(target_ns, key, value.clone(), entry_flags).unwrap();
        }

        let before = snapshot(&source);
        let document = export_all(&source, format);

        // into a fresh store
        let target = TestManager::memory();
        target.set_encryption_key(&[0x42; 32], CipherAlgorithm::Aes256Gcm).unwrap();
        let report = target.import(format, &document, ImportFlags::empty()).unwrap();
        prop_assert_eq!(report.applied, entries.len());
        prop_assert_eq!(report.skipped, 0);
        prop_assert_eq!(&snapshot(&target), &before);
        prop_assert_eq!(export_all(&target, format), document.clone());

        // back over the cleared source
        let report = source.import(format, &document, ImportFlags::CLEAR).unwrap();
        prop_assert_eq!(report.applied, entries.len());
        prop_assert_eq!(&snapshot(&source), &before);
    }

    #[test]
    fn commits_survive_reopen(ops in operation_sequence_strategy(1, 40)) {
        let fixture = TestManager::memory();
        let mut current: BTreeMap<String, i32> = BTreeMap::new();
        let mut committed = current.clone();

        for op in &ops {
            match op {
                ConfigOperation::Set { key, value: Value::I32(v) } => {
                    fixture.set(key, *v).unwrap();
                    current.insert(key.clone(), *v);
                }
                ConfigOperation::Set { .. } => unreachable!("operations only set i32"),
                ConfigOperation::Delete { key } => {
                    let result = fixture.delete(key);
                    if current.remove(key).is_some() {
                        prop_assert!(result.is_ok());
                    } else {
                        let not_found = matches!(result, Err(ConfigError::NotFound { .. }));
                        prop_assert!(not_found);
                    }
                }
                ConfigOperation::Commit => {
                    fixture.commit().unwrap();
                    committed = current.clone();
                }
            }
        }

        prop_assert_eq!(fixture.reopen(), committed.len());
        for (key, value) in &committed {
            prop_assert_eq!(fixture.get::<i32>(key).unwrap(), *value);
        }
        let backend = fixture.memory_backend().unwrap();
        prop_assert_eq!(backend.record_count(), committed.len());
    }

    #[test]
    fn encryption_is_transparent(value in secret_strategy(), key in key_strategy()) {
        with_manager(|config| {
            config.set_encryption_key(&[0x42; 32], CipherAlgorithm::Aes256Gcm).unwrap();
            match &value {
                Value::Str(s) => config.set_encrypted(&key, s).unwrap(),
                Value::Blob(b) => config.set_blob_encrypted(&key, b).unwrap(),
                _ => unreachable!("secrets are strings or blobs"),
            }
            assert!(config.is_encrypted(&key).unwrap());
            let stored = read_value(config, NamespaceId::DEFAULT, &key, &value);
            assert_eq!(stored, value);
        });
    }

    #[test]
    fn rotation_preserves_plaintext(secrets in prop::collection::vec(secret_strategy(), 1..8)) {
        with_manager(|config| {
            config.set_encryption_key(&[1; 16], CipherAlgorithm::Aes128Gcm).unwrap();
            for (i, value) in secrets.iter().enumerate() {
                let key = format!("secret.{i}");
                match value {
                    Value::Str(s) => config.set_encrypted(&key, s).unwrap(),
                    Value::Blob(b) => config.set_blob_encrypted(&key, b).unwrap(),
                    _ => unreachable!("secrets are strings or blobs"),
                }
            }

            let rotated = config
                .rotate_encryption_key(&[2; 32], CipherAlgorithm::Aes256Gcm)
                .unwrap();
            assert_eq!(rotated, secrets.len());

            for (i, value) in secrets.iter().enumerate() {
                let key = format!("secret.{i}");
                assert_eq!(read_value(config, NamespaceId::DEFAULT, &key, value), *value);
            }
        });
    }
}
