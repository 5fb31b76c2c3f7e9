//! Integration tests for the manager over real backends.

use confstore_core::{
    CipherAlgorithm, Config, ConfigError, ConfigManager, EncryptionKey, EntryFlags, ExportFlags,
    ExportFormat, FileBackend, ImportFlags, NamespaceId, Scope, StorageError,
};
use confstore_testkit::prelude::*;
use std::sync::Arc;
use std::thread;

#[test]
fn file_backend_survives_reopen() {
    init_test_logging();
    let fixture = TestManager::file();
    let (_, motor) = scenarios::populate(&fixture);
    fixture.delete_in(motor, "value").unwrap();
    fixture.commit().unwrap();

    assert_eq!(fixture.reopen(), scenarios::POPULATED_ENTRIES - 1);
    assert_eq!(fixture.get::<String>("name").unwrap(), "sensor-01");
    assert_eq!(fixture.get::<f32>("gain").unwrap(), 0.75);
    assert_eq!(fixture.get::<Vec<u8>>("calib").unwrap(), vec![1, 2, 3, 4]);

    // ids are rebuilt from the records, so look them up again
    let wifi = fixture.namespace_id("wifi").unwrap();
    assert_eq!(fixture.get_in::<u32>(wifi, "channel").unwrap(), 11);
    let motor_again = fixture.namespace_id("motor").unwrap();
    assert!(!fixture.exists_in(motor_again, "value").unwrap());
}

#[test]
fn file_backend_detects_corruption() {
    let fixture = TestManager::file();
    fixture.set("k", 1i32).unwrap();
    fixture.commit().unwrap();
    let path = fixture.path().unwrap().to_path_buf();

    let mut image = std::fs::read(&path).unwrap();
    let middle = image.len() / 2;
    image[middle] ^= 0xFF;
    std::fs::write(&path, &image).unwrap();

    let config = ConfigManager::new();
    config.init(Config::default()).unwrap();
    let result = config.attach_backend(Box::new(FileBackend::new(&path)));
    assert!(matches!(
        result,
        Err(ConfigError::BackendWrite(StorageError::Corrupted(_)))
    ));
}

#[test]
fn encrypted_values_survive_file_reopen() {
    let fixture = TestManager::file();
    let key = EncryptionKey::derive_from_passphrase(
        b"correct horse battery staple",
        b"device-0001",
        CipherAlgorithm::Aes256Gcm,
    )
    .unwrap();
    fixture
        .set_encryption_key(key.as_bytes(), key.algorithm())
        .unwrap();
    fixture.set_encrypted("wifi.psk", "hunter2").unwrap();
    fixture.commit().unwrap();

    let image = std::fs::read(fixture.path().unwrap()).unwrap();
    assert!(!image.windows(7).any(|w| w == b"hunter2"));

    fixture.reopen();
    assert!(matches!(
        fixture.get::<String>("wifi.psk"),
        Err(ConfigError::NoEncryptionKey)
    ));
    fixture
        .set_encryption_key(key.as_bytes(), key.algorithm())
        .unwrap();
    assert_eq!(fixture.get::<String>("wifi.psk").unwrap(), "hunter2");
}

#[test]
fn rotation_persists() {
    let fixture = TestManager::memory();
    fixture
        .set_encryption_key(&[5; 16], CipherAlgorithm::Aes128Gcm)
        .unwrap();
    fixture.set_encrypted("token", "abc").unwrap();
    fixture.commit().unwrap();

    fixture
        .rotate_encryption_key(&[6; 32], CipherAlgorithm::Aes256Gcm)
        .unwrap();
    assert!(fixture.is_dirty().unwrap());
    fixture.commit().unwrap();

    fixture.reopen();
    fixture
        .set_encryption_key(&[6; 32], CipherAlgorithm::Aes256Gcm)
        .unwrap();
    assert_eq!(fixture.get::<String>("token").unwrap(), "abc");
}

#[test]
fn erased_namespace_leaves_backend_on_commit() {
    let fixture = TestManager::memory();
    let (wifi, _) = scenarios::populate(&fixture);
    fixture.commit().unwrap();

    assert_eq!(fixture.erase_namespace("wifi").unwrap(), 2);
    fixture.commit().unwrap();

    let records = fixture.memory_backend().unwrap().snapshot();
    assert!(records.keys().all(|key| !key.starts_with("wifi/")));
    assert_eq!(records.len(), scenarios::POPULATED_ENTRIES - 2);
    assert_eq!(fixture.count(Scope::Namespace(wifi)).unwrap(), 0);
}

#[test]
fn backup_restore_through_export() {
    let source = TestManager::memory();
    scenarios::populate(&source);
    source
        .set_with_flags(
            NamespaceId::DEFAULT,
            "serial",
            "SN-1",
            EntryFlags::DEFAULT | EntryFlags::READ_ONLY,
        )
        .unwrap();

    let size = source
        .export_size(ExportFormat::Binary, Scope::All, ExportFlags::empty())
        .unwrap();
    let mut document = vec![0u8; size];
    source
        .export(ExportFormat::Binary, Scope::All, ExportFlags::empty(), &mut document)
        .unwrap();

    let target = TestManager::file();
    target.set("stale", true).unwrap();
    let report = target
        .import(ExportFormat::Binary, &document, ImportFlags::CLEAR)
        .unwrap();
    assert_eq!(report.applied, scenarios::POPULATED_ENTRIES + 1);
    target.commit().unwrap();

    assert_eq!(target.reopen(), scenarios::POPULATED_ENTRIES + 1);
    assert!(!target.exists("stale").unwrap());
    assert!(matches!(
        target.set("serial", "SN-2"),
        Err(ConfigError::ReadOnly { .. })
    ));
}

#[test]
fn json_document_is_human_readable() {
    with_manager(|config| {
        config.set("app.port", 9000i32).unwrap();
        config.set("gain", f32::INFINITY).unwrap();
        let mut buf = vec![0u8; 1024];
        let len = config
            .export(ExportFormat::Json, Scope::All, ExportFlags::empty(), &mut buf)
            .unwrap();

        let doc: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(
            doc,
            serde_json::json!({
                "default": {
                    "app.port": { "type": "i32", "value": 9000, "flags": ["persistent"] },
                    "gain": { "type": "f32", "value": "inf", "flags": ["persistent"] }
                }
            })
        );
    });
}

#[test]
fn concurrent_writers_are_serialized() {
    let config = Arc::new(ConfigManager::new());
    config.init(Config::default()).unwrap();
    config.set("counter", 0i64).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let config = Arc::clone(&config);
            thread::spawn(move || {
                for i in 0..50 {
                    config.set(&format!("t{t}"), i as i32).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        assert_eq!(config.get::<i32>(&format!("t{t}")).unwrap(), 49);
    }
    assert_eq!(config.count(Scope::All).unwrap(), 5);
}
