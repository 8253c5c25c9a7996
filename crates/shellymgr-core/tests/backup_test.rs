#![allow(clippy::unwrap_used)]
// Backup capability tests against a file-backed embedded store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use shellymgr_api::Generation;
use shellymgr_core::model::{DeviceStatus, MacAddress, NewDevice};
use shellymgr_core::store::{self, StorageConfig, StorageProvider};

async fn file_store(dir: &std::path::Path) -> Arc<dyn StorageProvider> {
    let config = StorageConfig {
        dsn: format!("sqlite://{}/inventory.db?mode=rwc", dir.display()),
        backup_dir: Some(dir.join("backups")),
        ..Default::default()
    };
    store::connect(&config).await.unwrap()
}

fn device(mac: &str) -> NewDevice {
    NewDevice {
        mac: MacAddress::new(mac).unwrap(),
        ip: "192.0.2.10".parse().unwrap(),
        name: None,
        device_type: "SHSW-25".into(),
        generation: Generation::Gen1,
        firmware: None,
        status: DeviceStatus::Online,
        last_seen: Some(Utc::now()),
        settings: json!({}),
    }
}

#[tokio::test]
async fn create_validate_list_delete_backup() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(dir.path()).await;
    store.add_device(device("68C63A000001")).await.unwrap();

    let backup = store.backup().expect("file-backed store has backups");

    let info = backup.create_backup().await.unwrap();
    assert!(info.size_bytes > 0);
    assert_eq!(info.checksum.len(), 64);

    assert!(backup.validate_backup(&info.name).await.unwrap());

    let listed = backup.list_backups().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, info.name);
    assert_eq!(listed[0].checksum, info.checksum);

    backup.delete_backup(&info.name).await.unwrap();
    assert!(backup.list_backups().await.unwrap().is_empty());
}

#[tokio::test]
async fn tampered_backup_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(dir.path()).await;
    store.add_device(device("68C63A000001")).await.unwrap();

    let backup = store.backup().unwrap();
    let info = backup.create_backup().await.unwrap();

    let path = dir.path().join("backups").join(&info.name);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.push(0xFF);
    std::fs::write(&path, bytes).unwrap();

    assert!(!backup.validate_backup(&info.name).await.unwrap());
}

#[tokio::test]
async fn restore_rolls_back_to_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(dir.path()).await;
    store.add_device(device("68C63A000001")).await.unwrap();

    let info = {
        let backup = store.backup().unwrap();
        backup.create_backup().await.unwrap()
    };

    // Mutate after the snapshot.
    store.add_device(device("68C63A000002")).await.unwrap();
    store
        .get_device_by_mac(&MacAddress::new("68C63A000002").unwrap())
        .await
        .unwrap();

    store.backup().unwrap().restore_backup(&info.name).await.unwrap();

    // Post-snapshot data is gone, pre-snapshot data survives.
    store
        .get_device_by_mac(&MacAddress::new("68C63A000001").unwrap())
        .await
        .unwrap();
    assert!(store
        .get_device_by_mac(&MacAddress::new("68C63A000002").unwrap())
        .await
        .is_err());
}

#[tokio::test]
async fn backup_names_cannot_escape_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(dir.path()).await;
    let backup = store.backup().unwrap();

    assert!(backup.validate_backup("../inventory.db").await.is_err());
    assert!(backup.delete_backup("../../etc/passwd").await.is_err());
}
