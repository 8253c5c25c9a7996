#![allow(clippy::unwrap_used)]
// Inventory store tests against the embedded in-memory backend.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use shellymgr_api::Generation;
use shellymgr_core::model::{
    DeviceConfiguration, DeviceStatus, DriftEntry, DriftReport, DriftSeverity, ExportRecord,
    MacAddress, MergeOutcome, NewDevice, NewTemplate, PageRequest, SyncStatus,
};
use shellymgr_core::store::{
    self, DeviceFilter, DeviceSort, StorageConfig, StorageProvider,
};
use shellymgr_core::{CoreError, DeviceConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn memory_store() -> Arc<dyn StorageProvider> {
    let config = StorageConfig {
        dsn: "sqlite::memory:".into(),
        ..Default::default()
    };
    store::connect(&config).await.unwrap()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn new_device(mac: &str, addr: &str) -> NewDevice {
    NewDevice {
        mac: MacAddress::new(mac).unwrap(),
        ip: ip(addr),
        name: None,
        device_type: "SHSW-25".into(),
        generation: Generation::Gen1,
        firmware: Some("1.14.0".into()),
        status: DeviceStatus::Online,
        last_seen: Some(Utc::now()),
        settings: json!({"model": "SHSW-25", "gen": 1, "auth": false}),
    }
}

fn new_template(name: &str) -> NewTemplate {
    NewTemplate {
        name: name.into(),
        device_type: "SHSW-25".into(),
        generation: 1,
        variables: vec!["mqtt_host".into()],
        config: DeviceConfig::default(),
        is_default: false,
    }
}

// ── Migrations ──────────────────────────────────────────────────────

#[tokio::test]
async fn migrations_are_idempotent() {
    let store = memory_store().await;
    // connect() already migrated once; running again must be a no-op.
    store.migrate().await.unwrap();
    store.migrate().await.unwrap();
    store.ping().await.unwrap();
}

// ── Device CRUD ─────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_fetch_device() {
    let store = memory_store().await;
    let created = store.add_device(new_device("68C63A123456", "192.0.2.10")).await.unwrap();
    assert!(created.id > 0);

    let by_mac = store
        .get_device_by_mac(&MacAddress::new("68:c6:3a:12:34:56").unwrap())
        .await
        .unwrap();
    assert_eq!(by_mac.id, created.id);
    assert_eq!(by_mac.mac.as_str(), "68C63A123456");
    assert_eq!(by_mac.device_type, "SHSW-25");
    assert!(by_mac.status.is_online());

    let by_ip = store.get_device_by_ip(ip("192.0.2.10")).await.unwrap();
    assert_eq!(by_ip.id, created.id);
}

#[tokio::test]
async fn duplicate_mac_is_a_conflict() {
    let store = memory_store().await;
    store.add_device(new_device("68C63A123456", "192.0.2.10")).await.unwrap();
    let err = store
        .add_device(new_device("68C63A123456", "192.0.2.11"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }), "got: {err}");
}

#[tokio::test]
async fn missing_device_is_typed_not_found() {
    let store = memory_store().await;
    let err = store.get_device(4711).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }), "got: {err}");
}

#[tokio::test]
async fn update_preserves_mac() {
    let store = memory_store().await;
    let mut device = store.add_device(new_device("68C63A123456", "192.0.2.10")).await.unwrap();

    device.name = Some("kitchen".into());
    device.ip = ip("192.0.2.20");
    device.status = DeviceStatus::Offline;
    store.update_device(&device).await.unwrap();

    let reloaded = store.get_device(device.id).await.unwrap();
    assert_eq!(reloaded.name.as_deref(), Some("kitchen"));
    assert_eq!(reloaded.ip, ip("192.0.2.20"));
    assert_eq!(reloaded.status, DeviceStatus::Offline);
    assert_eq!(reloaded.mac.as_str(), "68C63A123456");
}

#[tokio::test]
async fn list_devices_filters_and_pages() {
    let store = memory_store().await;
    for i in 1..=5 {
        let mut device = new_device(&format!("68C63A12345{i}"), &format!("192.0.2.{i}"));
        device.name = Some(format!("device-{i}"));
        if i > 3 {
            device.status = DeviceStatus::Offline;
        }
        store.add_device(device).await.unwrap();
    }

    let online = store
        .list_devices(
            PageRequest::default(),
            &DeviceFilter {
                status: Some(DeviceStatus::Online),
                ..Default::default()
            },
            DeviceSort::Id,
        )
        .await
        .unwrap();
    assert_eq!(online.items.len(), 3);
    assert_eq!(online.meta.total_items, 3);

    let page = store
        .list_devices(
            PageRequest { page: 2, page_size: 2 },
            &DeviceFilter::default(),
            DeviceSort::Mac,
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.meta.total_items, 5);
    assert_eq!(page.meta.total_pages, 3);
    assert!(page.meta.has_next);
    assert!(page.meta.has_prev);

    let search = store
        .list_devices(
            PageRequest::default(),
            &DeviceFilter {
                name_contains: Some("device-2".into()),
                ..Default::default()
            },
            DeviceSort::Id,
        )
        .await
        .unwrap();
    assert_eq!(search.items.len(), 1);
}

#[tokio::test]
async fn delete_cascades_configuration_and_drift() {
    let store = memory_store().await;
    let device = store.add_device(new_device("68C63A123456", "192.0.2.10")).await.unwrap();

    store
        .upsert_configuration(&DeviceConfiguration {
            device_id: device.id,
            template_id: None,
            config: DeviceConfig::default(),
            last_synced: None,
            sync_status: SyncStatus::Pending,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    store
        .save_drift_report(&DriftReport {
            device_id: device.id,
            policy: "moderate".into(),
            entries: vec![DriftEntry {
                path: "mqtt.server".into(),
                expected: "a".into(),
                observed: "b".into(),
                severity: DriftSeverity::Network,
            }],
            detected_at: Utc::now(),
        })
        .await
        .unwrap();

    store.delete_device(device.id).await.unwrap();

    assert!(matches!(
        store.get_configuration(device.id).await.unwrap_err(),
        CoreError::NotFound { .. }
    ));
    assert!(matches!(
        store.get_drift_report(device.id).await.unwrap_err(),
        CoreError::NotFound { .. }
    ));
    assert!(matches!(
        store.get_device(device.id).await.unwrap_err(),
        CoreError::NotFound { .. }
    ));
}

// ── Discovery merge ─────────────────────────────────────────────────

#[tokio::test]
async fn upsert_discovered_inserts_touches_and_moves() {
    let store = memory_store().await;

    let (device, outcome) = store
        .upsert_discovered(new_device("68C63A123456", "192.0.2.10"))
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Inserted);

    let (_, outcome) = store
        .upsert_discovered(new_device("68C63A123456", "192.0.2.10"))
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Touched);

    let (moved, outcome) = store
        .upsert_discovered(new_device("68C63A123456", "192.0.2.11"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::Moved {
            old_ip: ip("192.0.2.10")
        }
    );
    assert_eq!(moved.id, device.id, "merge must not duplicate the MAC");
    assert_eq!(moved.ip, ip("192.0.2.11"));

    // Exactly one row for the MAC.
    let all = store
        .list_devices(PageRequest::default(), &DeviceFilter::default(), DeviceSort::Id)
        .await
        .unwrap();
    assert_eq!(all.meta.total_items, 1);
}

// ── Templates ───────────────────────────────────────────────────────

#[tokio::test]
async fn template_crud_and_conflict() {
    let store = memory_store().await;
    let template = store.add_template(new_template("plug-defaults")).await.unwrap();
    assert!(template.id > 0);

    let err = store.add_template(new_template("plug-defaults")).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));

    let by_name = store.get_template_by_name("plug-defaults").await.unwrap();
    assert_eq!(by_name.id, template.id);
    assert_eq!(by_name.variables, vec!["mqtt_host".to_owned()]);

    let mut updated = by_name.clone();
    updated.is_default = true;
    store.update_template(&updated).await.unwrap();
    assert!(store.get_template(template.id).await.unwrap().is_default);

    store.delete_template(template.id).await.unwrap();
    assert!(matches!(
        store.get_template(template.id).await.unwrap_err(),
        CoreError::NotFound { .. }
    ));
}

#[tokio::test]
async fn deleting_template_detaches_configurations() {
    let store = memory_store().await;
    let device = store.add_device(new_device("68C63A123456", "192.0.2.10")).await.unwrap();
    let template = store.add_template(new_template("plug-defaults")).await.unwrap();

    store
        .upsert_configuration(&DeviceConfiguration {
            device_id: device.id,
            template_id: Some(template.id),
            config: DeviceConfig::default(),
            last_synced: None,
            sync_status: SyncStatus::Pending,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    store.delete_template(template.id).await.unwrap();

    let config = store.get_configuration(device.id).await.unwrap();
    assert_eq!(config.template_id, None, "template reference must be cleared");
}

// ── Configurations ──────────────────────────────────────────────────

#[tokio::test]
async fn configuration_requires_existing_device() {
    let store = memory_store().await;
    let err = store
        .upsert_configuration(&DeviceConfiguration {
            device_id: 999,
            template_id: None,
            config: DeviceConfig::default(),
            last_synced: None,
            sync_status: SyncStatus::Pending,
            updated_at: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn sync_status_round_trip() {
    let store = memory_store().await;
    let device = store.add_device(new_device("68C63A123456", "192.0.2.10")).await.unwrap();

    store
        .upsert_configuration(&DeviceConfiguration {
            device_id: device.id,
            template_id: None,
            config: DeviceConfig::default(),
            last_synced: None,
            sync_status: SyncStatus::Pending,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    store
        .set_sync_status(device.id, SyncStatus::Drifted, Some(Utc::now()))
        .await
        .unwrap();

    let config = store.get_configuration(device.id).await.unwrap();
    assert_eq!(config.sync_status, SyncStatus::Drifted);
    assert!(config.last_synced.is_some());
}

// ── History ─────────────────────────────────────────────────────────

#[tokio::test]
async fn export_history_records_and_clears() {
    let store = memory_store().await;
    store
        .record_export(&ExportRecord {
            id: "11111111-2222-3333-4444-555555555555".into(),
            plugin: "archive".into(),
            format: "sma".into(),
            requested_by: Some("tests".into()),
            success: true,
            record_count: 8,
            file_size: Some(1024),
            duration_ms: 12,
            error: None,
            request: json!({"plugin": "archive"}),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let page = store.list_export_history(PageRequest::default()).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].plugin, "archive");
    assert_eq!(page.items[0].record_count, 8);

    let removed = store.delete_history().await.unwrap();
    assert_eq!(removed, 1);
    assert!(store
        .list_export_history(PageRequest::default())
        .await
        .unwrap()
        .items
        .is_empty());
}

// ── Stats & health ──────────────────────────────────────────────────

#[tokio::test]
async fn stats_and_health_report() {
    let store = memory_store().await;
    store.add_device(new_device("68C63A123456", "192.0.2.10")).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.backend, "sqlite");
    assert!(!stats.version.is_empty());
    assert!(stats.total_queries > 0);
    assert_eq!(stats.failed_queries, 0);

    let health = store.health_check().await;
    assert!(health.healthy);
    assert!(health.error.is_none());
    assert_eq!(health.details["backend"], "sqlite");
}

// ── Backup capability gating ────────────────────────────────────────

#[tokio::test]
async fn memory_backend_has_no_backup_capability() {
    let store = memory_store().await;
    assert!(store.backup().is_none());
}
