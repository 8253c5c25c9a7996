#![allow(clippy::unwrap_used)]
// Export engine tests: registry behaviour, archive round-trips, the
// gitops layered merge, and the download path guard.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

use shellymgr_api::{Generation, MqttConfig, WifiStaConfig};
use shellymgr_core::export::{
    ArchivePlugin, ExportEngine, ExportFilters, ExportPlugin, ExportRequest, ImportOptions,
    ImportRequest, ImportSource,
};
use shellymgr_core::model::{
    DeviceConfiguration, DeviceStatus, MacAddress, NewDevice, NewTemplate, SyncStatus,
};
use shellymgr_core::store::{self, StorageConfig, StorageProvider};
use shellymgr_core::{CoreError, DeviceConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn memory_store() -> Arc<dyn StorageProvider> {
    let config = StorageConfig {
        dsn: "sqlite::memory:".into(),
        ..Default::default()
    };
    store::connect(&config).await.unwrap()
}

async fn engine_with(store: &Arc<dyn StorageProvider>, dir: &std::path::Path) -> ExportEngine {
    let engine = ExportEngine::new(Arc::clone(store), dir.to_path_buf());
    engine.register_builtins().await.unwrap();
    engine
}

fn sample_config(server: &str) -> DeviceConfig {
    DeviceConfig {
        wifi_sta: Some(WifiStaConfig {
            enabled: true,
            ssid: Some("home".into()),
            ..Default::default()
        }),
        mqtt: Some(MqttConfig {
            enabled: true,
            server: Some(server.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Three devices, two templates, three configurations (eight records).
async fn seed(store: &Arc<dyn StorageProvider>) {
    for (i, mac) in ["68C63A000001", "68C63A000002", "68C63A000003"]
        .iter()
        .enumerate()
    {
        let device = store
            .add_device(NewDevice {
                mac: MacAddress::new(mac).unwrap(),
                ip: format!("192.0.2.{}", i + 1).parse().unwrap(),
                name: Some(format!("device-{i}")),
                device_type: "SHSW-25".into(),
                generation: Generation::Gen1,
                firmware: Some("1.14.0".into()),
                status: DeviceStatus::Online,
                last_seen: Some(Utc::now()),
                settings: json!({"model": "SHSW-25", "gen": 1}),
            })
            .await
            .unwrap();

        store
            .upsert_configuration(&DeviceConfiguration {
                device_id: device.id,
                template_id: None,
                config: sample_config("broker:1883"),
                last_synced: None,
                sync_status: SyncStatus::Pending,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    for name in ["switch-defaults", "plug-defaults"] {
        store
            .add_template(NewTemplate {
                name: name.into(),
                device_type: "SHSW-25".into(),
                generation: 1,
                variables: Vec::new(),
                config: sample_config("${mqtt_host}:1883"),
                is_default: false,
            })
            .await
            .unwrap();
    }
}

fn archive_request() -> ExportRequest {
    ExportRequest {
        plugin: "archive".into(),
        format: "sma".into(),
        filters: ExportFilters::default(),
        options: json!({ "include_secrets": false }),
        requested_by: Some("tests".into()),
    }
}

// ── Registry ────────────────────────────────────────────────────────

#[tokio::test]
async fn builtins_register_exactly_once() {
    let store = memory_store().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&store, dir.path()).await;

    let mut names: Vec<String> = engine.list_plugins().into_iter().map(|p| p.name).collect();
    names.sort();
    assert_eq!(names, ["archive", "gitops", "hosts"]);

    let err = engine.register_plugin(Arc::new(ArchivePlugin)).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }), "got: {err}");
}

#[tokio::test]
async fn unknown_plugin_and_format_are_rejected() {
    let store = memory_store().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&store, dir.path()).await;

    let mut request = archive_request();
    request.plugin = "nope".into();
    assert!(matches!(
        engine.validate_export(&request),
        Err(CoreError::NotFound { .. })
    ));

    let mut request = archive_request();
    request.format = "tarball".into();
    assert!(matches!(
        engine.validate_export(&request),
        Err(CoreError::Validation { .. })
    ));

    let mut request = archive_request();
    request.options = json!({ "compression_level": 99 });
    assert!(matches!(
        engine.validate_export(&request),
        Err(CoreError::Validation { .. })
    ));
}

// ── Archive round trip ──────────────────────────────────────────────

#[tokio::test]
async fn archive_export_then_dry_run_import_reports_zero_changes() {
    let store = memory_store().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&store, dir.path()).await;
    seed(&store).await;

    let result = engine.export(&archive_request()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.record_count, 8);

    let path = result.output_path.clone().unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() as u64, result.file_size);

    // The reported checksum covers the artifact bytes.
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    assert_eq!(result.checksum, hex::encode(hasher.finalize()));

    // Same inventory in, dry-run back: nothing to change.
    let import = engine
        .import(&ImportRequest {
            plugin: "archive".into(),
            format: "sma".into(),
            source: ImportSource::Bytes(bytes),
            options: ImportOptions {
                dry_run: true,
                ..Default::default()
            },
            plugin_options: json!({}),
            requested_by: Some("tests".into()),
        })
        .await
        .unwrap();

    assert!(import.success);
    assert!(import.errors.is_empty());
    assert!(
        import.changes.is_empty(),
        "unchanged inventory must yield an empty change set, got {:?}",
        import.changes
    );
    assert_eq!(import.records_skipped, 8);
}

#[tokio::test]
async fn archive_import_populates_an_empty_inventory() {
    let source_store = memory_store().await;
    let dir = tempfile::tempdir().unwrap();
    let source_engine = engine_with(&source_store, dir.path()).await;
    seed(&source_store).await;

    let exported = source_engine.export(&archive_request()).await.unwrap();
    let bytes = std::fs::read(exported.output_path.unwrap()).unwrap();

    // Fresh inventory on the receiving side.
    let target_store = memory_store().await;
    let target_dir = tempfile::tempdir().unwrap();
    let target_engine = engine_with(&target_store, target_dir.path()).await;

    let import = target_engine
        .import(&ImportRequest {
            plugin: "archive".into(),
            format: "sma".into(),
            source: ImportSource::Bytes(bytes),
            options: ImportOptions::default(),
            plugin_options: json!({}),
            requested_by: Some("tests".into()),
        })
        .await
        .unwrap();

    assert!(import.success);
    assert_eq!(import.records_imported, 8);
    assert_eq!(import.records_skipped, 0);

    let device = target_store
        .get_device_by_mac(&MacAddress::new("68C63A000002").unwrap())
        .await
        .unwrap();
    assert_eq!(device.device_type, "SHSW-25");

    let config = target_store.get_configuration(device.id).await.unwrap();
    assert_eq!(
        config.config.mqtt.unwrap().server.as_deref(),
        Some("broker:1883")
    );

    target_store
        .get_template_by_name("switch-defaults")
        .await
        .unwrap();
}

#[tokio::test]
async fn export_redacts_secrets_by_default() {
    let store = memory_store().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&store, dir.path()).await;

    let device = store
        .add_device(NewDevice {
            mac: MacAddress::new("68C63A000009").unwrap(),
            ip: "192.0.2.9".parse().unwrap(),
            name: None,
            device_type: "SHSW-25".into(),
            generation: Generation::Gen1,
            firmware: None,
            status: DeviceStatus::Online,
            last_seen: None,
            settings: json!({}),
        })
        .await
        .unwrap();

    let mut config = sample_config("broker:1883");
    config.wifi_sta.as_mut().unwrap().password = Some("super-secret".into());
    store
        .upsert_configuration(&DeviceConfiguration {
            device_id: device.id,
            template_id: None,
            config,
            last_synced: None,
            sync_status: SyncStatus::Pending,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let result = engine.export(&archive_request()).await.unwrap();
    let bytes = std::fs::read(result.output_path.unwrap()).unwrap();

    // Parse the bundle back through the plugin and check the password
    // never made it into the artifact.
    let payload = ArchivePlugin
        .import(&ImportSource::Bytes(bytes), &json!({}))
        .await
        .unwrap();
    assert_eq!(
        payload.configurations[0]
            .config
            .wifi_sta
            .as_ref()
            .unwrap()
            .password,
        None
    );
}

// ── History & download guard ────────────────────────────────────────

#[tokio::test]
async fn every_export_leaves_a_history_row() {
    let store = memory_store().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&store, dir.path()).await;
    seed(&store).await;

    let result = engine.export(&archive_request()).await.unwrap();

    let history = store
        .list_export_history(shellymgr_core::model::PageRequest::default())
        .await
        .unwrap();
    assert_eq!(history.items.len(), 1);
    assert_eq!(history.items[0].id, result.export_id);
    assert!(history.items[0].success);
    assert_eq!(history.items[0].record_count, 8);
}

#[tokio::test]
async fn download_guard_refuses_traversal() {
    let store = memory_store().await;
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("exports");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(dir.path().join("secret.txt"), "keep out").unwrap();
    std::fs::write(base.join("ok.sma"), "fine").unwrap();

    let engine = engine_with(&store, &base).await;

    assert!(engine.resolve_download("ok.sma").is_ok());
    let err = engine.resolve_download("../secret.txt").unwrap_err();
    assert!(
        matches!(err, CoreError::Validation { .. } | CoreError::NotFound { .. }),
        "got: {err}"
    );
    // Whatever the error class, the file is never resolved.
    assert!(engine.resolve_download("../secret.txt").is_err());
}
