// ── Inventory store ──
//
// A provider abstraction hides the concrete storage backend: an embedded
// single-file SQLite store, or networked PostgreSQL/MySQL engines. One
// SQL implementation serves all three through sqlx's Any driver; the
// backend is classified from the DSN scheme and drives pool sizing,
// pragmas, and dialect quirks.

mod backend;
mod migrations;
mod sql;

pub use backend::Backend;
pub use sql::SqlStore;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::model::{
    ConfigurationTemplate, Device, DeviceConfiguration, DeviceStatus, DiscoveredDevice,
    DriftReport, ExportRecord, ImportRecord, MacAddress, MergeOutcome, NewDevice, NewTemplate,
    Page, PageRequest, SyncStatus,
};

/// Environment flag that forces in-memory semantics regardless of the
/// configured DSN. The test suite depends on this contract.
pub const TEST_MODE_ENV: &str = "SHELLY_TEST_MODE";

// ── Configuration ───────────────────────────────────────────────────

/// Storage configuration, resolved from config file + env.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// `sqlite:shellymgr.db`, `postgres://...`, or `mysql://...`.
    pub dsn: String,
    /// Overrides the backend-class default pool size.
    pub max_connections: Option<u32>,
    /// Queries slower than this are counted in stats.
    pub slow_query_threshold: Duration,
    /// Directory for embedded-backend backups.
    pub backup_dir: Option<PathBuf>,
    /// Force in-memory semantics (also triggered by [`TEST_MODE_ENV`]).
    pub test_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite:shellymgr.db?mode=rwc".into(),
            max_connections: None,
            slow_query_threshold: Duration::from_millis(500),
            backup_dir: None,
            test_mode: false,
        }
    }
}

// ── Observability types ─────────────────────────────────────────────

/// Pool and query statistics reported by `GetStats`.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub backend: &'static str,
    pub version: String,
    pub open_connections: u32,
    pub idle_connections: u32,
    pub in_use_connections: u32,
    pub total_queries: u64,
    pub slow_queries: u64,
    pub failed_queries: u64,
    pub avg_latency_ms: f64,
    pub database_size_bytes: Option<u64>,
}

/// Combined ping + stats + size probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub response_time_ms: u64,
    pub details: Value,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Listing filters ─────────────────────────────────────────────────

/// Device listing filter; all fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub status: Option<DeviceStatus>,
    pub device_type: Option<String>,
    pub generation: Option<u8>,
    pub name_contains: Option<String>,
    pub last_seen_after: Option<DateTime<Utc>>,
}

/// Device listing sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceSort {
    #[default]
    Id,
    Name,
    Ip,
    Mac,
    LastSeen,
}

// ── Snapshot & import batch ─────────────────────────────────────────

/// Consistent snapshot used by the export pipeline; loaded inside one
/// transaction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub devices: Vec<Device>,
    pub templates: Vec<ConfigurationTemplate>,
    pub configurations: Vec<DeviceConfiguration>,
}

impl Snapshot {
    pub fn record_count(&self) -> u64 {
        (self.devices.len() + self.templates.len() + self.configurations.len()) as u64
    }
}

/// Staged writes applied by the import pipeline in a single transaction.
/// Configurations are keyed by MAC because imported data predates ids.
#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    pub devices: Vec<NewDevice>,
    pub templates: Vec<NewTemplate>,
    pub configurations: Vec<(MacAddress, shellymgr_api::DeviceConfig)>,
    /// Overwrite existing rows instead of skipping them.
    pub force_overwrite: bool,
}

/// Outcome counts of an applied import batch.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImportCounts {
    pub imported: u64,
    pub skipped: u64,
}

// ── Provider contract ───────────────────────────────────────────────

/// The storage provider contract. One implementation per backend class;
/// all of them hide behind `Arc<dyn StorageProvider>`.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    // ── Lifecycle ────────────────────────────────────────────────────
    /// Liveness check, bounded at 5 s.
    async fn ping(&self) -> Result<(), CoreError>;
    /// Forward-only, idempotent schema migration.
    async fn migrate(&self) -> Result<(), CoreError>;
    /// Tear down cleanly.
    async fn close(&self);
    async fn stats(&self) -> Result<StorageStats, CoreError>;
    async fn health_check(&self) -> HealthReport;

    // ── Devices ──────────────────────────────────────────────────────
    async fn add_device(&self, new: NewDevice) -> Result<Device, CoreError>;
    async fn get_device(&self, id: i64) -> Result<Device, CoreError>;
    async fn get_device_by_mac(&self, mac: &MacAddress) -> Result<Device, CoreError>;
    async fn get_device_by_ip(&self, ip: IpAddr) -> Result<Device, CoreError>;
    async fn update_device(&self, device: &Device) -> Result<(), CoreError>;
    async fn list_devices(
        &self,
        page: PageRequest,
        filter: &DeviceFilter,
        sort: DeviceSort,
    ) -> Result<Page<Device>, CoreError>;
    /// Removes dependent configurations and drift reports with the device.
    async fn delete_device(&self, id: i64) -> Result<(), CoreError>;
    /// Transactional merge-by-MAC used by discovery: insert unknown MACs,
    /// touch `last_seen` at the same IP, rewrite the IP otherwise.
    async fn upsert_discovered(&self, new: NewDevice) -> Result<(Device, MergeOutcome), CoreError>;

    // ── Templates ────────────────────────────────────────────────────
    async fn add_template(&self, new: NewTemplate) -> Result<ConfigurationTemplate, CoreError>;
    async fn get_template(&self, id: i64) -> Result<ConfigurationTemplate, CoreError>;
    async fn get_template_by_name(&self, name: &str) -> Result<ConfigurationTemplate, CoreError>;
    async fn update_template(&self, template: &ConfigurationTemplate) -> Result<(), CoreError>;
    async fn list_templates(&self, page: PageRequest)
        -> Result<Page<ConfigurationTemplate>, CoreError>;
    async fn delete_template(&self, id: i64) -> Result<(), CoreError>;

    // ── Device configurations ────────────────────────────────────────
    async fn upsert_configuration(
        &self,
        config: &DeviceConfiguration,
    ) -> Result<(), CoreError>;
    async fn get_configuration(&self, device_id: i64) -> Result<DeviceConfiguration, CoreError>;
    async fn list_configurations(
        &self,
        page: PageRequest,
    ) -> Result<Page<DeviceConfiguration>, CoreError>;
    async fn set_sync_status(
        &self,
        device_id: i64,
        status: SyncStatus,
        last_synced: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;
    async fn delete_configuration(&self, device_id: i64) -> Result<(), CoreError>;

    // ── Drift reports ────────────────────────────────────────────────
    async fn save_drift_report(&self, report: &DriftReport) -> Result<(), CoreError>;
    async fn get_drift_report(&self, device_id: i64) -> Result<DriftReport, CoreError>;
    async fn list_drift_reports(&self, page: PageRequest) -> Result<Page<DriftReport>, CoreError>;

    // ── AP-mode discoveries ──────────────────────────────────────────
    async fn upsert_ap_device(&self, device: &DiscoveredDevice) -> Result<(), CoreError>;
    async fn list_ap_devices(&self) -> Result<Vec<DiscoveredDevice>, CoreError>;
    async fn clear_ap_devices(&self) -> Result<(), CoreError>;

    // ── Export pipeline support ──────────────────────────────────────
    /// Load a consistent snapshot inside one transaction.
    async fn load_snapshot(&self) -> Result<Snapshot, CoreError>;
    /// Apply an import batch inside one transaction; any failure rolls
    /// the whole batch back.
    async fn apply_import(&self, batch: &ImportBatch) -> Result<ImportCounts, CoreError>;

    // ── History ──────────────────────────────────────────────────────
    async fn record_export(&self, record: &ExportRecord) -> Result<(), CoreError>;
    async fn record_import(&self, record: &ImportRecord) -> Result<(), CoreError>;
    async fn list_export_history(&self, page: PageRequest)
        -> Result<Page<ExportRecord>, CoreError>;
    async fn list_import_history(&self, page: PageRequest)
        -> Result<Page<ImportRecord>, CoreError>;
    async fn delete_history(&self) -> Result<u64, CoreError>;

    // ── Optional capabilities ────────────────────────────────────────
    /// Backup support, present on the embedded backend only.
    fn backup(&self) -> Option<&dyn BackupProvider>;
}

/// Metadata for one stored backup.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
}

/// Optional backup capability (embedded backend).
#[async_trait]
pub trait BackupProvider: Send + Sync {
    async fn create_backup(&self) -> Result<BackupInfo, CoreError>;
    async fn restore_backup(&self, name: &str) -> Result<(), CoreError>;
    /// Verify the stored checksum still matches the file.
    async fn validate_backup(&self, name: &str) -> Result<bool, CoreError>;
    async fn list_backups(&self) -> Result<Vec<BackupInfo>, CoreError>;
    async fn delete_backup(&self, name: &str) -> Result<(), CoreError>;
}

/// Connect the provider for `config`, verify the connection, and run
/// migrations.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn StorageProvider>, CoreError> {
    let store = SqlStore::connect(config).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}
