// ── Configuration domain types ──
//
// Templates are parameterised config skeletons; a DeviceConfiguration is
// the merged, desired state for one device. Drift reports capture where
// the live device disagrees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shellymgr_api::DeviceConfig;

/// A parameterised configuration skeleton keyed by device type and
/// generation. Variables use `${name}` placeholders inside string fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationTemplate {
    pub id: i64,
    pub name: String,
    pub device_type: String,
    pub generation: u8,
    /// Names the template expects to be substituted.
    pub variables: Vec<String>,
    pub config: DeviceConfig,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub device_type: String,
    pub generation: u8,
    #[serde(default)]
    pub variables: Vec<String>,
    pub config: DeviceConfig,
    #[serde(default)]
    pub is_default: bool,
}

/// Sync state of a stored configuration relative to the live device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InSync,
    Drifted,
    Failed,
}

/// The desired configuration for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub device_id: i64,
    pub template_id: Option<i64>,
    pub config: DeviceConfig,
    pub last_synced: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub updated_at: DateTime<Utc>,
}

/// Field class driving drift severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DriftSeverity {
    /// Credentials and access control.
    Auth,
    /// Addressing and connectivity.
    Network,
    /// Reporting-only settings.
    Telemetry,
}

/// One field-level disagreement between stored and live configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEntry {
    /// Dotted path, e.g. `mqtt.server`.
    pub path: String,
    pub expected: String,
    pub observed: String,
    pub severity: DriftSeverity,
}

/// A structured diff between stored and live configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub device_id: i64,
    pub policy: String,
    pub entries: Vec<DriftEntry>,
    pub detected_at: DateTime<Utc>,
}

impl DriftReport {
    pub fn in_sync(&self) -> bool {
        self.entries.is_empty()
    }
}
