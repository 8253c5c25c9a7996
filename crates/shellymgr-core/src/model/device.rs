// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;

use shellymgr_api::Generation;

use super::mac::MacAddress;

/// Device reachability as last observed by the manager.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
}

impl DeviceStatus {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// The core inventory entity.
///
/// The MAC is immutable once created; the IP may change (discovery
/// rewrites it and invalidates the cached client for the old address).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub mac: MacAddress,
    pub ip: IpAddr,
    pub name: Option<String>,
    /// Vendor model string, e.g. `SHSW-25` or `SNSW-001X16EU`.
    pub device_type: String,
    pub generation: Generation,
    pub firmware: Option<String>,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    /// Raw settings blob captured at discovery: model, gen, auth flag
    /// and whatever else the device reported.
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a device (id and timestamps are store-assigned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDevice {
    pub mac: MacAddress,
    pub ip: IpAddr,
    pub name: Option<String>,
    pub device_type: String,
    pub generation: Generation,
    pub firmware: Option<String>,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub settings: Value,
}

/// A device seen broadcasting its factory AP, not yet adopted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ssid: String,
    /// MAC as derived from the SSID suffix: 12 hex digits when the SSID
    /// carries the full address (Gen2 style), 6 when only the suffix is
    /// broadcast. The real MAC is learned at adoption.
    pub mac: String,
    pub model: Option<String>,
    pub generation: Generation,
    /// AP-side address the device serves its admin HTTP on.
    pub ip: IpAddr,
    pub signal_percent: Option<u8>,
    pub first_seen: DateTime<Utc>,
    /// Set when discovery is federated across agents.
    pub agent_id: Option<String>,
}

/// How a discovery result was merged into the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeOutcome {
    /// Unknown MAC, inserted fresh.
    Inserted,
    /// Known MAC at the same IP, `last_seen` refreshed.
    Touched,
    /// Known MAC at a new IP, address rewritten. The cached client for
    /// the old address must be invalidated by the caller.
    Moved { old_ip: IpAddr },
}
