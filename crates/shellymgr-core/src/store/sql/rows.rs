// ── Row mapping ──
//
// Timestamps persist as RFC 3339 text and JSON blobs as text so one SQL
// surface serves all three backends (the Any driver does not decode
// chrono or JSON types).

use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;

use shellymgr_api::Generation;

use crate::error::CoreError;
use crate::model::{
    ConfigurationTemplate, Device, DeviceConfiguration, DeviceStatus, DiscoveredDevice,
    DriftReport, ExportRecord, ImportRecord, MacAddress, SyncStatus,
};

pub(super) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub(super) fn opt_ts(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(ts)
}

pub(super) fn parse_ts(s: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::Storage {
            message: format!("corrupt timestamp {s:?}: {e}"),
        })
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, CoreError> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_ip(s: &str) -> Result<IpAddr, CoreError> {
    s.parse().map_err(|_| CoreError::Storage {
        message: format!("corrupt IP address {s:?}"),
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, CoreError> {
    serde_json::from_str(s).map_err(|e| CoreError::Storage {
        message: format!("corrupt {what} JSON: {e}"),
    })
}

pub(super) fn device(row: &AnyRow) -> Result<Device, CoreError> {
    let mac: String = row.try_get("mac")?;
    let ip: String = row.try_get("ip")?;
    let status: String = row.try_get("status")?;
    let settings: String = row.try_get("settings")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Device {
        id: row.try_get("id")?,
        mac: MacAddress::new(&mac)?,
        ip: parse_ip(&ip)?,
        name: row.try_get("name")?,
        device_type: row.try_get("device_type")?,
        generation: Generation::from_number(row.try_get::<i64, _>("generation")? as u8),
        firmware: row.try_get("firmware")?,
        status: DeviceStatus::from_str(&status).unwrap_or(DeviceStatus::Unknown),
        last_seen: parse_opt_ts(row.try_get("last_seen")?)?,
        settings: parse_json(&settings, "device settings")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub(super) fn template(row: &AnyRow) -> Result<ConfigurationTemplate, CoreError> {
    let variables: String = row.try_get("variables")?;
    let config: String = row.try_get("config")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ConfigurationTemplate {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        device_type: row.try_get("device_type")?,
        generation: row.try_get::<i64, _>("generation")? as u8,
        variables: parse_json(&variables, "template variables")?,
        config: parse_json(&config, "template config")?,
        is_default: row.try_get::<i64, _>("is_default")? != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub(super) fn configuration(row: &AnyRow) -> Result<DeviceConfiguration, CoreError> {
    let config: String = row.try_get("config")?;
    let sync_status: String = row.try_get("sync_status")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(DeviceConfiguration {
        device_id: row.try_get("device_id")?,
        template_id: row.try_get("template_id")?,
        config: parse_json(&config, "device configuration")?,
        last_synced: parse_opt_ts(row.try_get("last_synced")?)?,
        sync_status: SyncStatus::from_str(&sync_status).unwrap_or(SyncStatus::Pending),
        updated_at: parse_ts(&updated_at)?,
    })
}

pub(super) fn drift_report(row: &AnyRow) -> Result<DriftReport, CoreError> {
    let entries: String = row.try_get("entries")?;
    let detected_at: String = row.try_get("detected_at")?;

    Ok(DriftReport {
        device_id: row.try_get("device_id")?,
        policy: row.try_get("policy")?,
        entries: parse_json(&entries, "drift entries")?,
        detected_at: parse_ts(&detected_at)?,
    })
}

pub(super) fn discovered(row: &AnyRow) -> Result<DiscoveredDevice, CoreError> {
    let ip: String = row.try_get("ip")?;
    let first_seen: String = row.try_get("first_seen")?;

    Ok(DiscoveredDevice {
        ssid: row.try_get("ssid")?,
        mac: row.try_get("mac")?,
        model: row.try_get("model")?,
        generation: Generation::from_number(row.try_get::<i64, _>("generation")? as u8),
        ip: parse_ip(&ip)?,
        signal_percent: row
            .try_get::<Option<i64>, _>("signal_percent")?
            .map(|s| s.clamp(0, 100) as u8),
        first_seen: parse_ts(&first_seen)?,
        agent_id: row.try_get("agent_id")?,
    })
}

pub(super) fn export_record(row: &AnyRow) -> Result<ExportRecord, CoreError> {
    let request: String = row.try_get("request")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ExportRecord {
        id: row.try_get("id")?,
        plugin: row.try_get("plugin")?,
        format: row.try_get("format")?,
        requested_by: row.try_get("requested_by")?,
        success: row.try_get::<i64, _>("success")? != 0,
        record_count: row.try_get::<i64, _>("record_count")?.max(0) as u64,
        file_size: row
            .try_get::<Option<i64>, _>("file_size")?
            .map(|s| s.max(0) as u64),
        duration_ms: row.try_get::<i64, _>("duration_ms")?.max(0) as u64,
        error: row.try_get("error")?,
        request: parse_json(&request, "export request")?,
        created_at: parse_ts(&created_at)?,
    })
}

pub(super) fn import_record(row: &AnyRow) -> Result<ImportRecord, CoreError> {
    let request: String = row.try_get("request")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ImportRecord {
        id: row.try_get("id")?,
        plugin: row.try_get("plugin")?,
        format: row.try_get("format")?,
        requested_by: row.try_get("requested_by")?,
        success: row.try_get::<i64, _>("success")? != 0,
        records_imported: row.try_get::<i64, _>("records_imported")?.max(0) as u64,
        records_skipped: row.try_get::<i64, _>("records_skipped")?.max(0) as u64,
        duration_ms: row.try_get::<i64, _>("duration_ms")?.max(0) as u64,
        error: row.try_get("error")?,
        request: parse_json(&request, "import request")?,
        created_at: parse_ts(&created_at)?,
    })
}
