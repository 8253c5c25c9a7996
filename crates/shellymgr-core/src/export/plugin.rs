// ── Export plugin contract ──
//
// Plugins declare metadata, a JSON-Schema-style config schema, and
// capabilities; the engine owns filtering, metadata enrichment, secret
// redaction, history, and sinks. Artifact parsing on import returns a
// portable payload the engine diffs against the inventory.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use shellymgr_api::DeviceConfig;

use crate::error::CoreError;
use crate::model::{ConfigurationTemplate, Device, DeviceConfiguration};

// ── Metadata ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PluginCategory {
    Backup,
    Gitops,
    HomeAutomation,
    Networking,
    Monitoring,
    Documentation,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub category: PluginCategory,
    pub supported_formats: Vec<String>,
    pub tags: Vec<String>,
}

// ── Config schema ───────────────────────────────────────────────────

/// One schema property, JSON-Schema flavoured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaProperty {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "enum")]
    pub allowed: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Values that must never appear in logs or history rows.
    #[serde(default)]
    pub sensitive: bool,
}

/// Schema for a plugin's options object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub properties: BTreeMap<String, SchemaProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ConfigSchema {
    /// Validate an options object: required keys, primitive types,
    /// enum membership, numeric bounds.
    pub fn validate(&self, options: &Value) -> Result<(), CoreError> {
        let empty = serde_json::Map::new();
        let object = match options {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(CoreError::validation("options", "expected an object"));
            }
        };

        for key in &self.required {
            if !object.contains_key(key) {
                return Err(CoreError::validation(
                    format!("options.{key}"),
                    "required option missing",
                ));
            }
        }

        for (key, value) in object {
            let Some(property) = self.properties.get(key) else {
                return Err(CoreError::validation(
                    format!("options.{key}"),
                    "unknown option",
                ));
            };

            let type_ok = match property.kind.as_str() {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !type_ok {
                return Err(CoreError::validation(
                    format!("options.{key}"),
                    format!("expected {}", property.kind),
                ));
            }

            if let Some(allowed) = &property.allowed {
                if !allowed.contains(value) {
                    return Err(CoreError::validation(
                        format!("options.{key}"),
                        format!("must be one of {allowed:?}"),
                    ));
                }
            }

            if let Some(n) = value.as_f64() {
                if property.minimum.is_some_and(|min| n < min) {
                    return Err(CoreError::validation(
                        format!("options.{key}"),
                        format!("below minimum {:?}", property.minimum),
                    ));
                }
                if property.maximum.is_some_and(|max| n > max) {
                    return Err(CoreError::validation(
                        format!("options.{key}"),
                        format!("above maximum {:?}", property.maximum),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Strip sensitive option values before they reach history rows.
    pub fn redact(&self, options: &Value) -> Value {
        let Value::Object(map) = options else {
            return options.clone();
        };
        let mut out = serde_json::Map::new();
        for (key, value) in map {
            let sensitive = self.properties.get(key).is_some_and(|p| p.sensitive);
            out.insert(
                key.clone(),
                if sensitive {
                    Value::String("<redacted>".into())
                } else {
                    value.clone()
                },
            );
        }
        Value::Object(out)
    }
}

// ── Capabilities ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSink {
    File,
    Webhook,
    Response,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginCapabilities {
    pub supports_incremental: bool,
    pub supports_scheduling: bool,
    pub requires_auth: bool,
    /// Upper bound on data size the plugin accepts, if any.
    pub max_data_size: Option<u64>,
    pub concurrency_level: u32,
    pub output_sinks: Vec<OutputSink>,
}

impl Default for PluginCapabilities {
    fn default() -> Self {
        Self {
            supports_incremental: false,
            supports_scheduling: false,
            requires_auth: false,
            max_data_size: None,
            concurrency_level: 1,
            output_sinks: vec![OutputSink::File, OutputSink::Response],
        }
    }
}

// ── Requests & data ─────────────────────────────────────────────────

/// Data snapshot filters; all present fields are conjunctive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportFilters {
    #[serde(default)]
    pub device_ids: Vec<i64>,
    #[serde(default)]
    pub device_types: Vec<String>,
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub last_seen_after: Option<DateTime<Utc>>,
    /// Keep only devices that have (or lack) a stored configuration.
    #[serde(default)]
    pub has_configuration: Option<bool>,
    #[serde(default)]
    pub template_ids: Vec<i64>,
    /// Matched against the `tags` array of the device settings blob.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub plugin: String,
    pub format: String,
    #[serde(default)]
    pub filters: ExportFilters,
    /// Plugin options, validated against the plugin's schema.
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// Enriched metadata attached to every export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub export_id: String,
    pub timestamp: DateTime<Utc>,
    pub system_version: String,
    pub total_devices: u64,
    pub total_templates: u64,
    pub total_configurations: u64,
}

/// The filtered snapshot handed to plugins.
#[derive(Debug, Clone, Serialize)]
pub struct ExportData {
    pub devices: Vec<Device>,
    pub templates: Vec<ConfigurationTemplate>,
    pub configurations: Vec<DeviceConfiguration>,
    pub metadata: ExportMetadata,
}

impl ExportData {
    pub fn record_count(&self) -> u64 {
        (self.devices.len() + self.templates.len() + self.configurations.len()) as u64
    }
}

/// What a plugin hands back from `export`.
#[derive(Debug)]
pub enum ExportOutput {
    /// A single artifact the engine writes (or returns) as one file.
    File { bytes: Vec<u8>, filename: String },
    /// A directory tree the plugin wrote itself (GitOps-style).
    Tree { root: PathBuf, files_written: u64, bytes_written: u64 },
}

/// Plugin-level result; `success=false` with no error string is coerced
/// into a framework `PluginError` by the engine.
#[derive(Debug)]
pub struct PluginExportResult {
    pub success: bool,
    pub output: Option<ExportOutput>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PluginExportResult {
    pub fn ok(output: ExportOutput) -> Self {
        Self {
            success: true,
            output: Some(output),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Preview: a sample of the artifact plus a size estimate.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewOutput {
    pub sample: Vec<u8>,
    pub estimated_size: u64,
}

// ── Import side ─────────────────────────────────────────────────────

/// Where import bytes come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ImportSource {
    /// Raw artifact bytes (archive formats).
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    /// A directory root (tree formats).
    Path(PathBuf),
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force_overwrite: bool,
    #[serde(default)]
    pub validate_only: bool,
    #[serde(default)]
    pub backup_before: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub plugin: String,
    pub format: String,
    pub source: ImportSource,
    #[serde(default)]
    pub options: ImportOptions,
    /// Plugin options (same schema as export).
    #[serde(default)]
    pub plugin_options: Value,
    #[serde(default)]
    pub requested_by: Option<String>,
}

// ── Portable payloads ───────────────────────────────────────────────

/// Device as carried inside artifacts (no surrogate ids).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortableDevice {
    pub mac: String,
    pub ip: String,
    #[serde(default)]
    pub name: Option<String>,
    pub device_type: String,
    pub generation: u8,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub settings: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortableTemplate {
    pub name: String,
    pub device_type: String,
    pub generation: u8,
    #[serde(default)]
    pub variables: Vec<String>,
    pub config: DeviceConfig,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortableConfiguration {
    /// References the owning device by MAC.
    pub mac: String,
    #[serde(default)]
    pub template: Option<String>,
    pub config: DeviceConfig,
}

/// Everything a plugin parsed out of an artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportPayload {
    #[serde(default)]
    pub devices: Vec<PortableDevice>,
    #[serde(default)]
    pub templates: Vec<PortableTemplate>,
    #[serde(default)]
    pub configurations: Vec<PortableConfiguration>,
}

// ── Change set ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Skip,
}

/// One staged change reported by a (dry-run or real) import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub resource: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub success: bool,
    pub export_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub record_count: u64,
    pub file_size: u64,
    pub checksum: String,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub success: bool,
    pub records_imported: u64,
    pub records_skipped: u64,
    pub duration_ms: u64,
    pub changes: Vec<ImportChange>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// ── The trait ───────────────────────────────────────────────────────

/// A registered exporter/importer. Implementations are initialised once
/// at registration and cleaned up at engine shutdown.
#[async_trait]
pub trait ExportPlugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;
    fn config_schema(&self) -> ConfigSchema;
    fn capabilities(&self) -> PluginCapabilities;

    /// Called exactly once when the plugin is registered.
    async fn initialize(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Produce the artifact for an enriched, filtered snapshot.
    async fn export(&self, data: &ExportData, options: &Value) -> Result<PluginExportResult, CoreError>;

    /// Produce a sample and a size estimate without writing anything.
    async fn preview(&self, data: &ExportData, options: &Value) -> Result<PreviewOutput, CoreError>;

    /// Parse an artifact back into a portable payload.
    async fn import(&self, source: &ImportSource, options: &Value) -> Result<ImportPayload, CoreError>;

    /// Called at engine shutdown.
    async fn cleanup(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
