// ── Export engine ──
//
// Owns the plugin registry (read-mostly map under an RwLock), the export
// pipeline (snapshot → filter → enrich → redact → plugin → sink), the
// import pipeline (parse → diff → preview/commit), history rows for
// every run, and the path-traversal guard on artifact downloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config_model::{validate, ValidationLevel};
use crate::error::CoreError;
use crate::model::{
    DeviceStatus, ExportRecord, ImportRecord, MacAddress, NewDevice, NewTemplate,
};
use crate::store::{ImportBatch, Snapshot, StorageProvider};

use shellymgr_api::Generation;

use super::archive::ArchivePlugin;
use super::gitops::GitopsPlugin;
use super::hosts::HostsPlugin;
use super::plugin::{
    ChangeType, ExportData, ExportMetadata, ExportOutput, ExportPlugin, ExportRequest,
    ExportResult, ImportChange, ImportPayload, ImportRequest, ImportResult, PluginMetadata,
    PreviewOutput,
};

/// Engine over the plugin registry and both pipelines.
pub struct ExportEngine {
    store: Arc<dyn StorageProvider>,
    registry: RwLock<HashMap<String, Arc<dyn ExportPlugin>>>,
    /// Root for file-sink artifacts; downloads may not escape it.
    base_dir: PathBuf,
    system_version: String,
}

impl ExportEngine {
    pub fn new(store: Arc<dyn StorageProvider>, base_dir: PathBuf) -> Self {
        Self {
            store,
            registry: RwLock::new(HashMap::new()),
            base_dir,
            system_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Register a plugin: names are unique, initialisation runs once.
    pub async fn register_plugin(&self, plugin: Arc<dyn ExportPlugin>) -> Result<(), CoreError> {
        let name = plugin.metadata().name;
        {
            let registry = self.registry.read().expect("plugin registry poisoned");
            if registry.contains_key(&name) {
                return Err(CoreError::Conflict {
                    message: format!("plugin {name:?} is already registered"),
                });
            }
        }

        plugin.initialize().await.map_err(|e| CoreError::Plugin {
            name: name.clone(),
            message: format!("initialisation failed: {e}"),
        })?;

        let mut registry = self.registry.write().expect("plugin registry poisoned");
        if registry.contains_key(&name) {
            return Err(CoreError::Conflict {
                message: format!("plugin {name:?} is already registered"),
            });
        }
        registry.insert(name.clone(), plugin);
        info!(plugin = %name, "registered export plugin");
        Ok(())
    }

    /// Register the built-in plugin set.
    pub async fn register_builtins(&self) -> Result<(), CoreError> {
        self.register_plugin(Arc::new(ArchivePlugin)).await?;
        self.register_plugin(Arc::new(GitopsPlugin)).await?;
        self.register_plugin(Arc::new(HostsPlugin)).await?;
        Ok(())
    }

    pub fn list_plugins(&self) -> Vec<PluginMetadata> {
        self.registry
            .read()
            .expect("plugin registry poisoned")
            .values()
            .map(|p| p.metadata())
            .collect()
    }

    pub fn get_plugin(&self, name: &str) -> Result<Arc<dyn ExportPlugin>, CoreError> {
        self.registry
            .read()
            .expect("plugin registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found("plugin", name))
    }

    /// Tear down every plugin, aggregating failures.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        let plugins: Vec<_> = {
            let mut registry = self.registry.write().expect("plugin registry poisoned");
            registry.drain().collect()
        };
        let mut failures = Vec::new();
        for (name, plugin) in plugins {
            if let Err(err) = plugin.cleanup().await {
                failures.push(format!("{name}: {err}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "plugin cleanup failures: {}",
                failures.join("; ")
            )))
        }
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Plugin exists, format is supported, options pass the schema.
    pub fn validate_export(&self, request: &ExportRequest) -> Result<(), CoreError> {
        let plugin = self.get_plugin(&request.plugin)?;
        let metadata = plugin.metadata();
        if !metadata.supported_formats.iter().any(|f| f == &request.format) {
            return Err(CoreError::validation(
                "format",
                format!(
                    "plugin {:?} supports {:?}, not {:?}",
                    request.plugin, metadata.supported_formats, request.format
                ),
            ));
        }
        plugin.config_schema().validate(&request.options)
    }

    // ── Export pipeline ──────────────────────────────────────────────

    async fn build_data(&self, request: &ExportRequest) -> Result<ExportData, CoreError> {
        let snapshot = self.store.load_snapshot().await?;
        let Snapshot {
            mut devices,
            mut templates,
            mut configurations,
        } = snapshot;

        let filters = &request.filters;
        if !filters.device_ids.is_empty() {
            devices.retain(|d| filters.device_ids.contains(&d.id));
        }
        if !filters.device_types.is_empty() {
            devices.retain(|d| filters.device_types.contains(&d.device_type));
        }
        if !filters.statuses.is_empty() {
            devices.retain(|d| filters.statuses.contains(&d.status.to_string()));
        }
        if let Some(after) = filters.last_seen_after {
            devices.retain(|d| d.last_seen.is_some_and(|seen| seen > after));
        }
        if !filters.tags.is_empty() {
            devices.retain(|d| {
                d.settings
                    .get("tags")
                    .and_then(Value::as_array)
                    .is_some_and(|tags| {
                        filters
                            .tags
                            .iter()
                            .any(|want| tags.iter().any(|t| t.as_str() == Some(want)))
                    })
            });
        }
        if let Some(wants_config) = filters.has_configuration {
            devices.retain(|d| {
                configurations.iter().any(|c| c.device_id == d.id) == wants_config
            });
        }
        if !filters.template_ids.is_empty() {
            templates.retain(|t| filters.template_ids.contains(&t.id));
        }
        configurations.retain(|c| devices.iter().any(|d| d.id == c.device_id));

        // Secrets leave the system only on explicit request.
        let include_secrets = request
            .options
            .get("include_secrets")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !include_secrets {
            for configuration in &mut configurations {
                configuration.config = configuration.config.redacted();
            }
            for template in &mut templates {
                template.config = template.config.redacted();
            }
        }

        let metadata = ExportMetadata {
            export_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            system_version: self.system_version.clone(),
            total_devices: devices.len() as u64,
            total_templates: templates.len() as u64,
            total_configurations: configurations.len() as u64,
        };

        Ok(ExportData {
            devices,
            templates,
            configurations,
            metadata,
        })
    }

    pub async fn export(&self, request: &ExportRequest) -> Result<ExportResult, CoreError> {
        self.validate_export(request)?;
        let plugin = self.get_plugin(&request.plugin)?;
        let started = Instant::now();

        let data = self.build_data(request).await?;
        let export_id = data.metadata.export_id.clone();
        let record_count = data.record_count();
        debug!(plugin = %request.plugin, export_id, record_count, "running export");

        let outcome = plugin.export(&data, &request.options).await;
        let outcome = match outcome {
            Ok(result) if !result.success => {
                // A failure without detail is a framework error.
                let message = if result.errors.is_empty() {
                    "plugin reported failure without an error".to_owned()
                } else {
                    result.errors.join("; ")
                };
                Err(CoreError::Plugin {
                    name: request.plugin.clone(),
                    message,
                })
            }
            Ok(result) => match result.output {
                Some(output) => Ok((output, result.warnings)),
                None => Err(CoreError::Plugin {
                    name: request.plugin.clone(),
                    message: "plugin succeeded but produced no output".into(),
                }),
            },
            Err(err) => Err(err),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok((output, warnings)) => {
                let (output_path, file_size, checksum) = self.sink(&export_id, output).await?;
                let result = ExportResult {
                    success: true,
                    export_id: export_id.clone(),
                    output_path,
                    record_count,
                    file_size,
                    checksum,
                    duration_ms,
                    errors: Vec::new(),
                    warnings,
                };
                self.record_export_history(request, &result, None).await;
                Ok(result)
            }
            Err(err) => {
                let result = ExportResult {
                    success: false,
                    export_id,
                    output_path: None,
                    record_count,
                    file_size: 0,
                    checksum: String::new(),
                    duration_ms,
                    errors: vec![err.to_string()],
                    warnings: Vec::new(),
                };
                self.record_export_history(request, &result, Some(&err)).await;
                Err(err)
            }
        }
    }

    /// Write a file-sink artifact under the base directory; tree outputs
    /// were written by the plugin itself.
    async fn sink(
        &self,
        export_id: &str,
        output: ExportOutput,
    ) -> Result<(Option<PathBuf>, u64, String), CoreError> {
        match output {
            ExportOutput::File { bytes, filename } => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let checksum = hex::encode(hasher.finalize());

                tokio::fs::create_dir_all(&self.base_dir)
                    .await
                    .map_err(|e| CoreError::Storage {
                        message: format!("cannot create export directory: {e}"),
                    })?;
                let path = self.base_dir.join(&filename);
                let size = bytes.len() as u64;
                tokio::fs::write(&path, bytes)
                    .await
                    .map_err(|e| CoreError::Storage {
                        message: format!("cannot write {}: {e}", path.display()),
                    })?;
                debug!(export_id, path = %path.display(), "artifact written");
                Ok((Some(path), size, checksum))
            }
            ExportOutput::Tree {
                root,
                files_written,
                bytes_written,
            } => {
                debug!(export_id, root = %root.display(), files_written, "tree written");
                Ok((Some(root), bytes_written, String::new()))
            }
        }
    }

    pub async fn preview(&self, request: &ExportRequest) -> Result<PreviewOutput, CoreError> {
        self.validate_export(request)?;
        let plugin = self.get_plugin(&request.plugin)?;
        let data = self.build_data(request).await?;
        plugin.preview(&data, &request.options).await
    }

    async fn record_export_history(
        &self,
        request: &ExportRequest,
        result: &ExportResult,
        error: Option<&CoreError>,
    ) {
        let redacted_options = self
            .get_plugin(&request.plugin)
            .map(|p| p.config_schema().redact(&request.options))
            .unwrap_or(Value::Null);
        let record = ExportRecord {
            id: result.export_id.clone(),
            plugin: request.plugin.clone(),
            format: request.format.clone(),
            requested_by: request.requested_by.clone(),
            success: result.success,
            record_count: result.record_count,
            file_size: (result.file_size > 0).then_some(result.file_size),
            duration_ms: result.duration_ms,
            error: error.map(ToString::to_string),
            request: serde_json::json!({
                "plugin": request.plugin,
                "format": request.format,
                "filters": request.filters,
                "options": redacted_options,
            }),
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.record_export(&record).await {
            warn!("failed to record export history: {err}");
        }
    }

    // ── Import pipeline ──────────────────────────────────────────────

    pub async fn import(&self, request: &ImportRequest) -> Result<ImportResult, CoreError> {
        let plugin = self.get_plugin(&request.plugin)?;
        let metadata = plugin.metadata();
        if !metadata.supported_formats.iter().any(|f| f == &request.format) {
            return Err(CoreError::validation(
                "format",
                format!("plugin {:?} does not speak {:?}", request.plugin, request.format),
            ));
        }
        plugin.config_schema().validate(&request.plugin_options)?;

        let started = Instant::now();
        let options = &request.options;

        if options.backup_before && !options.dry_run {
            match self.store.backup() {
                Some(backup) => {
                    backup.create_backup().await?;
                }
                None => warn!("backup_before requested but backend has no backup capability"),
            }
        }

        let payload = plugin
            .import(&request.source, &request.plugin_options)
            .await?;

        // Validate imported configurations before touching anything.
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for configuration in &payload.configurations {
            let report = validate(&configuration.config, ValidationLevel::Basic);
            for field_error in report.errors {
                errors.push(format!(
                    "{}: {} ({})",
                    configuration.mac, field_error.field, field_error.message
                ));
            }
            for warning in report.warnings {
                warnings.push(format!("{}: {}", configuration.mac, warning.message));
            }
        }

        if request.options.validate_only {
            let result = ImportResult {
                success: errors.is_empty(),
                records_imported: 0,
                records_skipped: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                changes: Vec::new(),
                errors,
                warnings,
            };
            self.record_import_history(request, &result).await;
            return Ok(result);
        }

        if !errors.is_empty() {
            let result = ImportResult {
                success: false,
                records_imported: 0,
                records_skipped: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                changes: Vec::new(),
                errors,
                warnings,
            };
            self.record_import_history(request, &result).await;
            return Ok(result);
        }

        let diff = self.diff_changes(&payload, options.force_overwrite).await?;
        let changes = diff.changes;
        let staged = changes
            .iter()
            .filter(|c| c.change_type != ChangeType::Skip)
            .count() as u64;
        let skipped = diff.identical
            + changes
                .iter()
                .filter(|c| c.change_type == ChangeType::Skip)
                .count() as u64;

        if options.dry_run {
            let result = ImportResult {
                success: true,
                records_imported: staged,
                records_skipped: skipped,
                duration_ms: started.elapsed().as_millis() as u64,
                changes,
                errors,
                warnings,
            };
            self.record_import_history(request, &result).await;
            return Ok(result);
        }

        let batch = build_batch(&payload, options.force_overwrite)?;
        let counts = self.store.apply_import(&batch).await?;

        let result = ImportResult {
            success: true,
            records_imported: counts.imported,
            records_skipped: counts.skipped,
            duration_ms: started.elapsed().as_millis() as u64,
            changes,
            errors,
            warnings,
        };
        self.record_import_history(request, &result).await;
        Ok(result)
    }

    /// Diff the parsed payload against the live inventory. Never writes.
    ///
    /// Identical records produce no change entry at all (a round-trip of
    /// an unchanged inventory yields an empty change set); records that
    /// differ produce `Update` entries when overwriting is on and `Skip`
    /// entries when it is off.
    #[allow(clippy::too_many_lines)]
    async fn diff_changes(
        &self,
        payload: &ImportPayload,
        force_overwrite: bool,
    ) -> Result<DiffOutcome, CoreError> {
        let mut changes = Vec::new();
        let mut identical = 0u64;

        for portable in &payload.devices {
            let mac = MacAddress::new(&portable.mac)?;
            match self.store.get_device_by_mac(&mac).await {
                Err(CoreError::NotFound { .. }) => changes.push(ImportChange {
                    change_type: ChangeType::Create,
                    resource: "device".into(),
                    resource_id: portable.mac.clone(),
                    field: None,
                    old: None,
                    new: Some(portable.device_type.clone()),
                }),
                Err(other) => return Err(other),
                Ok(existing) => {
                    let mut fields = Vec::new();
                    if !portable.ip.is_empty() && existing.ip.to_string() != portable.ip {
                        fields.push(("ip", existing.ip.to_string(), portable.ip.clone()));
                    }
                    if existing.name != portable.name {
                        fields.push((
                            "name",
                            existing.name.clone().unwrap_or_default(),
                            portable.name.clone().unwrap_or_default(),
                        ));
                    }
                    if fields.is_empty() {
                        identical += 1;
                    } else {
                        let change_type = if force_overwrite {
                            ChangeType::Update
                        } else {
                            ChangeType::Skip
                        };
                        for (field, old, new) in fields {
                            changes.push(ImportChange {
                                change_type,
                                resource: "device".into(),
                                resource_id: portable.mac.clone(),
                                field: Some(field.into()),
                                old: Some(old),
                                new: Some(new),
                            });
                        }
                    }
                }
            }
        }

        for portable in &payload.templates {
            match self.store.get_template_by_name(&portable.name).await {
                Err(CoreError::NotFound { .. }) => changes.push(ImportChange {
                    change_type: ChangeType::Create,
                    resource: "template".into(),
                    resource_id: portable.name.clone(),
                    field: None,
                    old: None,
                    new: None,
                }),
                Err(other) => return Err(other),
                Ok(existing) => {
                    let same = existing.config.redacted() == portable.config.redacted()
                        && existing.device_type == portable.device_type
                        && existing.is_default == portable.is_default;
                    if same {
                        identical += 1;
                    } else {
                        changes.push(ImportChange {
                            change_type: if force_overwrite {
                                ChangeType::Update
                            } else {
                                ChangeType::Skip
                            },
                            resource: "template".into(),
                            resource_id: portable.name.clone(),
                            field: Some("config".into()),
                            old: None,
                            new: None,
                        });
                    }
                }
            }
        }

        for portable in &payload.configurations {
            let mac = MacAddress::new(&portable.mac)?;
            let device = match self.store.get_device_by_mac(&mac).await {
                Ok(device) => Some(device),
                Err(CoreError::NotFound { .. }) => None,
                Err(other) => return Err(other),
            };
            let Some(device) = device else {
                // The owning device is also in this payload: it gets
                // created first and the configuration follows.
                let creates_device = payload
                    .devices
                    .iter()
                    .any(|d| MacAddress::new(&d.mac).is_ok_and(|m| m == mac));
                changes.push(ImportChange {
                    change_type: if creates_device {
                        ChangeType::Create
                    } else {
                        ChangeType::Skip
                    },
                    resource: "configuration".into(),
                    resource_id: portable.mac.clone(),
                    field: None,
                    old: None,
                    new: None,
                });
                continue;
            };

            match self.store.get_configuration(device.id).await {
                Err(CoreError::NotFound { .. }) => changes.push(ImportChange {
                    change_type: ChangeType::Create,
                    resource: "configuration".into(),
                    resource_id: portable.mac.clone(),
                    field: None,
                    old: None,
                    new: None,
                }),
                Err(other) => return Err(other),
                Ok(existing) => {
                    // Sensitive fields compare as "skip, not drift".
                    let same = existing.config.redacted() == portable.config.redacted();
                    if same {
                        identical += 1;
                    } else {
                        changes.push(ImportChange {
                            change_type: if force_overwrite {
                                ChangeType::Update
                            } else {
                                ChangeType::Skip
                            },
                            resource: "configuration".into(),
                            resource_id: portable.mac.clone(),
                            field: Some("config".into()),
                            old: None,
                            new: None,
                        });
                    }
                }
            }
        }

        Ok(DiffOutcome { changes, identical })
    }

    async fn record_import_history(&self, request: &ImportRequest, result: &ImportResult) {
        let record = ImportRecord {
            id: uuid::Uuid::new_v4().to_string(),
            plugin: request.plugin.clone(),
            format: request.format.clone(),
            requested_by: request.requested_by.clone(),
            success: result.success,
            records_imported: result.records_imported,
            records_skipped: result.records_skipped,
            duration_ms: result.duration_ms,
            error: (!result.errors.is_empty()).then(|| result.errors.join("; ")),
            request: serde_json::json!({
                "plugin": request.plugin,
                "format": request.format,
                "options": request.options,
            }),
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.record_import(&record).await {
            warn!("failed to record import history: {err}");
        }
    }

    // ── Downloads ────────────────────────────────────────────────────

    /// Resolve an artifact name for download, refusing anything outside
    /// the configured base directory.
    pub fn resolve_download(&self, name: &str) -> Result<PathBuf, CoreError> {
        let base = self
            .base_dir
            .canonicalize()
            .map_err(|e| CoreError::Storage {
                message: format!("export directory unavailable: {e}"),
            })?;
        let candidate = base.join(name);
        let resolved = candidate
            .canonicalize()
            .map_err(|_| CoreError::not_found("artifact", name))?;
        if !resolved.starts_with(&base) {
            return Err(CoreError::validation(
                "name",
                "artifact path escapes the export directory",
            ));
        }
        Ok(resolved)
    }
}

/// Outcome of an import diff: visible changes plus the count of records
/// that matched the inventory exactly.
struct DiffOutcome {
    changes: Vec<ImportChange>,
    identical: u64,
}

/// Everything the payload carries, converted for the store transaction.
fn build_batch(payload: &ImportPayload, force_overwrite: bool) -> Result<ImportBatch, CoreError> {
    let mut batch = ImportBatch {
        force_overwrite,
        ..Default::default()
    };

    for device in &payload.devices {
        let ip = if device.ip.is_empty() {
            "0.0.0.0".parse().map_err(|_| CoreError::Internal("unreachable".into()))?
        } else {
            device.ip.parse().map_err(|_| {
                CoreError::validation("ip", format!("{:?} is not an IP address", device.ip))
            })?
        };
        batch.devices.push(NewDevice {
            mac: MacAddress::new(&device.mac)?,
            ip,
            name: device.name.clone(),
            device_type: device.device_type.clone(),
            generation: Generation::from_number(device.generation),
            firmware: device.firmware.clone(),
            status: DeviceStatus::Unknown,
            last_seen: None,
            settings: device.settings.clone(),
        });
    }

    for template in &payload.templates {
        batch.templates.push(NewTemplate {
            name: template.name.clone(),
            device_type: template.device_type.clone(),
            generation: template.generation,
            variables: template.variables.clone(),
            config: template.config.clone(),
            is_default: template.is_default,
        });
    }

    for configuration in &payload.configurations {
        batch.configurations.push((
            MacAddress::new(&configuration.mac)?,
            configuration.config.clone(),
        ));
    }

    Ok(batch)
}
