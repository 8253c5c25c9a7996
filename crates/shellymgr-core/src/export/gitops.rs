// ── GitOps plugin ──
//
// Renders the inventory as a YAML tree suitable for keeping in git:
//
//   <root>/common.yaml
//   <root>/groups/<group>/group.yaml
//   <root>/groups/<group>/<type>/common.yaml
//   <root>/groups/<group>/<type>/<device>.yaml
//   <root>/ungrouped/<type>/<device>.yaml
//   <root>/templates/<name>.yaml
//
// Export writes device and template files; the layer files (common.yaml,
// group.yaml, per-type common.yaml) are human-owned and only created as
// empty scaffolding when absent. Import merges strictly layered:
// common → group → group/type → device, deep-merging mappings and
// overriding scalars.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use shellymgr_api::DeviceConfig;

use crate::error::CoreError;
use crate::model::Device;

use super::plugin::{
    ConfigSchema, ExportData, ExportOutput, ExportPlugin, ImportPayload, ImportSource,
    OutputSink, PluginCapabilities, PluginCategory, PluginExportResult, PluginMetadata,
    PortableConfiguration, PortableDevice, PortableTemplate, PreviewOutput, SchemaProperty,
};

const FORMAT: &str = "gitops";

/// Device file as stored in the tree.
#[derive(Debug, Serialize, Deserialize)]
struct DeviceFile {
    mac: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    device_type: String,
    generation: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct TemplateFile {
    name: String,
    device_type: String,
    generation: u8,
    #[serde(default)]
    variables: Vec<String>,
    #[serde(default)]
    is_default: bool,
    config: DeviceConfig,
}

pub struct GitopsPlugin;

/// A device's group comes from the `group` field of its settings blob;
/// devices without one land under `ungrouped/`.
fn device_group(device: &Device) -> Option<String> {
    device
        .settings
        .get("group")
        .and_then(Value::as_str)
        .filter(|g| !g.is_empty())
        .map(str::to_owned)
}

/// Keep path segments boring: lowercase alphanumerics plus dashes.
fn safe_segment(raw: &str) -> String {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.is_empty() { "unnamed".into() } else { cleaned }
}

fn yaml_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_yaml::to_string(value)
        .map(String::into_bytes)
        .map_err(|e| CoreError::Internal(format!("YAML serialisation failed: {e}")))
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::Storage {
                message: format!("cannot create {}: {e}", parent.display()),
            })?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| CoreError::Storage {
            message: format!("cannot write {}: {e}", path.display()),
        })
}

async fn read_yaml(path: &Path) -> Result<Option<Value>, CoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let value: Value = serde_yaml::from_str(&text).map_err(|e| {
                CoreError::validation(
                    "source",
                    format!("bad YAML in {}: {e}", path.display()),
                )
            })?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

/// Deep-merge `overlay` onto `base`: mappings merge key-wise, everything
/// else (scalars, arrays) is overridden by the later layer.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let entry = match merged.get(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

fn device_files(data: &ExportData) -> Result<Vec<(PathBuf, Vec<u8>)>, CoreError> {
    let mut files = Vec::new();

    for device in &data.devices {
        let config = data
            .configurations
            .iter()
            .find(|c| c.device_id == device.id)
            .map(|c| serde_json::to_value(&c.config))
            .transpose()
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .unwrap_or_else(|| json!({}));

        let file = DeviceFile {
            mac: device.mac.to_string(),
            name: device.name.clone(),
            device_type: device.device_type.clone(),
            generation: device.generation.as_number(),
            ip: Some(device.ip.to_string()),
            config,
        };

        let type_dir = safe_segment(&device.device_type);
        let file_name = format!(
            "{}.yaml",
            safe_segment(device.name.as_deref().unwrap_or(device.mac.as_str()))
        );
        let path = match device_group(device) {
            Some(group) => PathBuf::from("groups")
                .join(safe_segment(&group))
                .join(type_dir)
                .join(file_name),
            None => PathBuf::from("ungrouped").join(type_dir).join(file_name),
        };
        files.push((path, yaml_bytes(&file)?));
    }

    for template in &data.templates {
        let file = TemplateFile {
            name: template.name.clone(),
            device_type: template.device_type.clone(),
            generation: template.generation,
            variables: template.variables.clone(),
            is_default: template.is_default,
            config: template.config.clone(),
        };
        let path = PathBuf::from("templates").join(format!("{}.yaml", safe_segment(&template.name)));
        files.push((path, yaml_bytes(&file)?));
    }

    Ok(files)
}

fn output_dir(options: &Value) -> Result<PathBuf, CoreError> {
    options
        .get("output_dir")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| CoreError::validation("options.output_dir", "required option missing"))
}

#[async_trait]
impl ExportPlugin for GitopsPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "gitops".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            description: "YAML tree with layered inheritance, suitable for git".into(),
            category: PluginCategory::Gitops,
            supported_formats: vec![FORMAT.into()],
            tags: vec!["gitops".into(), "yaml".into()],
        }
    }

    fn config_schema(&self) -> ConfigSchema {
        let mut schema = ConfigSchema::default();
        schema.properties.insert(
            "output_dir".into(),
            SchemaProperty {
                kind: "string".into(),
                description: Some("root directory of the YAML tree".into()),
                ..Default::default()
            },
        );
        schema.properties.insert(
            "include_secrets".into(),
            SchemaProperty {
                kind: "boolean".into(),
                default: Some(json!(false)),
                ..Default::default()
            },
        );
        schema.required = vec!["output_dir".into()];
        schema
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_incremental: true,
            output_sinks: vec![OutputSink::File],
            ..Default::default()
        }
    }

    async fn export(
        &self,
        data: &ExportData,
        options: &Value,
    ) -> Result<PluginExportResult, CoreError> {
        let root = output_dir(options)?;
        let files = device_files(data)?;

        let mut files_written = 0;
        let mut bytes_written = 0;
        for (relative, bytes) in &files {
            write_file(&root.join(relative), bytes).await?;
            files_written += 1;
            bytes_written += bytes.len() as u64;
        }

        // Scaffold the human-owned root layer once, never overwrite it.
        let common = root.join("common.yaml");
        if !common.exists() {
            write_file(&common, b"# Shared configuration applied to every device\n{}\n")
                .await?;
            files_written += 1;
        }

        Ok(PluginExportResult::ok(ExportOutput::Tree {
            root,
            files_written,
            bytes_written,
        }))
    }

    async fn preview(
        &self,
        data: &ExportData,
        _options: &Value,
    ) -> Result<PreviewOutput, CoreError> {
        let files = device_files(data)?;
        let estimated_size = files.iter().map(|(_, b)| b.len() as u64).sum();
        let sample = files
            .first()
            .map(|(path, bytes)| {
                let mut sample = format!("# {}\n", path.display()).into_bytes();
                sample.extend_from_slice(bytes);
                sample
            })
            .unwrap_or_else(|| b"# empty tree\n".to_vec());
        Ok(PreviewOutput {
            sample,
            estimated_size,
        })
    }

    #[allow(clippy::too_many_lines)]
    async fn import(
        &self,
        source: &ImportSource,
        _options: &Value,
    ) -> Result<ImportPayload, CoreError> {
        let root = match source {
            ImportSource::Path(path) => path.clone(),
            ImportSource::Bytes(_) => {
                return Err(CoreError::validation(
                    "source",
                    "gitops import takes a directory path, not raw bytes",
                ));
            }
        };

        let common = read_yaml(&root.join("common.yaml")).await?.unwrap_or(json!({}));
        let mut payload = ImportPayload::default();

        // templates/<name>.yaml
        if let Ok(mut entries) = tokio::fs::read_dir(root.join("templates")).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Some(value) = read_yaml(&entry.path()).await? {
                    let template: TemplateFile = serde_json::from_value(value).map_err(|e| {
                        CoreError::validation(
                            "source",
                            format!("bad template file {}: {e}", entry.path().display()),
                        )
                    })?;
                    payload.templates.push(PortableTemplate {
                        name: template.name,
                        device_type: template.device_type,
                        generation: template.generation,
                        variables: template.variables,
                        config: template.config,
                        is_default: template.is_default,
                    });
                }
            }
        }

        // groups/<group>/<type>/<device>.yaml with full layering.
        if let Ok(mut groups) = tokio::fs::read_dir(root.join("groups")).await {
            while let Ok(Some(group_entry)) = groups.next_entry().await {
                let group_dir = group_entry.path();
                if !group_dir.is_dir() {
                    continue;
                }
                let group_layer = read_yaml(&group_dir.join("group.yaml"))
                    .await?
                    .unwrap_or(json!({}));
                let base = deep_merge(&common, &group_layer);
                collect_type_dirs(&base, &group_dir, true, &mut payload).await?;
            }
        }

        // ungrouped/<type>/<device>.yaml layers common → device.
        collect_type_dirs(&common, &root.join("ungrouped"), false, &mut payload).await?;

        Ok(payload)
    }
}

/// Walk `<dir>/<type>/<device>.yaml`, merging each device file onto the
/// accumulated base. When `with_type_common` is set, a per-type
/// `common.yaml` is merged between base and device.
async fn collect_type_dirs(
    base: &Value,
    dir: &Path,
    with_type_common: bool,
    payload: &mut ImportPayload,
) -> Result<(), CoreError> {
    let Ok(mut types) = tokio::fs::read_dir(dir).await else {
        return Ok(());
    };
    while let Ok(Some(type_entry)) = types.next_entry().await {
        let type_dir = type_entry.path();
        if !type_dir.is_dir() {
            continue;
        }
        let type_layer = if with_type_common {
            read_yaml(&type_dir.join("common.yaml")).await?.unwrap_or(json!({}))
        } else {
            json!({})
        };
        let type_base = deep_merge(base, &type_layer);

        let Ok(mut devices) = tokio::fs::read_dir(&type_dir).await else {
            continue;
        };
        while let Ok(Some(device_entry)) = devices.next_entry().await {
            let path = device_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some("common.yaml") {
                continue;
            }
            let Some(value) = read_yaml(&path).await? else {
                continue;
            };
            let file: DeviceFile = serde_json::from_value(value).map_err(|e| {
                CoreError::validation(
                    "source",
                    format!("bad device file {}: {e}", path.display()),
                )
            })?;

            // Layered merge on the config fragment only; identity fields
            // come from the device file alone.
            let merged_config = deep_merge(&type_base, &file.config);
            let config: DeviceConfig = serde_json::from_value(merged_config.clone())
                .map_err(|e| {
                    CoreError::validation(
                        "source",
                        format!("merged config for {} is malformed: {e}", file.mac),
                    )
                })?;

            payload.devices.push(PortableDevice {
                mac: file.mac.clone(),
                ip: file.ip.clone().unwrap_or_default(),
                name: file.name.clone(),
                device_type: file.device_type.clone(),
                generation: file.generation,
                settings: json!({}),
                firmware: None,
            });
            payload.configurations.push(PortableConfiguration {
                mac: file.mac,
                template: None,
                config,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_overrides_scalars_and_merges_maps() {
        let base = json!({
            "mqtt": {"enabled": true, "server": "broker:1883", "retain": false},
            "cloud": {"enabled": false}
        });
        let overlay = json!({
            "mqtt": {"server": "other:1883"},
            "sntp": {"server": "time.google.com"}
        });
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged["mqtt"]["server"], "other:1883");
        assert_eq!(merged["mqtt"]["enabled"], true);
        assert_eq!(merged["mqtt"]["retain"], false);
        assert_eq!(merged["cloud"]["enabled"], false);
        assert_eq!(merged["sntp"]["server"], "time.google.com");
    }

    #[test]
    fn deep_merge_overrides_arrays_whole() {
        let base = json!({"tags": ["a", "b"]});
        let overlay = json!({"tags": ["c"]});
        assert_eq!(deep_merge(&base, &overlay)["tags"], json!(["c"]));
    }

    #[test]
    fn layering_is_strictly_ordered() {
        let common = json!({"mqtt": {"server": "common:1883", "retain": true}});
        let group = json!({"mqtt": {"server": "group:1883"}});
        let type_layer = json!({"mqtt": {"server": "type:1883"}});
        let device = json!({"mqtt": {"server": "device:1883"}});

        let merged = deep_merge(
            &deep_merge(&deep_merge(&common, &group), &type_layer),
            &device,
        );
        assert_eq!(merged["mqtt"]["server"], "device:1883");
        // Untouched keys survive from the earliest layer.
        assert_eq!(merged["mqtt"]["retain"], true);
    }

    #[test]
    fn safe_segment_cleans_path_hazards() {
        assert_eq!(safe_segment("SHSW-25"), "shsw-25");
        assert_eq!(safe_segment("../../etc"), "------etc");
        assert_eq!(safe_segment(""), "unnamed");
    }
}
