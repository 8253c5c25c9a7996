// ── Archive plugin (SMA bundles) ──
//
// Bundle layout: a 4-byte magic signature, then a gzip stream of three
// newline-separated blocks -- a JSON header, a JSON body with the
// devices/templates/configurations sections, and a SHA-256 hex digest
// over the uncompressed body.

use std::io::{Read, Write};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

use super::plugin::{
    ConfigSchema, ExportData, ExportOutput, ExportPlugin, ImportPayload, ImportSource,
    OutputSink, PluginCapabilities, PluginCategory, PluginExportResult, PluginMetadata,
    PortableConfiguration, PortableDevice, PortableTemplate, PreviewOutput, SchemaProperty,
};

pub const MAGIC: &[u8; 4] = b"SMA1";
const FORMAT: &str = "sma";

/// Header block of a bundle.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveHeader {
    version: u32,
    created_at: DateTime<Utc>,
    created_by: String,
    record_counts: RecordCounts,
    checksum_algorithm: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordCounts {
    devices: u64,
    templates: u64,
    configurations: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveBody {
    devices: Vec<PortableDevice>,
    templates: Vec<PortableTemplate>,
    configurations: Vec<PortableConfiguration>,
}

/// Full device+config+template bundle with integrity checksums.
pub struct ArchivePlugin;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn compression_level(options: &Value) -> u32 {
    options
        .get("compression_level")
        .and_then(Value::as_u64)
        .map_or(6, |l| l.clamp(1, 9) as u32)
}

fn body_from_snapshot(data: &ExportData) -> ArchiveBody {
    let devices = data
        .devices
        .iter()
        .map(|d| PortableDevice {
            mac: d.mac.to_string(),
            ip: d.ip.to_string(),
            name: d.name.clone(),
            device_type: d.device_type.clone(),
            generation: d.generation.as_number(),
            firmware: d.firmware.clone(),
            settings: d.settings.clone(),
        })
        .collect();

    let templates = data
        .templates
        .iter()
        .map(|t| PortableTemplate {
            name: t.name.clone(),
            device_type: t.device_type.clone(),
            generation: t.generation,
            variables: t.variables.clone(),
            config: t.config.clone(),
            is_default: t.is_default,
        })
        .collect();

    let configurations = data
        .configurations
        .iter()
        .filter_map(|c| {
            let mac = data
                .devices
                .iter()
                .find(|d| d.id == c.device_id)
                .map(|d| d.mac.to_string())?;
            let template = c.template_id.and_then(|id| {
                data.templates.iter().find(|t| t.id == id).map(|t| t.name.clone())
            });
            Some(PortableConfiguration {
                mac,
                template,
                config: c.config.clone(),
            })
        })
        .collect();

    ArchiveBody {
        devices,
        templates,
        configurations,
    }
}

fn encode_bundle(data: &ExportData, options: &Value) -> Result<Vec<u8>, CoreError> {
    let body = body_from_snapshot(data);
    let header = ArchiveHeader {
        version: 1,
        created_at: data.metadata.timestamp,
        created_by: format!("shellymgr/{}", data.metadata.system_version),
        record_counts: RecordCounts {
            devices: body.devices.len() as u64,
            templates: body.templates.len() as u64,
            configurations: body.configurations.len() as u64,
        },
        checksum_algorithm: "sha256".into(),
    };

    let header_json =
        serde_json::to_vec(&header).map_err(|e| CoreError::Internal(e.to_string()))?;
    let body_json = serde_json::to_vec(&body).map_err(|e| CoreError::Internal(e.to_string()))?;
    let trailer = sha256_hex(&body_json);

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);

    let mut encoder = GzEncoder::new(&mut out, Compression::new(compression_level(options)));
    let write = |encoder: &mut GzEncoder<&mut Vec<u8>>| -> std::io::Result<()> {
        encoder.write_all(&header_json)?;
        encoder.write_all(b"\n")?;
        encoder.write_all(&body_json)?;
        encoder.write_all(b"\n")?;
        encoder.write_all(trailer.as_bytes())?;
        Ok(())
    };
    write(&mut encoder).map_err(|e| CoreError::Internal(format!("bundle encoding failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CoreError::Internal(format!("bundle compression failed: {e}")))?;

    Ok(out)
}

fn decode_bundle(bytes: &[u8]) -> Result<(ArchiveHeader, ArchiveBody), CoreError> {
    let payload = bytes.strip_prefix(MAGIC.as_slice()).ok_or_else(|| {
        CoreError::validation("source", "not an SMA bundle (bad magic signature)")
    })?;

    let mut decoder = GzDecoder::new(payload);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| CoreError::validation("source", format!("bundle decompression failed: {e}")))?;

    let mut sections = raw.splitn(3, |&b| b == b'\n');
    let (Some(header_json), Some(body_json), Some(trailer)) =
        (sections.next(), sections.next(), sections.next())
    else {
        return Err(CoreError::validation("source", "truncated bundle"));
    };

    let actual = sha256_hex(body_json);
    let expected = String::from_utf8_lossy(trailer);
    if actual != expected.trim() {
        return Err(CoreError::validation(
            "source",
            "bundle checksum mismatch -- artifact is corrupt",
        ));
    }

    let header: ArchiveHeader = serde_json::from_slice(header_json)
        .map_err(|e| CoreError::validation("source", format!("bad bundle header: {e}")))?;
    let body: ArchiveBody = serde_json::from_slice(body_json)
        .map_err(|e| CoreError::validation("source", format!("bad bundle body: {e}")))?;

    Ok((header, body))
}

#[async_trait]
impl ExportPlugin for ArchivePlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "archive".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            description: "Full device+configuration+template bundle with integrity checksums"
                .into(),
            category: PluginCategory::Backup,
            supported_formats: vec![FORMAT.into()],
            tags: vec!["backup".into(), "bundle".into()],
        }
    }

    fn config_schema(&self) -> ConfigSchema {
        let mut schema = ConfigSchema::default();
        schema.properties.insert(
            "compression_level".into(),
            SchemaProperty {
                kind: "integer".into(),
                description: Some("gzip level, 1 (fast) to 9 (small)".into()),
                default: Some(json!(6)),
                minimum: Some(1.0),
                maximum: Some(9.0),
                ..Default::default()
            },
        );
        schema.properties.insert(
            "include_secrets".into(),
            SchemaProperty {
                kind: "boolean".into(),
                description: Some("carry password fields in the bundle".into()),
                default: Some(json!(false)),
                sensitive: false,
                ..Default::default()
            },
        );
        schema
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            output_sinks: vec![OutputSink::File, OutputSink::Response],
            ..Default::default()
        }
    }

    async fn export(
        &self,
        data: &ExportData,
        options: &Value,
    ) -> Result<PluginExportResult, CoreError> {
        let bytes = encode_bundle(data, options)?;
        let filename = format!("{}.sma", data.metadata.export_id);
        Ok(PluginExportResult::ok(ExportOutput::File { bytes, filename }))
    }

    async fn preview(
        &self,
        data: &ExportData,
        options: &Value,
    ) -> Result<PreviewOutput, CoreError> {
        let bytes = encode_bundle(data, options)?;
        let estimated_size = bytes.len() as u64;
        // The header block is the most useful human-readable sample.
        let sample = serde_json::to_vec_pretty(&json!({
            "format": FORMAT,
            "record_counts": {
                "devices": data.devices.len(),
                "templates": data.templates.len(),
                "configurations": data.configurations.len(),
            },
            "estimated_size": estimated_size,
        }))
        .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(PreviewOutput {
            sample,
            estimated_size,
        })
    }

    async fn import(
        &self,
        source: &ImportSource,
        _options: &Value,
    ) -> Result<ImportPayload, CoreError> {
        let bytes = match source {
            ImportSource::Bytes(bytes) => bytes.clone(),
            ImportSource::Path(path) => {
                tokio::fs::read(path).await.map_err(|e| {
                    CoreError::validation("source", format!("cannot read {}: {e}", path.display()))
                })?
            }
        };
        let (_header, body) = decode_bundle(&bytes)?;
        Ok(ImportPayload {
            devices: body.devices,
            templates: body.templates,
            configurations: body.configurations,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::export::plugin::ExportMetadata;

    fn empty_data() -> ExportData {
        ExportData {
            devices: Vec::new(),
            templates: Vec::new(),
            configurations: Vec::new(),
            metadata: ExportMetadata {
                export_id: "test-export".into(),
                timestamp: Utc::now(),
                system_version: "0.1.0".into(),
                total_devices: 0,
                total_templates: 0,
                total_configurations: 0,
            },
        }
    }

    #[test]
    fn bundle_round_trips() {
        let bytes = encode_bundle(&empty_data(), &json!({})).unwrap();
        assert!(bytes.starts_with(MAGIC));
        let (header, body) = decode_bundle(&bytes).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.checksum_algorithm, "sha256");
        assert!(body.devices.is_empty());
    }

    #[test]
    fn corrupt_body_fails_checksum() {
        let bytes = encode_bundle(&empty_data(), &json!({})).unwrap();

        // Re-frame the bundle with a flipped body byte but the original
        // trailer: the checksum check must reject it.
        let mut raw = Vec::new();
        GzDecoder::new(&bytes[4..]).read_to_end(&mut raw).unwrap();
        let newline = raw.iter().position(|&b| b == b'\n').unwrap();
        raw[newline + 2] ^= 0x01;

        let mut tampered = MAGIC.to_vec();
        let mut encoder = GzEncoder::new(&mut tampered, Compression::new(6));
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap();

        let err = decode_bundle(&tampered).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = decode_bundle(b"NOPE....").unwrap_err();
        assert!(err.to_string().contains("magic"));
    }
}
