// ── Hosts adapter plugin ──
//
// Flat network-admin exports: dnsmasq DHCP reservations, an /etc/hosts
// block, or a Markdown inventory table. Exercises the adapter category;
// import is not meaningful for these formats.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::model::Device;

use super::plugin::{
    ConfigSchema, ExportData, ExportOutput, ExportPlugin, ImportPayload, ImportSource,
    OutputSink, PluginCapabilities, PluginCategory, PluginExportResult, PluginMetadata,
    PreviewOutput, SchemaProperty,
};

pub struct HostsPlugin;

fn hostname(device: &Device) -> String {
    let base = device
        .name
        .clone()
        .unwrap_or_else(|| format!("shelly-{}", device.mac.suffix6().to_lowercase()));
    base.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn render_dnsmasq(data: &ExportData) -> String {
    let mut out = String::from("# Shelly DHCP reservations (generated)\n");
    for device in &data.devices {
        out.push_str(&format!(
            "dhcp-host={},{},{}\n",
            device.mac.pretty().to_lowercase(),
            device.ip,
            hostname(device),
        ));
    }
    out
}

fn render_hosts(data: &ExportData) -> String {
    let mut out = String::from("# Shelly devices (generated)\n");
    for device in &data.devices {
        out.push_str(&format!("{}\t{}\n", device.ip, hostname(device)));
    }
    out
}

fn render_markdown(data: &ExportData) -> String {
    let mut out = String::from(
        "# Device inventory\n\n| Name | Model | Gen | MAC | IP | Status |\n|---|---|---|---|---|---|\n",
    );
    for device in &data.devices {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            device.name.as_deref().unwrap_or("-"),
            device.device_type,
            device.generation,
            device.mac,
            device.ip,
            device.status,
        ));
    }
    out
}

fn render(data: &ExportData, format: &str) -> (String, &'static str) {
    match format {
        "hosts" => (render_hosts(data), "hosts"),
        "markdown" => (render_markdown(data), "md"),
        _ => (render_dnsmasq(data), "conf"),
    }
}

#[async_trait]
impl ExportPlugin for HostsPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "hosts".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            description: "DHCP reservations, hosts file, or Markdown inventory".into(),
            category: PluginCategory::Networking,
            supported_formats: vec!["dnsmasq".into(), "hosts".into(), "markdown".into()],
            tags: vec!["dhcp".into(), "documentation".into()],
        }
    }

    fn config_schema(&self) -> ConfigSchema {
        let mut schema = ConfigSchema::default();
        schema.properties.insert(
            "format".into(),
            SchemaProperty {
                kind: "string".into(),
                allowed: Some(vec![json!("dnsmasq"), json!("hosts"), json!("markdown")]),
                default: Some(json!("dnsmasq")),
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
        let format = options
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("dnsmasq");
        let (text, extension) = render(data, format);
        Ok(PluginExportResult::ok(ExportOutput::File {
            bytes: text.into_bytes(),
            filename: format!("{}.{extension}", data.metadata.export_id),
        }))
    }

    async fn preview(
        &self,
        data: &ExportData,
        options: &Value,
    ) -> Result<PreviewOutput, CoreError> {
        let format = options
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("dnsmasq");
        let (text, _) = render(data, format);
        let estimated_size = text.len() as u64;
        let sample: String = text.lines().take(10).collect::<Vec<_>>().join("\n");
        Ok(PreviewOutput {
            sample: sample.into_bytes(),
            estimated_size,
        })
    }

    async fn import(
        &self,
        _source: &ImportSource,
        _options: &Value,
    ) -> Result<ImportPayload, CoreError> {
        Err(CoreError::validation(
            "plugin",
            "the hosts plugin produces one-way exports",
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::export::plugin::ExportMetadata;
    use crate::model::{DeviceStatus, MacAddress};
    use chrono::Utc;
    use shellymgr_api::Generation;

    fn data_with_one_device() -> ExportData {
        ExportData {
            devices: vec![Device {
                id: 1,
                mac: MacAddress::new("68C63A123456").unwrap(),
                ip: "192.168.1.40".parse().unwrap(),
                name: Some("Kitchen Plug".into()),
                device_type: "SHPLG-S".into(),
                generation: Generation::Gen1,
                firmware: Some("1.14.0".into()),
                status: DeviceStatus::Online,
                last_seen: None,
                settings: serde_json::json!({}),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }],
            templates: Vec::new(),
            configurations: Vec::new(),
            metadata: ExportMetadata {
                export_id: "x".into(),
                timestamp: Utc::now(),
                system_version: "0.1.0".into(),
                total_devices: 1,
                total_templates: 0,
                total_configurations: 0,
            },
        }
    }

    #[test]
    fn dnsmasq_lines_carry_mac_ip_and_hostname() {
        let text = render_dnsmasq(&data_with_one_device());
        assert!(text.contains("dhcp-host=68:c6:3a:12:34:56,192.168.1.40,kitchen-plug"));
    }

    #[test]
    fn markdown_table_renders_rows() {
        let text = render_markdown(&data_with_one_device());
        assert!(text.contains("| Kitchen Plug | SHPLG-S | 1 | 68C63A123456 |"));
    }
}
