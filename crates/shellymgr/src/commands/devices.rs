//! Device listing and manual adds.

use tabled::Tabled;

use shellymgr_core::model::{Device, DeviceStatus, PageRequest};
use shellymgr_core::store::{DeviceFilter, DeviceSort};

use crate::cli::{AddArgs, GlobalOpts, ListArgs};
use crate::context::AppContext;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Gen")]
    generation: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

impl From<&Device> for DeviceRow {
    fn from(d: &Device) -> Self {
        Self {
            id: d.id,
            name: d.name.clone().unwrap_or_default(),
            model: d.device_type.clone(),
            generation: d.generation.to_string(),
            mac: d.mac.to_string(),
            ip: d.ip.to_string(),
            status: d.status.to_string(),
            last_seen: d
                .last_seen
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into()),
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn list(
    context: &AppContext,
    args: ListArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let filter = DeviceFilter {
        status: args
            .status
            .as_deref()
            .map(|s| {
                s.parse::<DeviceStatus>()
                    .map_err(|_| CliError::Usage(format!("unknown status {s:?}")))
            })
            .transpose()?,
        device_type: args.device_type,
        ..Default::default()
    };
    let page = PageRequest {
        page: args.page,
        page_size: args.page_size,
    };

    let result = context
        .store
        .list_devices(page, &filter, DeviceSort::Id)
        .await?;

    println!(
        "{}",
        output::render_list(global.output, &result.items, |d| DeviceRow::from(d))
    );
    if result.meta.total_pages > 1 && global.output == crate::cli::OutputFormat::Table {
        println!(
            "page {}/{} ({} devices)",
            result.meta.page, result.meta.total_pages, result.meta.total_items
        );
    }
    Ok(())
}

pub async fn add(
    context: &AppContext,
    args: AddArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let ip = args
        .ip
        .parse()
        .map_err(|_| CliError::Usage(format!("{:?} is not an IP address", args.ip)))?;

    let result = context.discovery.probe_address(ip).await?;
    let mut device = result.device;

    if let Some(name) = args.name {
        device.name = Some(name);
        context.store.update_device(&device).await?;
    }

    println!(
        "{}",
        output::success(&format!(
            "added {} ({}) at {}",
            device.name.as_deref().unwrap_or("unnamed"),
            device.mac,
            device.ip
        ))
    );
    if global.output != crate::cli::OutputFormat::Table {
        println!("{}", output::render_one(global.output, &device));
    }
    Ok(())
}
