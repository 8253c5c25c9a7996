//! AP scanning and device provisioning.

use tabled::Tabled;

use shellymgr_core::model::DiscoveredDevice;
use shellymgr_core::provision::{ProvisionRequest, StepStatus};

use crate::cli::{GlobalOpts, ProvisionArgs};
use crate::context::AppContext;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ApRow {
    #[tabled(rename = "SSID")]
    ssid: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Gen")]
    generation: String,
    #[tabled(rename = "Signal")]
    signal: String,
}

impl From<&DiscoveredDevice> for ApRow {
    fn from(d: &DiscoveredDevice) -> Self {
        Self {
            ssid: d.ssid.clone(),
            mac: d.mac.clone(),
            model: d.model.clone().unwrap_or_else(|| "?".into()),
            generation: d.generation.to_string(),
            signal: d
                .signal_percent
                .map(|s| format!("{s}%"))
                .unwrap_or_else(|| "-".into()),
        }
    }
}

pub async fn scan_ap(context: &AppContext, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = context.provisioner.scan_ap().await?;
    println!(
        "{}",
        output::render_list(global.output, &devices, |d| ApRow::from(d))
    );
    println!(
        "{}",
        output::success(&format!("{} unprovisioned device(s) in range", devices.len()))
    );
    Ok(())
}

pub async fn run(
    context: &AppContext,
    args: ProvisionArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    // Pick the device AP: explicit flag, or the strongest scan hit.
    let device_ssid = match args.device {
        Some(ssid) => ssid,
        None => {
            let mut scanned = context.provisioner.scan_ap().await?;
            scanned.sort_by_key(|d| std::cmp::Reverse(d.signal_percent.unwrap_or(0)));
            scanned
                .first()
                .map(|d| d.ssid.clone())
                .ok_or_else(|| CliError::Usage("no factory APs in range".into()))?
        }
    };

    let request = ProvisionRequest {
        device_ssid,
        ssid: args.ssid,
        password: args.password,
        device_name: args.name,
        auth_user: args.auth_user,
        auth_password: args.auth_pass,
        mqtt_server: args.mqtt,
        enable_cloud: args.cloud.then_some(true),
        timeout_secs: Some(args.timeout),
    };

    let outcome = context.provisioner.provision(request).await;

    for step in &outcome.steps {
        let line = match step.status {
            StepStatus::Success => output::success(&step.name.to_string()),
            StepStatus::Failed => output::failure(&format!(
                "{}: {}",
                step.name,
                step.error.as_deref().unwrap_or("failed")
            )),
            StepStatus::Pending => format!("- {} (skipped)", step.name),
        };
        println!("{line}");
    }

    if global.output != crate::cli::OutputFormat::Table {
        println!("{}", output::render_one(global.output, &outcome));
    }

    if outcome.success {
        if let Some(device) = &outcome.device {
            println!(
                "{}",
                output::success(&format!(
                    "adopted {} ({}) at {}",
                    device.name.as_deref().unwrap_or("unnamed"),
                    device.mac,
                    device.ip
                ))
            );
        }
        Ok(())
    } else {
        Err(CliError::Core(shellymgr_core::CoreError::Internal(
            "provisioning did not complete; see step output".into(),
        )))
    }
}
