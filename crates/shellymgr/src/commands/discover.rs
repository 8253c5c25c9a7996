//! Network discovery sweep.

use std::time::Duration;

use tabled::Tabled;
use tokio_util::sync::CancellationToken;

use shellymgr_core::model::MergeOutcome;
use shellymgr_core::DiscoveryResult;

use crate::cli::{DiscoverArgs, GlobalOpts};
use crate::context::AppContext;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Gen")]
    generation: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Merge")]
    merge: String,
}

fn merge_label(outcome: MergeOutcome) -> String {
    match outcome {
        MergeOutcome::Inserted => "new".into(),
        MergeOutcome::Touched => "seen".into(),
        MergeOutcome::Moved { old_ip } => format!("moved from {old_ip}"),
    }
}

pub async fn run(
    context: &AppContext,
    args: DiscoverArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let cancel = CancellationToken::new();
    let sweep = context.discovery.discover(&args.cidr, &cancel);

    let results = match tokio::time::timeout(Duration::from_secs(args.timeout), sweep).await {
        Ok(results) => results?,
        Err(_) => {
            cancel.cancel();
            return Err(CliError::Core(shellymgr_core::CoreError::Timeout {
                seconds: args.timeout,
            }));
        }
    };

    println!(
        "{}",
        output::render_list(global.output, &serializable(&results), |r| ResultRow {
            mac: r.device.mac.to_string(),
            model: r.device.device_type.clone(),
            generation: r.device.generation.to_string(),
            ip: r.device.ip.to_string(),
            merge: merge_label(r.outcome),
        })
    );
    println!("{}", output::success(&format!("{} device(s) found", results.len())));
    Ok(())
}

/// `DiscoveryResult` itself is not serialisable wholesale; project the
/// parts listings need.
fn serializable(results: &[DiscoveryResult]) -> Vec<DiscoveredRow> {
    results
        .iter()
        .map(|r| DiscoveredRow {
            device: r.device.clone(),
            outcome: r.outcome,
        })
        .collect()
}

#[derive(serde::Serialize)]
struct DiscoveredRow {
    #[serde(flatten)]
    device: shellymgr_core::model::Device,
    outcome: MergeOutcome,
}
