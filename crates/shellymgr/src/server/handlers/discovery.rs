//! Discovery sweep handler.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use shellymgr_core::CoreError;

use crate::server::envelope::{ok, ApiResult};
use crate::server::ServerState;

#[derive(Debug, Deserialize)]
pub struct DiscoveryBody {
    /// Explicit CIDR, `auto`, or absent (equivalent to `auto`).
    #[serde(default)]
    cidr: Option<String>,
    /// Overall sweep deadline.
    #[serde(default = "default_timeout")]
    timeout_secs: u64,
}

fn default_timeout() -> u64 {
    120
}

pub async fn run(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<DiscoveryBody>,
) -> ApiResult {
    let input = body.cidr.unwrap_or_default();
    let cancel = CancellationToken::new();

    let sweep = state.discovery.discover(&input, &cancel);
    let results = match tokio::time::timeout(Duration::from_secs(body.timeout_secs), sweep).await {
        Ok(results) => results?,
        Err(_) => {
            // Abort in-flight probes before reporting the deadline.
            cancel.cancel();
            return Err(CoreError::Timeout {
                seconds: body.timeout_secs,
            }
            .into());
        }
    };

    let devices: Vec<_> = results.into_iter().map(|r| r.device).collect();
    Ok(ok(devices))
}
