//! AP scanning and provisioning handlers.
//!
//! Provisioning outcomes are data, not transport errors: a run whose
//! steps failed still returns 200 with the step records so callers can
//! show progress.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use shellymgr_core::provision::ProvisionRequest;

use crate::server::envelope::{ok, ApiResult};
use crate::server::ServerState;

pub async fn scan(State(state): State<Arc<ServerState>>) -> ApiResult {
    let devices = state.provisioner.scan_ap().await?;
    Ok(ok(devices))
}

/// Previously scanned APs, as persisted.
pub async fn discovered(State(state): State<Arc<ServerState>>) -> ApiResult {
    let devices = state.store.list_ap_devices().await?;
    Ok(ok(devices))
}

pub async fn provision(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ProvisionRequest>,
) -> ApiResult {
    let outcome = state.provisioner.provision(request).await;
    Ok(ok(outcome))
}

pub async fn provision_batch(
    State(state): State<Arc<ServerState>>,
    Json(requests): Json<Vec<ProvisionRequest>>,
) -> ApiResult {
    let outcomes = state.provisioner.provision_batch(requests).await;
    Ok(ok(outcomes))
}
