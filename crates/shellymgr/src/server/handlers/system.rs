//! Health and admin-gated handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use shellymgr_core::CoreError;

use crate::server::envelope::{ok, ApiResult};
use crate::server::ServerState;

pub async fn health(State(state): State<Arc<ServerState>>) -> ApiResult {
    let report = state.store.health_check().await;
    let healthy = report.healthy;
    let message = report.error.clone().unwrap_or_else(|| "unhealthy".into());

    let body = serde_json::json!({
        "storage": report,
        "client_cache_entries": state.clients.len(),
    });

    if healthy {
        Ok(ok(body))
    } else {
        // Health stays an envelope, but unhealthy flips the status code.
        Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "success": false,
                "error": {
                    "code": "storage_error",
                    "message": message,
                    "details": body,
                },
                "meta": { "version": env!("CARGO_PKG_VERSION") },
            })),
        )
            .into_response())
    }
}

/// Rotate the admin key; returns the new key exactly once.
pub async fn rotate_key(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> ApiResult {
    state.require_admin(&headers)?;

    let new_key = uuid::Uuid::new_v4().to_string();
    *state.admin_key.write().expect("admin key lock poisoned") = Some(new_key.clone());
    tracing::info!("admin key rotated");
    Ok(ok(serde_json::json!({ "admin_key": new_key })))
}

pub async fn delete_history(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> ApiResult {
    state.require_admin(&headers)?;
    let removed = state.store.delete_history().await?;
    Ok(ok(serde_json::json!({ "deleted_rows": removed })))
}

#[derive(Debug, Deserialize)]
pub struct RestoreBody {
    name: String,
}

pub async fn restore(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<RestoreBody>,
) -> ApiResult {
    state.require_admin(&headers)?;

    let backup = state.store.backup().ok_or_else(|| CoreError::Validation {
        errors: vec![shellymgr_core::config_model::FieldError {
            field: "backend".into(),
            code: "unsupported".into(),
            message: "this storage backend has no backup capability".into(),
        }],
    })?;
    backup.restore_backup(&body.name).await?;
    Ok(ok(serde_json::json!({ "restored": body.name })))
}
