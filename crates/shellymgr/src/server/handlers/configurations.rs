//! Device configuration and drift handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use shellymgr_core::config_model::{
    materialize, validate, DriftDetector, DriftPolicy, ValidationLevel,
};
use shellymgr_core::model::{DeviceConfiguration, SyncStatus};
use shellymgr_core::{CoreError, DeviceConfig};

use super::templates::PageQuery;
use crate::server::envelope::{ok, ok_paged, ApiError, ApiResult};
use crate::server::ServerState;

pub async fn list(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let page = state.store.list_configurations(query.request()).await?;
    Ok(ok_paged(&page.items, page.meta))
}

pub async fn get_one(State(state): State<Arc<ServerState>>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(state.store.get_configuration(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PutBody {
    /// Materialise this template instead of taking `config` verbatim.
    #[serde(default)]
    template_id: Option<i64>,
    #[serde(default)]
    variables: HashMap<String, String>,
    #[serde(default)]
    config: Option<DeviceConfig>,
}

#[derive(Debug, Deserialize)]
pub struct LevelQuery {
    #[serde(default)]
    level: Option<String>,
}

fn parse_level(level: Option<&str>) -> Result<ValidationLevel, ApiError> {
    match level {
        None | Some("basic") => Ok(ValidationLevel::Basic),
        Some("strict") => Ok(ValidationLevel::Strict),
        Some(other) => Err(ApiError(CoreError::validation(
            "level",
            format!("unknown validation level {other:?}"),
        ))),
    }
}

pub async fn put(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    Query(query): Query<LevelQuery>,
    Json(body): Json<PutBody>,
) -> ApiResult {
    // Owning device must exist; configurations never dangle.
    state.store.get_device(id).await?;

    let (config, template_id) = match (body.template_id, body.config) {
        (Some(template_id), None) => {
            let template = state.store.get_template(template_id).await?;
            (materialize(&template, &body.variables)?, Some(template_id))
        }
        (None, Some(config)) => (config, None),
        (Some(template_id), Some(config)) => {
            // Explicit config wins; the template is kept as provenance.
            (config, Some(template_id))
        }
        (None, None) => {
            return Err(ApiError(CoreError::validation(
                "config",
                "provide either a config or a template_id",
            )));
        }
    };

    let level = parse_level(query.level.as_deref())?;
    let report = validate(&config, level);
    if !report.valid {
        return Err(ApiError(CoreError::Validation {
            errors: report.errors,
        }));
    }

    let configuration = DeviceConfiguration {
        device_id: id,
        template_id,
        config,
        last_synced: None,
        sync_status: SyncStatus::Pending,
        updated_at: Utc::now(),
    };
    state.store.upsert_configuration(&configuration).await?;
    Ok(ok(configuration))
}

pub async fn validate_config(
    State(_state): State<Arc<ServerState>>,
    Query(query): Query<LevelQuery>,
    Json(config): Json<DeviceConfig>,
) -> ApiResult {
    let level = parse_level(query.level.as_deref())?;
    Ok(ok(validate(&config, level)))
}

/// Push the stored configuration to the live device.
pub async fn apply(State(state): State<Arc<ServerState>>, Path(id): Path<i64>) -> ApiResult {
    let device = state.store.get_device(id).await?;
    let configuration = state.store.get_configuration(id).await?;

    let client = state.clients.get_or_connect(device.ip, None).await?;
    match client.set_config(&configuration.config).await {
        Ok(()) => {
            state
                .store
                .set_sync_status(id, SyncStatus::InSync, Some(Utc::now()))
                .await?;
            Ok(ok(serde_json::json!({ "applied": true })))
        }
        Err(err) => {
            state
                .store
                .set_sync_status(id, SyncStatus::Failed, Some(Utc::now()))
                .await?;
            Err(ApiError(err.into()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DriftQuery {
    #[serde(default)]
    policy: Option<String>,
}

pub async fn detect_drift(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    Query(query): Query<DriftQuery>,
) -> ApiResult {
    let policy = match query.policy.as_deref() {
        None => state.drift_policy,
        Some("strict") => DriftPolicy::Strict,
        Some("moderate") => DriftPolicy::Moderate,
        Some("relaxed") => DriftPolicy::Relaxed,
        Some(other) => {
            return Err(ApiError(CoreError::validation(
                "policy",
                format!("unknown drift policy {other:?}"),
            )));
        }
    };

    let detector = DriftDetector::new(
        Arc::clone(&state.store),
        Arc::clone(&state.clients),
        policy,
    );
    let report = detector.detect(id).await?;
    Ok(ok(report))
}

pub async fn last_drift(State(state): State<Arc<ServerState>>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(state.store.get_drift_report(id).await?))
}
