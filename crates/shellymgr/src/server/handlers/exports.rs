//! Export/import handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use shellymgr_core::export::{ExportRequest, ImportRequest};
use shellymgr_core::CoreError;

use super::templates::PageQuery;
use crate::server::envelope::{ok, ok_paged, ApiResult};
use crate::server::ServerState;

pub async fn plugins(State(state): State<Arc<ServerState>>) -> ApiResult {
    Ok(ok(state.engine.list_plugins()))
}

pub async fn export(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ExportRequest>,
) -> ApiResult {
    let result = state.engine.export(&request).await?;
    Ok(ok(result))
}

pub async fn preview(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ExportRequest>,
) -> ApiResult {
    let preview = state.engine.preview(&request).await?;
    Ok(ok(serde_json::json!({
        "sample": String::from_utf8_lossy(&preview.sample),
        "estimated_size": preview.estimated_size,
    })))
}

pub async fn export_history(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let page = state.store.list_export_history(query.request()).await?;
    Ok(ok_paged(&page.items, page.meta))
}

/// Artifact download; the engine refuses paths outside its base dir.
pub async fn download(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult {
    let path = state.engine.resolve_download(&name)?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| CoreError::Storage {
        message: format!("cannot read artifact: {e}"),
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub async fn import(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ImportRequest>,
) -> ApiResult {
    let result = state.engine.import(&request).await?;
    Ok(ok(result))
}

/// Import preview: forced dry run, whatever the body says.
pub async fn import_preview(
    State(state): State<Arc<ServerState>>,
    Json(mut request): Json<ImportRequest>,
) -> ApiResult {
    request.options.dry_run = true;
    let result = state.engine.import(&request).await?;
    Ok(ok(result))
}

pub async fn import_history(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let page = state.store.list_import_history(query.request()).await?;
    Ok(ok_paged(&page.items, page.meta))
}
