//! Configuration template handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use shellymgr_core::model::{NewTemplate, PageRequest};

use crate::server::envelope::{ok, ok_paged, ApiResult};
use crate::server::ServerState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    50
}

impl PageQuery {
    pub fn request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            page_size: self.page_size,
        }
    }
}

pub async fn list(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let page = state.store.list_templates(query.request()).await?;
    Ok(ok_paged(&page.items, page.meta))
}

pub async fn create(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<NewTemplate>,
) -> ApiResult {
    let template = state.store.add_template(body).await?;
    Ok(ok(template))
}

pub async fn get_one(State(state): State<Arc<ServerState>>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(state.store.get_template(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    generation: Option<u8>,
    #[serde(default)]
    variables: Option<Vec<String>>,
    #[serde(default)]
    config: Option<shellymgr_core::DeviceConfig>,
    #[serde(default)]
    is_default: Option<bool>,
}

pub async fn update(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBody>,
) -> ApiResult {
    let mut template = state.store.get_template(id).await?;

    if let Some(name) = body.name {
        template.name = name;
    }
    if let Some(device_type) = body.device_type {
        template.device_type = device_type;
    }
    if let Some(generation) = body.generation {
        template.generation = generation;
    }
    if let Some(variables) = body.variables {
        template.variables = variables;
    }
    if let Some(config) = body.config {
        template.config = config;
    }
    if let Some(is_default) = body.is_default {
        template.is_default = is_default;
    }

    state.store.update_template(&template).await?;
    Ok(ok(template))
}

pub async fn remove(State(state): State<Arc<ServerState>>, Path(id): Path<i64>) -> ApiResult {
    state.store.delete_template(id).await?;
    Ok(ok(serde_json::json!({ "deleted": id })))
}
