//! Device resource handlers.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use shellymgr_core::model::{DeviceStatus, PageRequest};
use shellymgr_core::store::{DeviceFilter, DeviceSort};
use shellymgr_core::CoreError;

use crate::server::envelope::{ok, ok_paged, ApiError, ApiResult};
use crate::server::ServerState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
    status: Option<String>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    generation: Option<u8>,
    search: Option<String>,
    sort: Option<String>,
}

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    50
}

pub async fn list(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<DeviceStatus>()
                .map_err(|_| CoreError::validation("status", format!("unknown status {s:?}")))
        })
        .transpose()?;

    let filter = DeviceFilter {
        status,
        device_type: query.device_type,
        generation: query.generation,
        name_contains: query.search,
        last_seen_after: None,
    };
    let sort = match query.sort.as_deref() {
        None | Some("id") => DeviceSort::Id,
        Some("name") => DeviceSort::Name,
        Some("ip") => DeviceSort::Ip,
        Some("mac") => DeviceSort::Mac,
        Some("last_seen") => DeviceSort::LastSeen,
        Some(other) => {
            return Err(CoreError::validation("sort", format!("unknown sort key {other:?}")).into());
        }
    };

    let page = state
        .store
        .list_devices(
            PageRequest {
                page: query.page,
                page_size: query.page_size,
            },
            &filter,
            sort,
        )
        .await?;
    Ok(ok_paged(&page.items, page.meta))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    ip: String,
    #[serde(default)]
    name: Option<String>,
}

pub async fn create(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CreateBody>,
) -> ApiResult {
    let ip: IpAddr = body
        .ip
        .parse()
        .map_err(|_| CoreError::validation("ip", format!("{:?} is not an IP address", body.ip)))?;

    let result = state.discovery.probe_address(ip).await?;
    let mut device = result.device;
    if let Some(name) = body.name {
        device.name = Some(name);
        state.store.update_device(&device).await?;
    }
    Ok(ok(device))
}

pub async fn get_one(State(state): State<Arc<ServerState>>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(state.store.get_device(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

pub async fn update(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBody>,
) -> ApiResult {
    let mut device = state.store.get_device(id).await?;

    if let Some(name) = body.name {
        device.name = if name.is_empty() { None } else { Some(name) };
    }
    if let Some(ip) = body.ip {
        let parsed: IpAddr = ip
            .parse()
            .map_err(|_| CoreError::validation("ip", format!("{ip:?} is not an IP address")))?;
        if parsed != device.ip {
            // The old client is bound to the old address.
            state.clients.invalidate(device.ip);
            device.ip = parsed;
        }
    }
    if let Some(status) = body.status {
        device.status = status
            .parse()
            .map_err(|_| CoreError::validation("status", format!("unknown status {status:?}")))?;
    }

    state.store.update_device(&device).await?;
    Ok(ok(device))
}

pub async fn remove(State(state): State<Arc<ServerState>>, Path(id): Path<i64>) -> ApiResult {
    let device = state.store.get_device(id).await?;
    state.store.delete_device(id).await?;
    state.clients.invalidate(device.ip);
    Ok(ok(serde_json::json!({ "deleted": id })))
}

pub async fn status(State(state): State<Arc<ServerState>>, Path(id): Path<i64>) -> ApiResult {
    let device = state.store.get_device(id).await?;
    let client = state.clients.get_or_connect(device.ip, None).await?;
    let status = client.get_status().await?;
    Ok(ok(status))
}

#[derive(Debug, Deserialize)]
pub struct EnergyQuery {
    #[serde(default)]
    channel: u8,
}

pub async fn energy(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    Query(query): Query<EnergyQuery>,
) -> ApiResult {
    let device = state.store.get_device(id).await?;
    let client = state.clients.get_or_connect(device.ip, None).await?;
    let reading = client.get_energy(query.channel).await?;
    Ok(ok(reading))
}

#[derive(Debug, Deserialize)]
pub struct ControlBody {
    action: String,
    #[serde(default)]
    channel: u8,
    #[serde(default)]
    brightness: Option<u8>,
    #[serde(default)]
    rgb: Option<[u8; 3]>,
    #[serde(default)]
    color_temp: Option<u32>,
    #[serde(default)]
    position: Option<u8>,
}

pub async fn control(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    Json(body): Json<ControlBody>,
) -> ApiResult {
    let device = state.store.get_device(id).await?;
    let client = state.clients.get_or_connect(device.ip, None).await?;
    let channel = body.channel;

    let result: Result<serde_json::Value, ApiError> = match body.action.as_str() {
        "on" => {
            let switch = client.set_switch(channel, true).await?;
            Ok(serde_json::to_value(switch).unwrap_or_default())
        }
        "off" => {
            let switch = client.set_switch(channel, false).await?;
            Ok(serde_json::to_value(switch).unwrap_or_default())
        }
        "brightness" => {
            let level = body.brightness.ok_or_else(|| {
                ApiError(CoreError::validation("brightness", "required for this action"))
            })?;
            client.set_brightness(channel, level).await?;
            Ok(serde_json::json!({ "brightness": level }))
        }
        "color" => {
            let [r, g, b] = body.rgb.ok_or_else(|| {
                ApiError(CoreError::validation("rgb", "required for this action"))
            })?;
            client.set_color_rgb(channel, r, g, b).await?;
            Ok(serde_json::json!({ "rgb": [r, g, b] }))
        }
        "color_temp" => {
            let kelvin = body.color_temp.ok_or_else(|| {
                ApiError(CoreError::validation("color_temp", "required for this action"))
            })?;
            client.set_color_temp(channel, kelvin).await?;
            Ok(serde_json::json!({ "color_temp": kelvin }))
        }
        "roller_open" => {
            client.roller_open(channel).await?;
            Ok(serde_json::json!({ "roller": "open" }))
        }
        "roller_close" => {
            client.roller_close(channel).await?;
            Ok(serde_json::json!({ "roller": "close" }))
        }
        "roller_stop" => {
            client.roller_stop(channel).await?;
            Ok(serde_json::json!({ "roller": "stop" }))
        }
        "roller_position" => {
            let position = body.position.ok_or_else(|| {
                ApiError(CoreError::validation("position", "required for this action"))
            })?;
            client.roller_position(channel, position).await?;
            Ok(serde_json::json!({ "roller_position": position }))
        }
        "reboot" => {
            client.reboot().await?;
            Ok(serde_json::json!({ "rebooting": true }))
        }
        "check_update" => {
            let check = client.check_update().await?;
            Ok(serde_json::to_value(check).unwrap_or_default())
        }
        "update" => {
            client.perform_update().await?;
            Ok(serde_json::json!({ "updating": true }))
        }
        other => Err(ApiError(CoreError::validation(
            "action",
            format!("unknown action {other:?}"),
        ))),
    };

    Ok(ok(result?))
}
