// JSON-RPC envelope types for the Gen2 `/rpc` endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound RPC frame. `id` is per-client monotonic.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Error frame reported by the device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Inbound RPC frame: exactly one of `result` / `error` is present.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[allow(dead_code)]
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}
