// Gen2+ JSON-RPC API surface.
//
// Second-generation (and later) firmware speaks JSON-RPC over HTTP at
// `POST /rpc`. Protected devices use HTTP Digest with a device-supplied
// nonce; the challenge round-trip lives in the client.

mod client;
mod models;
mod rpc;

pub use client::Gen2Client;
pub use models::{parse_config, Gen2DeviceInfo};
pub use rpc::{RpcError, RpcRequest, RpcResponse};
