//! Async client for Shelly smart-home devices.
//!
//! Two incompatible firmware families hide behind one facade:
//!
//! - **Gen1**: REST-ish endpoints (`/shelly`, `/status`, `/settings`),
//!   HTTP Basic when protected.
//! - **Gen2+**: JSON-RPC over HTTP at `/rpc`, HTTP Digest when protected.
//!
//! [`ShellyClient::connect`] probes the host, pins the generation, and
//! returns a client with a uniform operation set. [`ClientCache`] shares
//! one client per IP across concurrent callers.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gen1;
pub mod gen2;
pub mod model;
pub mod transport;

pub use auth::{Credentials, DigestAlgorithm, DigestChallenge};
pub use cache::ClientCache;
pub use client::ShellyClient;
pub use config::{
    AuthConfig, CloudConfig, DeviceConfig, InputConfig, Ipv4Mode, LedConfig, LightConfig,
    MqttConfig, RelayConfig, RollerConfig, SntpConfig, WifiApConfig, WifiStaConfig,
};
pub use error::Error;
pub use model::{
    canonical_mac, DeviceIdent, EnergyReading, Generation, SwitchState, UpdateCheck,
};
pub use transport::TransportConfig;
