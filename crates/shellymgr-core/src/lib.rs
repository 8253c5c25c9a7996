//! Business logic for shellymgr.
//!
//! Everything between the device protocol client (`shellymgr-api`) and
//! the outer surfaces (CLI, HTTP API): the domain model, concurrent
//! network discovery, AP-mode provisioning, the multi-backend inventory
//! store, the typed configuration model with drift detection, and the
//! plugin-based export/import engine.

pub mod config_model;
pub mod discovery;
pub mod error;
pub mod export;
pub mod model;
pub mod provision;
pub mod store;

pub use discovery::{expand_cidr, Discovery, DiscoveryConfig, DiscoveryResult};
pub use error::{CoreError, ErrorKind};

// Re-exported so consumers don't need a direct shellymgr-api dependency
// for the common types.
pub use shellymgr_api::{
    ClientCache, Credentials, DeviceConfig, DeviceIdent, EnergyReading, Generation, ShellyClient,
    TransportConfig,
};
