// ── Domain model ──
//
// Canonical entity types shared by every core subsystem. Persistence
// details live in `store`; these types carry no SQL.

mod config;
mod device;
mod history;
mod mac;
mod page;

pub use config::{
    ConfigurationTemplate, DeviceConfiguration, DriftEntry, DriftReport, DriftSeverity,
    NewTemplate, SyncStatus,
};
pub use device::{Device, DeviceStatus, DiscoveredDevice, MergeOutcome, NewDevice};
pub use history::{ExportRecord, ImportRecord};
pub use mac::MacAddress;
pub use page::{Page, PageMeta, PageRequest};
