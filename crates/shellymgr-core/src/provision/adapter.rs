// ── Platform network adapter ──
//
// Joining an AP and scanning SSIDs is OS-specific; the provisioner only
// sees this trait. Tests inject scripted doubles; deployments wire a
// platform backend. Where none is available, `NoopAdapter` makes every
// operation fail loudly instead of pretending.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::CoreError;

/// One Wi-Fi network as seen by a scan.
#[derive(Debug, Clone)]
pub struct WifiNetwork {
    pub ssid: String,
    pub signal_percent: Option<u8>,
}

/// OS-level Wi-Fi and neighbour operations the provisioner depends on.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    /// Scan nearby SSIDs.
    async fn scan_ssids(&self) -> Result<Vec<WifiNetwork>, CoreError>;

    /// Associate with a network. `password: None` means a known/open
    /// network (the manager's own Wi-Fi, or a factory AP).
    async fn join_network(&self, ssid: &str, password: Option<&str>) -> Result<(), CoreError>;

    /// SSID currently associated, if any.
    async fn current_network(&self) -> Result<Option<String>, CoreError>;

    /// Look for a MAC (full or suffix) on the current network via
    /// ARP/ping/mDNS, returning its address once seen.
    async fn find_mac(&self, mac_suffix: &str) -> Result<Option<IpAddr>, CoreError>;
}

/// Adapter for platforms without Wi-Fi control. Every operation fails
/// with a clear message so callers surface the limitation honestly.
pub struct NoopAdapter;

fn unsupported() -> CoreError {
    CoreError::Internal("no platform Wi-Fi adapter available on this host".into())
}

#[async_trait]
impl NetworkAdapter for NoopAdapter {
    async fn scan_ssids(&self) -> Result<Vec<WifiNetwork>, CoreError> {
        Err(unsupported())
    }

    async fn join_network(&self, _ssid: &str, _password: Option<&str>) -> Result<(), CoreError> {
        Err(unsupported())
    }

    async fn current_network(&self) -> Result<Option<String>, CoreError> {
        Err(unsupported())
    }

    async fn find_mac(&self, _mac_suffix: &str) -> Result<Option<IpAddr>, CoreError> {
        Err(unsupported())
    }
}
