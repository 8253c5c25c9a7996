// ── Concurrent network discovery ──
//
// Expands CIDR blocks to host addresses and fans probes out over a
// bounded worker pool. Workers only probe; every inventory write goes
// through the collector so merges stay serialised. A cancelled token
// aborts in-flight probes promptly.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ipnetwork::Ipv4Network;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use shellymgr_api::{ClientCache, DeviceIdent, ShellyClient, TransportConfig};

use crate::error::CoreError;
use crate::model::{Device, DeviceStatus, MacAddress, MergeOutcome, NewDevice};
use crate::store::StorageProvider;

/// Sweep parameters. `networks` backs the `auto` input.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub networks: Vec<String>,
    pub probe_timeout: Duration,
    pub concurrency: usize,
    /// Device admin port; Shelly firmware serves on 80.
    pub probe_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            probe_timeout: Duration::from_secs(2),
            concurrency: 20,
            probe_port: 80,
        }
    }
}

/// One merged discovery hit.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub device: Device,
    pub outcome: MergeOutcome,
}

/// CIDR sweep service. Cheap to clone per request.
#[derive(Clone)]
pub struct Discovery {
    store: Arc<dyn StorageProvider>,
    clients: Arc<ClientCache>,
    config: DiscoveryConfig,
}

/// Expand a CIDR block to probeable host addresses.
///
/// Network and broadcast addresses are skipped; `/31` and `/32` blocks
/// have no such reserved addresses and probe everything they list. A
/// bare IP parses as `/32`.
pub fn expand_cidr(input: &str) -> Result<Vec<Ipv4Addr>, CoreError> {
    let network: Ipv4Network = input.parse().map_err(|e| {
        CoreError::validation("cidr", format!("invalid CIDR {input:?}: {e}"))
    })?;
    let hosts: Vec<Ipv4Addr> = if network.prefix() >= 31 {
        network.iter().collect()
    } else {
        let usable = (network.size() as usize).saturating_sub(2);
        network.iter().skip(1).take(usable).collect()
    };
    Ok(hosts)
}

impl Discovery {
    pub fn new(
        store: Arc<dyn StorageProvider>,
        clients: Arc<ClientCache>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            clients,
            config,
        }
    }

    /// Resolve the caller's input: an explicit CIDR, `auto`, or empty
    /// (equivalent to `auto`, meaning the configured networks).
    fn resolve_targets(&self, input: &str) -> Result<Vec<String>, CoreError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            if self.config.networks.is_empty() {
                return Err(CoreError::validation(
                    "cidr",
                    "no networks configured for auto discovery",
                ));
            }
            return Ok(self.config.networks.clone());
        }
        Ok(vec![trimmed.to_owned()])
    }

    /// Sweep the requested range and merge every hit into the inventory.
    ///
    /// Unreachable hosts are omitted from the result set; they never fail
    /// the sweep. Results are unordered.
    pub async fn discover(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveryResult>, CoreError> {
        let mut hosts = Vec::new();
        for target in self.resolve_targets(input)? {
            hosts.extend(expand_cidr(&target)?);
        }
        info!(hosts = hosts.len(), input, "starting discovery sweep");

        let queue = Arc::new(Mutex::new(hosts.iter().copied().collect::<VecDeque<_>>()));
        let (result_tx, mut result_rx) = mpsc::channel::<(IpAddr, DeviceIdent)>(64);

        let workers = self.config.concurrency.max(1).min(hosts.len().max(1));
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            let budget = self.config.probe_timeout;
            let port = self.config.probe_port;
            handles.push(tokio::spawn(async move {
                loop {
                    let Some(ip) = queue.lock().await.pop_front() else {
                        break;
                    };
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        ident = probe_host(ip, port, budget) => {
                            if let Some(ident) = ident {
                                if result_tx.send((IpAddr::V4(ip), ident)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }));
        }
        drop(result_tx);

        // Collector: the only writer. Serialised merges keep concurrent
        // sweeps from duplicate-inserting a MAC.
        let mut results = Vec::new();
        while let Some((ip, ident)) = result_rx.recv().await {
            match self.merge(ip, &ident).await {
                Ok(result) => results.push(result),
                Err(err) => warn!(%ip, "discovery merge failed: {err}"),
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!(found = results.len(), "discovery sweep complete");
        Ok(results)
    }

    /// Probe one address and merge it; used by manual `add` and by the
    /// provisioner's adoption step.
    pub async fn probe_address(&self, ip: IpAddr) -> Result<DiscoveryResult, CoreError> {
        // Manual adds deserve the full detection budget.
        let budget = self.config.probe_timeout.max(Duration::from_secs(5));
        let transport = TransportConfig::probe(budget);
        let url = admin_url(ip, self.config.probe_port)?;
        let client = ShellyClient::connect_url(url, None, &transport).await?;
        let ident = client.ident().clone();
        self.merge(ip, &ident).await
    }

    async fn merge(&self, ip: IpAddr, ident: &DeviceIdent) -> Result<DiscoveryResult, CoreError> {
        let new = new_device_from_ident(ident, ip)?;
        let (device, outcome) = self.store.upsert_discovered(new).await?;

        if let MergeOutcome::Moved { old_ip } = outcome {
            debug!(
                mac = %device.mac, %old_ip, new_ip = %device.ip,
                "device moved, invalidating cached client"
            );
            self.clients.invalidate(old_ip);
        }

        Ok(DiscoveryResult { device, outcome })
    }
}

fn admin_url(ip: IpAddr, port: u16) -> Result<url::Url, CoreError> {
    url::Url::parse(&format!("http://{ip}:{port}"))
        .map_err(|e| CoreError::Internal(format!("bad probe URL: {e}")))
}

/// TCP pre-probe then protocol classification. `None` means "not a
/// reachable Shelly" -- the host is silently discarded.
async fn probe_host(ip: Ipv4Addr, port: u16, budget: Duration) -> Option<DeviceIdent> {
    // Cheap reachability gate before spending HTTP round-trips.
    let connect = TcpStream::connect((ip, port));
    if tokio::time::timeout(budget, connect).await.ok()?.is_err() {
        return None;
    }

    let transport = TransportConfig::probe(budget);
    let url = admin_url(IpAddr::V4(ip), port).ok()?;
    match ShellyClient::connect_url(url, None, &transport).await {
        Ok(client) => {
            let ident = client.ident().clone();
            trace!(%ip, mac = %ident.mac, "probe hit");
            Some(ident)
        }
        Err(err) => {
            trace!(%ip, "probe miss: {err}");
            None
        }
    }
}

fn new_device_from_ident(ident: &DeviceIdent, ip: IpAddr) -> Result<NewDevice, CoreError> {
    let mac = MacAddress::new(&ident.mac)?;
    let settings = json!({
        "model": ident.model,
        "gen": ident.generation.as_number(),
        "auth": ident.auth_required,
        "fw": ident.firmware,
        "raw": ident.raw,
    });

    Ok(NewDevice {
        mac,
        ip,
        name: ident.name.clone(),
        device_type: ident.model.clone(),
        generation: ident.generation,
        firmware: ident.firmware.clone(),
        status: DeviceStatus::Online,
        last_seen: Some(Utc::now()),
        settings,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn slash_32_probes_exactly_one_host() {
        let hosts = expand_cidr("192.0.2.10/32").unwrap();
        assert_eq!(hosts, vec!["192.0.2.10".parse::<Ipv4Addr>().unwrap()]);
    }

    #[test]
    fn slash_30_excludes_network_and_broadcast() {
        let hosts = expand_cidr("192.0.2.0/30").unwrap();
        assert_eq!(
            hosts,
            vec![
                "192.0.2.1".parse::<Ipv4Addr>().unwrap(),
                "192.0.2.2".parse::<Ipv4Addr>().unwrap(),
            ]
        );
    }

    #[test]
    fn slash_31_probes_both_addresses() {
        let hosts = expand_cidr("192.0.2.0/31").unwrap();
        assert_eq!(hosts.len(), 2);
    }

    #[test]
    fn bare_ip_parses_as_host() {
        let hosts = expand_cidr("192.0.2.7").unwrap();
        assert_eq!(hosts.len(), 1);
    }

    #[test]
    fn invalid_cidr_is_rejected_at_validation() {
        let err = expand_cidr("not-a-cidr").unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn slash_29_host_count() {
        let hosts = expand_cidr("192.0.2.0/29").unwrap();
        assert_eq!(hosts.len(), 6);
    }
}
