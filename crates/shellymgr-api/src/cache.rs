// ── Per-host client cache ──
//
// One `ShellyClient` per IP, shared by every concurrent caller so a
// device sees a single HTTP transport and its detected generation is
// probed exactly once. Entries own transport state only -- never the
// inventory record.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::auth::Credentials;
use crate::client::ShellyClient;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Cache of connected device clients, keyed by IP.
///
/// Lookups take the read lock; insertions take the write lock and
/// re-check presence so two racing connects keep a single winner.
/// Invalidated entries finish their in-flight calls (holders keep
/// their `Arc`) and the next lookup connects fresh.
pub struct ClientCache {
    transport: TransportConfig,
    clients: RwLock<HashMap<IpAddr, Arc<ShellyClient>>>,
}

impl ClientCache {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// The transport config cached clients are built with.
    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// Look up a cached client without connecting.
    pub fn get(&self, ip: IpAddr) -> Option<Arc<ShellyClient>> {
        self.clients
            .read()
            .expect("client cache lock poisoned")
            .get(&ip)
            .cloned()
    }

    /// Return the cached client for `ip`, connecting (and detecting the
    /// generation) if none exists yet.
    pub async fn get_or_connect(
        &self,
        ip: IpAddr,
        credentials: Option<Credentials>,
    ) -> Result<Arc<ShellyClient>, Error> {
        if let Some(client) = self.get(ip) {
            return Ok(client);
        }

        // Detection happens outside any lock; a concurrent caller may win
        // the race, in which case its client is kept and ours is dropped.
        let client = Arc::new(ShellyClient::connect(ip, credentials, &self.transport).await?);

        let mut guard = self.clients.write().expect("client cache lock poisoned");
        if let Some(existing) = guard.get(&ip) {
            return Ok(Arc::clone(existing));
        }
        guard.insert(ip, Arc::clone(&client));
        Ok(client)
    }

    /// Insert a ready client (cache warming after an out-of-band connect).
    /// An existing entry for the IP is kept.
    pub fn insert(&self, ip: IpAddr, client: Arc<ShellyClient>) {
        self.clients
            .write()
            .expect("client cache lock poisoned")
            .entry(ip)
            .or_insert(client);
    }

    /// Drop the cached client for one IP (e.g. after the device moved).
    pub fn invalidate(&self, ip: IpAddr) {
        let removed = self
            .clients
            .write()
            .expect("client cache lock poisoned")
            .remove(&ip);
        if removed.is_some() {
            debug!(%ip, "invalidated cached device client");
        }
    }

    /// Drop every cached client.
    pub fn invalidate_all(&self) {
        self.clients
            .write()
            .expect("client cache lock poisoned")
            .clear();
        debug!("invalidated all cached device clients");
    }

    /// Number of live cache entries.
    pub fn len(&self) -> usize {
        self.clients
            .read()
            .expect("client cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
