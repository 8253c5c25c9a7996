// Shared transport configuration for building reqwest::Client instances.
//
// Gen1 and Gen2 clients share timeout and retry settings through this
// module. Devices speak plain HTTP on the LAN; there is no TLS story.

use std::time::Duration;

use crate::error::Error;

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Overall per-request deadline.
    pub timeout: Duration,
    /// TCP connect deadline (devices on the wrong VLAN hang otherwise).
    pub connect_timeout: Duration,
    /// Attempts for transport-level failures (connection refused, EOF).
    pub retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    /// A config suitable for discovery probes: short deadline, no retries.
    pub fn probe(budget: Duration) -> Self {
        Self {
            timeout: budget,
            connect_timeout: budget,
            retries: 1,
            retry_delay: Duration::ZERO,
        }
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("shellymgr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Transport)
    }
}
