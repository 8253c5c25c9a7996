// ── Unprovisioned-device onboarding ──
//
// Walks a factory-fresh device from its own AP onto the target Wi-Fi:
//
//   IDLE → ASSOCIATE_AP → REACH_DEVICE → AUTH_IF_NEEDED
//        → PUSH_CONFIG → COMMIT → WAIT_ON_TARGET → ADOPT
//
// AP association is mutually exclusive on every OS we care about, so
// provisioning is serialised through a process-global lock. Each step
// leaves a record; a partial failure returns the records so the caller
// can show progress.

mod adapter;
mod ssid;

pub use adapter::{NetworkAdapter, NoopAdapter, WifiNetwork};
pub use ssid::{parse_shelly_ssid, ParsedSsid};

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shellymgr_api::{
    AuthConfig, CloudConfig, Credentials, DeviceConfig, MqttConfig, ShellyClient, TransportConfig,
    WifiStaConfig,
};

use crate::discovery::Discovery;
use crate::error::CoreError;
use crate::model::{Device, DiscoveredDevice};
use crate::store::StorageProvider;

// ── Step records ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StepName {
    AssociateAp,
    ReachDevice,
    AuthIfNeeded,
    PushConfig,
    Commit,
    WaitOnTarget,
    Adopt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Success,
    Failed,
}

/// One executed (or pending) step of a provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningStep {
    pub name: StepName,
    pub status: StepStatus,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Request / outcome ───────────────────────────────────────────────

/// What to push onto the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Factory AP to provision (e.g. `shellyplug-s-112233`).
    pub device_ssid: String,
    /// Target Wi-Fi.
    pub ssid: String,
    pub password: Option<String>,
    /// Display name; defaults to `Shelly-<last-6-MAC>` when empty.
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub auth_user: Option<String>,
    #[serde(default)]
    pub auth_password: Option<String>,
    #[serde(default)]
    pub mqtt_server: Option<String>,
    #[serde(default)]
    pub enable_cloud: Option<bool>,
    /// Outer deadline; defaults to 600 s.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Result of one provisioning run. Successful only when every step is.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionOutcome {
    pub success: bool,
    pub device_ssid: String,
    pub steps: Vec<ProvisioningStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
}

// ── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Fixed AP-side admin address (kept on discovery records).
    pub ap_ip: IpAddr,
    /// Admin endpoint on the AP side; port 80 on real devices.
    pub ap_url: url::Url,
    pub join_attempts: u32,
    pub scan_timeout: Duration,
    pub target_wait: Duration,
    pub poll_interval: Duration,
    pub overall_timeout: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            ap_ip: IpAddr::V4(std::net::Ipv4Addr::new(192, 168, 33, 1)),
            ap_url: url::Url::parse("http://192.168.33.1")
                .expect("static AP URL parses"),
            join_attempts: 3,
            scan_timeout: Duration::from_secs(30),
            target_wait: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
            overall_timeout: Duration::from_secs(600),
        }
    }
}

// ── Service ─────────────────────────────────────────────────────────

/// Onboarding service. AP association is process-global, so all
/// provisioning runs serialise on `ap_lock`.
pub struct Provisioner {
    adapter: Arc<dyn NetworkAdapter>,
    discovery: Discovery,
    store: Arc<dyn StorageProvider>,
    config: ProvisionConfig,
    ap_lock: Arc<Mutex<()>>,
}

impl Provisioner {
    pub fn new(
        adapter: Arc<dyn NetworkAdapter>,
        discovery: Discovery,
        store: Arc<dyn StorageProvider>,
        config: ProvisionConfig,
        ap_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            adapter,
            discovery,
            store,
            config,
            ap_lock,
        }
    }

    /// Scan for factory APs, record them, and return the current set.
    pub async fn scan_ap(&self) -> Result<Vec<DiscoveredDevice>, CoreError> {
        let networks = tokio::time::timeout(self.config.scan_timeout, self.adapter.scan_ssids())
            .await
            .map_err(|_| CoreError::Timeout {
                seconds: self.config.scan_timeout.as_secs(),
            })??;

        let mut found = Vec::new();
        for network in networks {
            let Some(parsed) = parse_shelly_ssid(&network.ssid) else {
                continue;
            };
            let device = DiscoveredDevice {
                ssid: parsed.ssid.clone(),
                mac: parsed.mac_hex.clone(),
                model: parsed.model().map(str::to_owned),
                generation: parsed.generation(),
                ip: self.config.ap_ip,
                signal_percent: network.signal_percent,
                first_seen: Utc::now(),
                agent_id: None,
            };
            self.store.upsert_ap_device(&device).await?;
            found.push(device);
        }

        info!(count = found.len(), "AP scan complete");
        Ok(found)
    }

    /// Provision a batch sequentially, emitting per-device results in
    /// dispatch order.
    pub async fn provision_batch(
        &self,
        requests: Vec<ProvisionRequest>,
    ) -> Vec<ProvisionOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.provision(request).await);
        }
        outcomes
    }

    /// Run the full onboarding state machine for one device.
    pub async fn provision(&self, request: ProvisionRequest) -> ProvisionOutcome {
        let _guard = self.ap_lock.lock().await;
        let deadline = request
            .timeout_secs
            .map_or(self.config.overall_timeout, Duration::from_secs);

        let mut run = Run::new(&request);
        match tokio::time::timeout(deadline, self.run_machine(&request, &mut run)).await {
            Ok(()) => {}
            Err(_) => run.deadline_exceeded(deadline),
        }

        let success = run.all_succeeded();
        if success {
            info!(device_ssid = %request.device_ssid, "provisioning complete");
        } else {
            warn!(device_ssid = %request.device_ssid, "provisioning failed");
        }
        ProvisionOutcome {
            success,
            device_ssid: request.device_ssid.clone(),
            steps: run.steps,
            device: run.device,
        }
    }

    async fn run_machine(&self, request: &ProvisionRequest, run: &mut Run) {
        let Some(parsed) = parse_shelly_ssid(&request.device_ssid) else {
            run.fail_next(format!(
                "{:?} is not a Shelly factory AP",
                request.device_ssid
            ));
            return;
        };

        // ASSOCIATE_AP
        let manager_network = match self.associate_ap(request, run).await {
            Some(net) => net,
            None => return,
        };

        // REACH_DEVICE
        let Some(client) = self.reach_device(run).await else {
            return;
        };

        // AUTH_IF_NEEDED
        let Some(client) = self.auth_if_needed(request, client, run).await else {
            return;
        };

        // PUSH_CONFIG
        let Some(device_name) = self.push_config(request, &parsed, &client, run).await else {
            return;
        };

        // COMMIT
        if !run
            .step(StepName::Commit, client.reboot(), "apply failed")
            .await
        {
            return;
        }

        // WAIT_ON_TARGET
        let Some(ip) = self.wait_on_target(&parsed, manager_network, run).await else {
            return;
        };

        // ADOPT
        let started = run.start(StepName::Adopt);
        match self.discovery.probe_address(ip).await {
            Ok(result) => {
                let mut device = result.device;
                // Gen1 identification carries no display name; record the
                // one we just pushed.
                if device.name.is_none() {
                    device.name = Some(device_name);
                    if let Err(err) = self.store.update_device(&device).await {
                        run.finish_err(StepName::Adopt, started, err.to_string());
                        return;
                    }
                }
                run.finish_ok(StepName::Adopt, started);
                run.device = Some(device);
            }
            Err(err) => run.finish_err(StepName::Adopt, started, err.to_string()),
        }
    }

    async fn associate_ap(&self, request: &ProvisionRequest, run: &mut Run) -> Option<Option<String>> {
        let started = run.start(StepName::AssociateAp);

        // Remember where to come back to.
        let manager_network = self.adapter.current_network().await.ok().flatten();

        let mut last_err = String::from("APJoinFailed");
        for attempt in 1..=self.config.join_attempts {
            debug!(ssid = %request.device_ssid, attempt, "joining device AP");
            match self.adapter.join_network(&request.device_ssid, None).await {
                Ok(()) => {
                    run.finish_ok(StepName::AssociateAp, started);
                    return Some(manager_network);
                }
                Err(err) => last_err = format!("APJoinFailed: {err}"),
            }
        }
        run.finish_err(StepName::AssociateAp, started, last_err);
        None
    }

    async fn reach_device(&self, run: &mut Run) -> Option<ShellyClient> {
        let started = run.start(StepName::ReachDevice);
        let transport = TransportConfig::probe(Duration::from_secs(5));
        match ShellyClient::connect_url(self.config.ap_url.clone(), None, &transport).await {
            Ok(client) => {
                run.finish_ok(StepName::ReachDevice, started);
                Some(client)
            }
            Err(err) => {
                run.finish_err(StepName::ReachDevice, started, format!("APUnreachable: {err}"));
                None
            }
        }
    }

    async fn auth_if_needed(
        &self,
        request: &ProvisionRequest,
        client: ShellyClient,
        run: &mut Run,
    ) -> Option<ShellyClient> {
        let started = run.start(StepName::AuthIfNeeded);

        if !client.ident().auth_required {
            run.finish_ok(StepName::AuthIfNeeded, started);
            return Some(client);
        }

        // Factory-authed device: reconnect with the caller's credentials.
        let (Some(user), Some(password)) = (&request.auth_user, &request.auth_password) else {
            run.finish_err(
                StepName::AuthIfNeeded,
                started,
                "device requires credentials and none were provided".into(),
            );
            return None;
        };

        let transport = TransportConfig::probe(Duration::from_secs(5));
        match ShellyClient::connect_url(
            self.config.ap_url.clone(),
            Some(Credentials::new(user.clone(), password.clone())),
            &transport,
        )
        .await
        {
            Ok(client) => {
                run.finish_ok(StepName::AuthIfNeeded, started);
                Some(client)
            }
            Err(err) => {
                run.finish_err(StepName::AuthIfNeeded, started, err.to_string());
                None
            }
        }
    }

    /// Push target Wi-Fi/MQTT/auth/cloud settings plus the display name.
    /// Returns the name pushed, for the adoption step.
    async fn push_config(
        &self,
        request: &ProvisionRequest,
        parsed: &ParsedSsid,
        client: &ShellyClient,
        run: &mut Run,
    ) -> Option<String> {
        let started = run.start(StepName::PushConfig);

        let diff = DeviceConfig {
            wifi_sta: Some(WifiStaConfig {
                enabled: true,
                ssid: Some(request.ssid.clone()),
                password: request.password.clone(),
                ..Default::default()
            }),
            mqtt: request.mqtt_server.as_ref().map(|server| MqttConfig {
                enabled: true,
                server: Some(server.clone()),
                ..Default::default()
            }),
            auth: match (&request.auth_user, &request.auth_password) {
                (Some(user), Some(password)) => Some(AuthConfig {
                    enabled: true,
                    user: Some(user.clone()),
                    password: Some(password.clone()),
                }),
                _ => None,
            },
            cloud: request.enable_cloud.map(|enabled| CloudConfig { enabled }),
            ..Default::default()
        };

        let name = match &request.device_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => parsed.default_name(),
        };

        let result: Result<(), CoreError> = async {
            client.set_config(&diff).await?;
            client.set_name(&name).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                run.finish_ok(StepName::PushConfig, started);
                Some(name)
            }
            Err(err) => {
                run.finish_err(StepName::PushConfig, started, err.to_string());
                None
            }
        }
    }

    async fn wait_on_target(
        &self,
        parsed: &ParsedSsid,
        manager_network: Option<String>,
        run: &mut Run,
    ) -> Option<IpAddr> {
        let started = run.start(StepName::WaitOnTarget);

        // Rejoin the manager's Wi-Fi before polling the target network.
        if let Some(network) = manager_network {
            if let Err(err) = self.adapter.join_network(&network, None).await {
                run.finish_err(
                    StepName::WaitOnTarget,
                    started,
                    format!("failed to rejoin {network:?}: {err}"),
                );
                return None;
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.target_wait;
        while tokio::time::Instant::now() < deadline {
            match self.adapter.find_mac(parsed.mac_suffix()).await {
                Ok(Some(ip)) => {
                    run.finish_ok(StepName::WaitOnTarget, started);
                    return Some(ip);
                }
                Ok(None) => {}
                Err(err) => debug!("target poll failed: {err}"),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        run.finish_err(
            StepName::WaitOnTarget,
            started,
            format!(
                "TargetTimeout: device did not appear within {}s",
                self.config.target_wait.as_secs()
            ),
        );
        None
    }
}

// ── Run bookkeeping ─────────────────────────────────────────────────

/// Mutable state of one provisioning run: ordered step records plus the
/// adopted device.
struct Run {
    steps: Vec<ProvisioningStep>,
    device: Option<Device>,
}

const ALL_STEPS: [StepName; 7] = [
    StepName::AssociateAp,
    StepName::ReachDevice,
    StepName::AuthIfNeeded,
    StepName::PushConfig,
    StepName::Commit,
    StepName::WaitOnTarget,
    StepName::Adopt,
];

impl Run {
    fn new(_request: &ProvisionRequest) -> Self {
        Self {
            steps: ALL_STEPS
                .iter()
                .map(|name| ProvisioningStep {
                    name: *name,
                    status: StepStatus::Pending,
                    started: None,
                    ended: None,
                    error: None,
                })
                .collect(),
            device: None,
        }
    }

    fn start(&mut self, name: StepName) -> DateTime<Utc> {
        let now = Utc::now();
        if let Some(step) = self.steps.iter_mut().find(|s| s.name == name) {
            step.started = Some(now);
        }
        now
    }

    fn finish_ok(&mut self, name: StepName, started: DateTime<Utc>) {
        self.finish(name, started, StepStatus::Success, None);
    }

    fn finish_err(&mut self, name: StepName, started: DateTime<Utc>, error: String) {
        self.finish(name, started, StepStatus::Failed, Some(error));
    }

    fn finish(
        &mut self,
        name: StepName,
        started: DateTime<Utc>,
        status: StepStatus,
        error: Option<String>,
    ) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.name == name) {
            step.started = Some(started);
            step.ended = Some(Utc::now());
            step.status = status;
            step.error = error;
        }
    }

    /// Run a step whose body is a single fallible future.
    async fn step<T, E: std::fmt::Display>(
        &mut self,
        name: StepName,
        fut: impl std::future::Future<Output = Result<T, E>>,
        context: &str,
    ) -> bool {
        let started = self.start(name);
        match fut.await {
            Ok(_) => {
                self.finish_ok(name, started);
                true
            }
            Err(err) => {
                self.finish_err(name, started, format!("{context}: {err}"));
                false
            }
        }
    }

    /// Fail the first still-pending step (used for pre-step validation).
    fn fail_next(&mut self, error: String) {
        let now = Utc::now();
        if let Some(step) = self
            .steps
            .iter_mut()
            .find(|s| s.status == StepStatus::Pending)
        {
            step.started = Some(now);
            step.ended = Some(now);
            step.status = StepStatus::Failed;
            step.error = Some(error);
        }
    }

    /// Mark the step in flight as failed after the outer deadline fired.
    fn deadline_exceeded(&mut self, deadline: Duration) {
        let message = format!("provisioning deadline of {}s exceeded", deadline.as_secs());
        if let Some(step) = self
            .steps
            .iter_mut()
            .find(|s| s.started.is_some() && s.ended.is_none())
        {
            step.ended = Some(Utc::now());
            step.status = StepStatus::Failed;
            step.error = Some(message);
        } else {
            self.fail_next(message);
        }
    }

    fn all_succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Success)
    }
}
