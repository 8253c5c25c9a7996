#![allow(clippy::unwrap_used)]
// Provisioner tests with a scripted network adapter and a wiremock
// device standing in for the AP-side admin endpoint.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shellymgr_api::{ClientCache, TransportConfig};
use shellymgr_core::error::CoreError;
use shellymgr_core::model::MacAddress;
use shellymgr_core::provision::{
    NetworkAdapter, ProvisionConfig, ProvisionRequest, Provisioner, StepName, StepStatus,
    WifiNetwork,
};
use shellymgr_core::store::{self, StorageConfig, StorageProvider};
use shellymgr_core::{Discovery, DiscoveryConfig};

// ── Scripted adapter ────────────────────────────────────────────────

/// Adapter double: joins always succeed (or fail after `fail_joins`),
/// the target poll reports `target_ip` after `polls_until_found` tries.
struct FakeAdapter {
    ssids: Vec<WifiNetwork>,
    target_ip: Option<IpAddr>,
    polls_until_found: u32,
    poll_count: AtomicU32,
    fail_joins: bool,
    joins: Mutex<Vec<String>>,
}

impl FakeAdapter {
    fn new(ssids: Vec<&str>, target_ip: Option<IpAddr>) -> Self {
        Self {
            ssids: ssids
                .into_iter()
                .map(|s| WifiNetwork {
                    ssid: s.to_owned(),
                    signal_percent: Some(70),
                })
                .collect(),
            target_ip,
            polls_until_found: 2,
            poll_count: AtomicU32::new(0),
            fail_joins: false,
            joins: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl NetworkAdapter for FakeAdapter {
    async fn scan_ssids(&self) -> Result<Vec<WifiNetwork>, CoreError> {
        Ok(self.ssids.clone())
    }

    async fn join_network(&self, ssid: &str, _password: Option<&str>) -> Result<(), CoreError> {
        if self.fail_joins {
            return Err(CoreError::Internal("association refused".into()));
        }
        self.joins.lock().await.push(ssid.to_owned());
        Ok(())
    }

    async fn current_network(&self) -> Result<Option<String>, CoreError> {
        Ok(Some("ManagerNet".into()))
    }

    async fn find_mac(&self, _mac_suffix: &str) -> Result<Option<IpAddr>, CoreError> {
        let polls = self.poll_count.fetch_add(1, Ordering::SeqCst) + 1;
        if polls >= self.polls_until_found {
            Ok(self.target_ip)
        } else {
            Ok(None)
        }
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

async fn memory_store() -> Arc<dyn StorageProvider> {
    let config = StorageConfig {
        dsn: "sqlite::memory:".into(),
        ..Default::default()
    };
    store::connect(&config).await.unwrap()
}

/// The wiremock server doubles as the AP-side device and, after the
/// "reboot", as the same device on the target network.
async fn mount_gen1_plug(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "SHPLG-S",
            "mac": "AA11BB112233",
            "auth": false,
            "fw": "1.14.0"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/settings/sta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/settings/cloud"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reboot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

fn provisioner_for(
    adapter: Arc<dyn NetworkAdapter>,
    store: &Arc<dyn StorageProvider>,
    ap_url: Url,
    probe_port: u16,
) -> Provisioner {
    let clients = Arc::new(ClientCache::new(TransportConfig::default()));
    let discovery = Discovery::new(
        Arc::clone(store),
        clients,
        DiscoveryConfig {
            networks: Vec::new(),
            probe_timeout: Duration::from_secs(2),
            concurrency: 4,
            probe_port,
        },
    );

    let config = ProvisionConfig {
        ap_url,
        target_wait: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
        overall_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    Provisioner::new(
        adapter,
        discovery,
        Arc::clone(store),
        config,
        Arc::new(Mutex::new(())),
    )
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn scan_ap_filters_and_records_shelly_networks() {
    let store = memory_store().await;
    let adapter = Arc::new(FakeAdapter::new(
        vec!["shellyplug-s-112233", "MyHomeWifi", "ShellyPlus1-A8032AB12345"],
        None,
    ));
    let provisioner = provisioner_for(
        adapter,
        &store,
        Url::parse("http://192.168.33.1").unwrap(),
        80,
    );

    let found = provisioner.scan_ap().await.unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().any(|d| d.ssid == "shellyplug-s-112233"));
    assert!(found.iter().all(|d| d.ssid.to_lowercase().starts_with("shelly")));

    // Scans persist for later inspection.
    let recorded = store.list_ap_devices().await.unwrap();
    assert_eq!(recorded.len(), 2);
}

#[tokio::test]
async fn provision_happy_path_adopts_with_default_name() {
    let server = MockServer::start().await;
    let url = Url::parse(&server.uri()).unwrap();
    let port = url.port().unwrap();
    mount_gen1_plug(&server).await;

    let store = memory_store().await;
    let adapter = Arc::new(FakeAdapter::new(
        vec!["shellyplug-s-112233"],
        Some("127.0.0.1".parse().unwrap()),
    ));
    let provisioner = provisioner_for(adapter, &store, url, port);

    let outcome = provisioner
        .provision(ProvisionRequest {
            device_ssid: "shellyplug-s-112233".into(),
            ssid: "home".into(),
            password: Some("p@ss".into()),
            device_name: None,
            auth_user: None,
            auth_password: None,
            mqtt_server: None,
            enable_cloud: None,
            timeout_secs: None,
        })
        .await;

    assert!(outcome.success, "steps: {:?}", outcome.steps);
    assert!(outcome
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Success));
    let adopt = outcome.steps.last().unwrap();
    assert_eq!(adopt.name, StepName::Adopt);

    let device = store
        .get_device_by_mac(&MacAddress::new("AA11BB112233").unwrap())
        .await
        .unwrap();
    assert_eq!(device.name.as_deref(), Some("Shelly-112233"));
}

#[tokio::test]
async fn provision_times_out_waiting_for_target() {
    let server = MockServer::start().await;
    let url = Url::parse(&server.uri()).unwrap();
    let port = url.port().unwrap();
    mount_gen1_plug(&server).await;

    let store = memory_store().await;
    // find_mac never reports the device.
    let adapter = Arc::new(FakeAdapter::new(vec!["shellyplug-s-112233"], None));
    let provisioner = provisioner_for(adapter, &store, url, port);

    let outcome = provisioner
        .provision(ProvisionRequest {
            device_ssid: "shellyplug-s-112233".into(),
            ssid: "home".into(),
            password: Some("p@ss".into()),
            device_name: None,
            auth_user: None,
            auth_password: None,
            mqtt_server: None,
            enable_cloud: None,
            timeout_secs: Some(3),
        })
        .await;

    assert!(!outcome.success);
    let wait = outcome
        .steps
        .iter()
        .find(|s| s.name == StepName::WaitOnTarget)
        .unwrap();
    assert_eq!(wait.status, StepStatus::Failed);
    let adopt = outcome
        .steps
        .iter()
        .find(|s| s.name == StepName::Adopt)
        .unwrap();
    assert_eq!(adopt.status, StepStatus::Pending);
}

#[tokio::test]
async fn ap_join_failure_stops_the_machine() {
    let store = memory_store().await;
    let mut adapter = FakeAdapter::new(vec!["shellyplug-s-112233"], None);
    adapter.fail_joins = true;
    let provisioner = provisioner_for(
        Arc::new(adapter),
        &store,
        Url::parse("http://192.168.33.1").unwrap(),
        80,
    );

    let outcome = provisioner
        .provision(ProvisionRequest {
            device_ssid: "shellyplug-s-112233".into(),
            ssid: "home".into(),
            password: None,
            device_name: None,
            auth_user: None,
            auth_password: None,
            mqtt_server: None,
            enable_cloud: None,
            timeout_secs: Some(5),
        })
        .await;

    assert!(!outcome.success);
    let join = &outcome.steps[0];
    assert_eq!(join.name, StepName::AssociateAp);
    assert_eq!(join.status, StepStatus::Failed);
    assert!(join.error.as_deref().unwrap_or("").contains("APJoinFailed"));
    // Nothing after the failed step ran.
    assert!(outcome.steps[1..]
        .iter()
        .all(|s| s.status == StepStatus::Pending));
}

#[tokio::test]
async fn batch_results_come_back_in_dispatch_order() {
    let server = MockServer::start().await;
    let url = Url::parse(&server.uri()).unwrap();
    let port = url.port().unwrap();
    mount_gen1_plug(&server).await;

    let store = memory_store().await;
    let adapter = Arc::new(FakeAdapter::new(
        vec!["shellyplug-s-112233"],
        Some("127.0.0.1".parse().unwrap()),
    ));
    let provisioner = provisioner_for(adapter, &store, url, port);

    let outcomes = provisioner
        .provision_batch(vec![
            ProvisionRequest {
                device_ssid: "shellyplug-s-112233".into(),
                ssid: "home".into(),
                password: Some("p@ss".into()),
                device_name: None,
                auth_user: None,
                auth_password: None,
                mqtt_server: None,
                enable_cloud: None,
                timeout_secs: None,
            },
            ProvisionRequest {
                device_ssid: "not-a-shelly".into(),
                ssid: "home".into(),
                password: None,
                device_name: None,
                auth_user: None,
                auth_password: None,
                mqtt_server: None,
                enable_cloud: None,
                timeout_secs: Some(2),
            },
        ])
        .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].device_ssid, "shellyplug-s-112233");
    assert!(outcomes[0].success);
    assert_eq!(outcomes[1].device_ssid, "not-a-shelly");
    assert!(!outcomes[1].success);
}
