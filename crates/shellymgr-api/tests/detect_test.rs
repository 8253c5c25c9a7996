#![allow(clippy::unwrap_used)]
// Generation detection and facade-level normalisation tests.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shellymgr_api::{Error, Generation, ShellyClient, TransportConfig};

fn fast_transport() -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        retries: 2,
        retry_delay: Duration::ZERO,
    }
}

async fn connect(server: &MockServer) -> Result<ShellyClient, Error> {
    let url = Url::parse(&server.uri()).unwrap();
    ShellyClient::connect_url(url, None, &fast_transport()).await
}

fn mount_gen2_info(_server: &MockServer) -> Mock {
    Mock::given(method("POST")).and(path("/rpc")).respond_with(
        ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "result": {
                "id": "shellyplus1-a8032ab12345",
                "mac": "A8:03:2A:B1:23:45",
                "model": "SNSW-001X16EU",
                "gen": 2,
                "ver": "1.1.0",
                "auth_en": false
            }
        })),
    )
}

#[tokio::test]
async fn gen2_device_is_pinned_gen2() {
    let server = MockServer::start().await;
    mount_gen2_info(&server).mount(&server).await;

    let client = connect(&server).await.unwrap();
    assert_eq!(client.generation(), Generation::Gen2);
    // MAC is canonicalised to uppercase colon-free form.
    assert_eq!(client.ident().mac, "A8032AB12345");
    assert_eq!(client.ident().model, "SNSW-001X16EU");
}

#[tokio::test]
async fn gen1_fallback_when_rpc_is_absent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "SHSW-25",
            "mac": "68c63a123456",
            "auth": true,
            "fw": "1.14.0"
        })))
        .mount(&server)
        .await;

    let client = connect(&server).await.unwrap();
    assert_eq!(client.generation(), Generation::Gen1);
    assert_eq!(client.ident().mac, "68C63A123456");
    assert!(client.ident().auth_required);
}

#[tokio::test]
async fn non_shelly_host_is_unreachable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "router"})))
        .mount(&server)
        .await;

    let result = connect(&server).await;
    assert!(
        matches!(result, Err(Error::Unreachable { .. })),
        "got: {result:?}"
    );
}

// ── Energy normalisation ────────────────────────────────────────────

#[tokio::test]
async fn gen1_energy_converts_watt_hours_to_kwh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "SHPLG-S",
            "mac": "AABBCCDDEEFF",
            "auth": false
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/meter/0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "power": 60.0,
            "is_valid": true,
            "total": 1500.0
        })))
        .mount(&server)
        .await;

    let client = connect(&server).await.unwrap();
    let energy = client.get_energy(0).await.unwrap();
    assert!((energy.power_w - 60.0).abs() < f64::EPSILON);
    assert!((energy.total_kwh - 1.5).abs() < f64::EPSILON);
}

// ── Switch idempotence ──────────────────────────────────────────────

#[tokio::test]
async fn set_switch_is_idempotent_per_state() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "SHSW-1",
            "mac": "AABBCCDDEEFF",
            "auth": false
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/settings/relay/0"))
        .and(query_param("turn", "on"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ison": true})))
        .expect(2)
        .mount(&server)
        .await;

    let client = connect(&server).await.unwrap();
    let first = client.set_switch(0, true).await.unwrap();
    let second = client.set_switch(0, true).await.unwrap();
    assert_eq!(first, second);
}
