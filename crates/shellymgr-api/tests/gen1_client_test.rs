#![allow(clippy::unwrap_used)]
// Integration tests for `Gen1Client` using wiremock.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shellymgr_api::gen1::Gen1Client;
use shellymgr_api::{Credentials, Error, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_transport() -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        retries: 3,
        retry_delay: Duration::ZERO,
    }
}

async fn setup(credentials: Option<Credentials>) -> (MockServer, Gen1Client) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = Gen1Client::new(base_url, credentials, &fast_transport()).unwrap();
    (server, client)
}

// ── Identification ──────────────────────────────────────────────────

#[tokio::test]
async fn ident_parses_shelly_endpoint() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "SHSW-25",
            "mac": "68C63A123456",
            "auth": false,
            "fw": "1.14.0",
            "num_outputs": 2
        })))
        .mount(&server)
        .await;

    let (ident, raw) = client.ident().await.unwrap();
    assert_eq!(ident.device_type, "SHSW-25");
    assert_eq!(ident.mac, "68C63A123456");
    assert!(!ident.auth);
    assert_eq!(ident.fw.as_deref(), Some("1.14.0"));
    assert_eq!(raw["num_outputs"], 2);
}

#[tokio::test]
async fn ident_rejects_non_shelly_payload() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hello": "world"})))
        .mount(&server)
        .await;

    let result = client.ident().await;
    assert!(matches!(result, Err(Error::Protocol { .. })), "got: {result:?}");
}

// ── Control ─────────────────────────────────────────────────────────

#[tokio::test]
async fn set_relay_hits_settings_endpoint() {
    let (server, client) = setup(None).await;

    Mock::given(method("POST"))
        .and(path("/settings/relay/0"))
        .and(query_param("turn", "on"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ison": true})))
        .expect(1)
        .mount(&server)
        .await;

    client.set_relay(0, true).await.unwrap();
}

#[tokio::test]
async fn meter_returns_raw_watt_hours() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/meter/0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "power": 23.45,
            "is_valid": true,
            "total": 1234.0
        })))
        .mount(&server)
        .await;

    let meter = client.meter(0).await.unwrap();
    assert!((meter.power - 23.45).abs() < f64::EPSILON);
    assert!((meter.total - 1234.0).abs() < f64::EPSILON);
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn basic_auth_retry_after_401() {
    let creds = Credentials::new("admin", "secret");
    let (server, client) = setup(Some(creds)).await;

    // "admin:secret" base64-encoded.
    Mock::given(method("GET"))
        .and(path("/status"))
        .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "relays": [{"ison": true, "has_timer": false}],
            "uptime": 42
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let (status, _raw) = client.status().await.unwrap();
    assert_eq!(status.relays.len(), 1);
    assert!(status.relays[0].ison);
}

#[tokio::test]
async fn missing_credentials_surface_auth_required() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/settings"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.settings().await;
    assert!(matches!(result, Err(Error::AuthRequired)), "got: {result:?}");
}

#[tokio::test]
async fn persistent_401_surfaces_auth_failed() {
    let creds = Credentials::new("admin", "wrong");
    let (server, client) = setup(Some(creds)).await;

    Mock::given(method("GET"))
        .and(path("/settings"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let result = client.settings().await;
    assert!(
        matches!(result, Err(Error::AuthFailed { .. })),
        "got: {result:?}"
    );
}

// ── Retries ─────────────────────────────────────────────────────────

#[tokio::test]
async fn server_errors_are_retried() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
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

    let (ident, _) = client.ident().await.unwrap();
    assert_eq!(ident.device_type, "SHPLG-S");
}

#[tokio::test]
async fn http_4xx_is_not_retried() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path("/meter/9"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.meter(9).await;
    assert!(
        matches!(result, Err(Error::Device { code: 404, .. })),
        "got: {result:?}"
    );
}
