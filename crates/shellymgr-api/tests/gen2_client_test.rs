#![allow(clippy::unwrap_used)]
// Integration tests for `Gen2Client`: RPC envelope handling and the
// digest challenge round-trip.

use std::time::Duration;

use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use shellymgr_api::gen2::Gen2Client;
use shellymgr_api::{Credentials, Error, TransportConfig};

const REALM: &str = "shellyplus1-a8032ab12345";
const NONCE: &str = "60dc3900";

fn fast_transport() -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        retries: 3,
        retry_delay: Duration::ZERO,
    }
}

async fn setup(credentials: Option<Credentials>) -> (MockServer, Gen2Client) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = Gen2Client::new(base_url, credentials, &fast_transport()).unwrap();
    (server, client)
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

// ── RPC basics ──────────────────────────────────────────────────────

#[tokio::test]
async fn device_info_round_trip() {
    let (server, client) = setup(None).await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "result": {
                "id": "shellyplus1-a8032ab12345",
                "mac": "A8032AB12345",
                "model": "SNSW-001X16EU",
                "gen": 2,
                "fw_id": "20231219-133953/1.1.0-g34b5d4f",
                "ver": "1.1.0",
                "app": "Plus1",
                "auth_en": false
            }
        })))
        .mount(&server)
        .await;

    let (info, raw) = client.device_info().await.unwrap();
    assert_eq!(info.mac, "A8032AB12345");
    assert_eq!(info.generation, 2);
    assert!(!info.auth_en);
    assert_eq!(raw["app"], "Plus1");
}

#[tokio::test]
async fn rpc_error_frame_maps_to_device_error() {
    let (server, client) = setup(None).await;

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "error": {"code": -103, "message": "Invalid argument 'id'!"}
        })))
        .mount(&server)
        .await;

    let result = client.switch_set(7, true).await;
    match result {
        Err(Error::Device { code, message }) => {
            assert_eq!(code, -103);
            assert!(message.contains("Invalid argument"));
        }
        other => panic!("expected Device error, got: {other:?}"),
    }
}

// ── Digest authentication ───────────────────────────────────────────

/// Matches a request whose `Authorization` digest response is correct
/// for the known credentials, recomputing the hash with the request's
/// own cnonce.
struct ValidDigest {
    username: String,
    password: String,
}

fn auth_param(header: &str, key: &str) -> Option<String> {
    let marker = format!("{key}=");
    let start = header.find(&marker)? + marker.len();
    let rest = &header[start..];
    let value = if let Some(stripped) = rest.strip_prefix('"') {
        stripped.split('"').next()?
    } else {
        rest.split([',', ' ']).next()?
    };
    Some(value.to_owned())
}

impl Match for ValidDigest {
    fn matches(&self, request: &Request) -> bool {
        let Some(header) = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let (Some(username), Some(nonce), Some(cnonce), Some(nc), Some(response)) = (
            auth_param(header, "username"),
            auth_param(header, "nonce"),
            auth_param(header, "cnonce"),
            auth_param(header, "nc"),
            auth_param(header, "response"),
        ) else {
            return false;
        };
        if username != self.username || nonce != NONCE {
            return false;
        }
        let ha1 = sha256_hex(&format!("{}:{REALM}:{}", self.username, self.password));
        let ha2 = sha256_hex("POST:/rpc");
        let expected = sha256_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"));
        response == expected
    }
}

#[tokio::test]
async fn digest_challenge_triggers_exactly_one_authenticated_retry() {
    let creds = Credentials::new("admin", "p@ss");
    let (server, client) = setup(Some(creds)).await;

    let challenge = format!(
        "Digest qop=\"auth\", realm=\"{REALM}\", nonce=\"{NONCE}\", algorithm=SHA-256"
    );

    // Authenticated request with a valid digest succeeds.
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(ValidDigest {
            username: "admin".into(),
            password: "p@ss".into(),
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "result": {"was_on": false}
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Anything else gets the challenge.
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge))
        .expect(1)
        .mount(&server)
        .await;

    client.switch_set(0, true).await.unwrap();
}

#[tokio::test]
async fn rejected_digest_surfaces_auth_failed() {
    let creds = Credentials::new("admin", "wrong");
    let (server, client) = setup(Some(creds)).await;

    let challenge = format!(
        "Digest qop=\"auth\", realm=\"{REALM}\", nonce=\"{NONCE}\", algorithm=SHA-256"
    );

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge),
        )
        .expect(2)
        .mount(&server)
        .await;

    let result = client.switch_set(0, true).await;
    assert!(
        matches!(result, Err(Error::AuthFailed { .. })),
        "got: {result:?}"
    );
}

#[tokio::test]
async fn stale_nonce_gets_one_renonce_retry() {
    let creds = Credentials::new("admin", "p@ss");
    let (server, client) = setup(Some(creds)).await;

    let first = format!(
        "Digest qop=\"auth\", realm=\"{REALM}\", nonce=\"expired\", algorithm=SHA-256"
    );
    let stale = format!(
        "Digest qop=\"auth\", realm=\"{REALM}\", nonce=\"{NONCE}\", algorithm=SHA-256, stale=true"
    );

    // Third request (fresh nonce) succeeds.
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(ValidDigest {
            username: "admin".into(),
            password: "p@ss".into(),
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "result": {"was_on": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Second request (expired nonce) is rejected as stale.
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(wiremock::matchers::header_exists("authorization"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", stale))
        .expect(1)
        .mount(&server)
        .await;

    // First request (no auth) gets the initial challenge.
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", first))
        .expect(1)
        .mount(&server)
        .await;

    client.switch_set(0, false).await.unwrap();
}

#[tokio::test]
async fn missing_credentials_surface_auth_required() {
    let (server, client) = setup(None).await;

    let challenge =
        format!("Digest qop=\"auth\", realm=\"{REALM}\", nonce=\"{NONCE}\", algorithm=SHA-256");

    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge))
        .mount(&server)
        .await;

    let result = client.status().await;
    assert!(matches!(result, Err(Error::AuthRequired)), "got: {result:?}");
}
