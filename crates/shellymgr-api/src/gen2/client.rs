// Gen2 RPC client
//
// All operations go through `rpc()`, which owns the retry/auth discipline:
// bounded transport retries with fixed delay, digest challenge handling on
// 401 with a single re-nonce retry, and RPC error frame mapping.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use url::Url;

use crate::auth::{Credentials, DigestChallenge};
use crate::config::DeviceConfig;
use crate::error::Error;
use crate::transport::TransportConfig;

use super::models::{parse_config, Gen2DeviceInfo};
use super::rpc::{RpcRequest, RpcResponse};

/// RPC client for a single Gen2+ device.
#[derive(Debug)]
pub struct Gen2Client {
    http: reqwest::Client,
    base_url: Url,
    credentials: Option<Credentials>,
    transport: TransportConfig,
    next_id: AtomicU64,
    /// Last digest challenge seen; reused so follow-up requests
    /// authenticate without an extra 401 round-trip.
    challenge: RwLock<Option<DigestChallenge>>,
}

impl Gen2Client {
    pub fn new(
        base_url: Url,
        credentials: Option<Credentials>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            credentials,
            transport: transport.clone(),
            next_id: AtomicU64::new(1),
            challenge: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
        *self.challenge.write().expect("challenge lock poisoned") = None;
    }

    // ── RPC plumbing ─────────────────────────────────────────────────

    fn cached_challenge(&self) -> Option<DigestChallenge> {
        self.challenge.read().expect("challenge lock poisoned").clone()
    }

    fn store_challenge(&self, challenge: DigestChallenge) {
        *self.challenge.write().expect("challenge lock poisoned") = Some(challenge);
    }

    /// Invoke an RPC method, returning the raw `result` value.
    pub async fn rpc(&self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let url = self.base_url.join("/rpc").map_err(Error::InvalidUrl)?;
        let timeout_secs = self.transport.timeout.as_secs();
        let frame = RpcRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let body = serde_json::to_vec(&frame).map_err(|e| Error::Protocol {
            message: format!("failed to encode RPC frame: {e}"),
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(%url, method, attempt, "RPC call");

            let mut builder = self
                .http
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let (Some(challenge), Some(creds)) = (self.cached_challenge(), &self.credentials)
            {
                builder = builder.header(
                    reqwest::header::AUTHORIZATION,
                    challenge.authorization(creds, "POST", "/rpc"),
                );
            }

            let resp = match builder.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    let err = Error::from_transport(err, timeout_secs);
                    if err.is_transient() && attempt < self.transport.retries {
                        trace!(attempt, "transport error, retrying: {err}");
                        tokio::time::sleep(self.transport.retry_delay).await;
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = resp.status();

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return self.authenticate_and_retry(&url, &body, resp).await;
            }

            if status.is_server_error() && attempt < self.transport.retries {
                trace!(attempt, %status, "server error, retrying");
                tokio::time::sleep(self.transport.retry_delay).await;
                continue;
            }

            return parse_rpc_response(resp).await;
        }
    }

    /// Handle a 401: parse the digest challenge and retry once. A second
    /// 401 is allowed one more round only if the device flags the nonce
    /// as stale.
    async fn authenticate_and_retry(
        &self,
        url: &Url,
        body: &[u8],
        resp: reqwest::Response,
    ) -> Result<Value, Error> {
        let Some(creds) = &self.credentials else {
            return Err(Error::AuthRequired);
        };

        let challenge = challenge_from_response(&resp)?;
        debug!(realm = %challenge.realm, "received digest challenge");
        self.store_challenge(challenge.clone());

        let resp = self
            .send_authed(url, body, &challenge, creds)
            .await?;

        if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
            return parse_rpc_response(resp).await;
        }

        // One re-nonce retry when the previous nonce merely expired.
        let fresh = challenge_from_response(&resp)?;
        if !fresh.stale {
            return Err(Error::AuthFailed {
                message: "device rejected digest credentials".into(),
            });
        }
        debug!("digest nonce stale, retrying once with fresh nonce");
        self.store_challenge(fresh.clone());

        let resp = self.send_authed(url, body, &fresh, creds).await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::AuthFailed {
                message: "device rejected digest credentials after re-nonce".into(),
            });
        }
        parse_rpc_response(resp).await
    }

    async fn send_authed(
        &self,
        url: &Url,
        body: &[u8],
        challenge: &DigestChallenge,
        creds: &Credentials,
    ) -> Result<reqwest::Response, Error> {
        self.http
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(
                reqwest::header::AUTHORIZATION,
                challenge.authorization(creds, "POST", "/rpc"),
            )
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| Error::from_transport(e, self.transport.timeout.as_secs()))
    }

    // ── Identification & state ───────────────────────────────────────

    /// `Shelly.GetDeviceInfo` -- works unauthenticated on every firmware.
    pub async fn device_info(&self) -> Result<(Gen2DeviceInfo, Value), Error> {
        let raw = self.rpc("Shelly.GetDeviceInfo", None).await?;
        let info = serde_json::from_value(raw.clone()).map_err(|e| Error::Protocol {
            message: format!("unexpected Shelly.GetDeviceInfo result: {e}"),
        })?;
        Ok((info, raw))
    }

    /// `Shelly.GetStatus` -- full component status map.
    pub async fn status(&self) -> Result<Value, Error> {
        self.rpc("Shelly.GetStatus", None).await
    }

    /// `Shelly.GetConfig` -- translated to the typed envelope.
    pub async fn get_config(&self) -> Result<DeviceConfig, Error> {
        let raw = self.rpc("Shelly.GetConfig", None).await?;
        Ok(parse_config(&raw))
    }

    /// `Switch.GetStatus` for one channel.
    pub async fn switch_status(&self, channel: u8) -> Result<Value, Error> {
        self.rpc("Switch.GetStatus", Some(json!({ "id": channel })))
            .await
    }

    // ── Control ──────────────────────────────────────────────────────

    pub async fn switch_set(&self, channel: u8, on: bool) -> Result<Value, Error> {
        self.rpc("Switch.Set", Some(json!({ "id": channel, "on": on })))
            .await
    }

    pub async fn light_set_brightness(&self, channel: u8, brightness: u8) -> Result<Value, Error> {
        self.rpc(
            "Light.Set",
            Some(json!({ "id": channel, "on": true, "brightness": brightness.min(100) })),
        )
        .await
    }

    pub async fn light_set_rgb(&self, channel: u8, r: u8, g: u8, b: u8) -> Result<Value, Error> {
        self.rpc(
            "RGB.Set",
            Some(json!({ "id": channel, "on": true, "rgb": [r, g, b] })),
        )
        .await
    }

    pub async fn light_set_temp(&self, channel: u8, kelvin: u32) -> Result<Value, Error> {
        self.rpc(
            "CCT.Set",
            Some(json!({ "id": channel, "on": true, "ct": kelvin })),
        )
        .await
    }

    pub async fn cover_open(&self, channel: u8) -> Result<Value, Error> {
        self.rpc("Cover.Open", Some(json!({ "id": channel }))).await
    }

    pub async fn cover_close(&self, channel: u8) -> Result<Value, Error> {
        self.rpc("Cover.Close", Some(json!({ "id": channel }))).await
    }

    pub async fn cover_stop(&self, channel: u8) -> Result<Value, Error> {
        self.rpc("Cover.Stop", Some(json!({ "id": channel }))).await
    }

    pub async fn cover_go_to_position(&self, channel: u8, position: u8) -> Result<Value, Error> {
        self.rpc(
            "Cover.GoToPosition",
            Some(json!({ "id": channel, "pos": position.min(100) })),
        )
        .await
    }

    // ── Administration ───────────────────────────────────────────────

    /// `Shelly.SetAuth` -- enable digest auth. The realm is the device id
    /// and HA1 is `SHA-256(user:realm:password)` per the Gen2 auth spec.
    pub async fn set_auth(&self, user: &str, realm: &str, password: &str) -> Result<(), Error> {
        let mut hasher = Sha256::new();
        hasher.update(format!("{user}:{realm}:{password}").as_bytes());
        let ha1 = hex::encode(hasher.finalize());
        self.rpc(
            "Shelly.SetAuth",
            Some(json!({ "user": user, "realm": realm, "ha1": ha1 })),
        )
        .await?;
        Ok(())
    }

    /// `Shelly.SetAuth` with a null HA1 disables authentication.
    pub async fn reset_auth(&self, user: &str, realm: &str) -> Result<(), Error> {
        self.rpc(
            "Shelly.SetAuth",
            Some(json!({ "user": user, "realm": realm, "ha1": Value::Null })),
        )
        .await?;
        Ok(())
    }

    pub async fn reboot(&self) -> Result<(), Error> {
        self.rpc("Shelly.Reboot", None).await?;
        Ok(())
    }

    pub async fn factory_reset(&self) -> Result<(), Error> {
        self.rpc("Shelly.FactoryReset", None).await?;
        Ok(())
    }

    /// `Shelly.CheckForUpdate` -- returns the raw availability map
    /// (`{"stable": {"version": ...}, ...}`).
    pub async fn check_update(&self) -> Result<Value, Error> {
        self.rpc("Shelly.CheckForUpdate", None).await
    }

    pub async fn perform_update(&self) -> Result<(), Error> {
        self.rpc("Shelly.Update", Some(json!({ "stage": "stable" })))
            .await?;
        Ok(())
    }

    // ── Typed configuration push ─────────────────────────────────────

    /// Push the sections present in `diff` as component `SetConfig` calls.
    ///
    /// `device_id` doubles as the digest realm for `Shelly.SetAuth`.
    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    pub async fn apply_config(&self, diff: &DeviceConfig, device_id: &str) -> Result<(), Error> {
        if diff.wifi_sta.is_some() || diff.wifi_ap.is_some() {
            let mut config = serde_json::Map::new();
            if let Some(sta) = &diff.wifi_sta {
                let mut entry = serde_json::Map::new();
                entry.insert("enable".into(), json!(sta.enabled));
                if let Some(ssid) = &sta.ssid {
                    entry.insert("ssid".into(), json!(ssid));
                }
                if let Some(pass) = &sta.password {
                    entry.insert("pass".into(), json!(pass));
                }
                entry.insert(
                    "ipv4mode".into(),
                    json!(match sta.ipv4_mode {
                        crate::config::Ipv4Mode::Dhcp => "dhcp",
                        crate::config::Ipv4Mode::Static => "static",
                    }),
                );
                if let Some(ip) = &sta.ip {
                    entry.insert("ip".into(), json!(ip));
                }
                if let Some(mask) = &sta.netmask {
                    entry.insert("netmask".into(), json!(mask));
                }
                if let Some(gw) = &sta.gateway {
                    entry.insert("gw".into(), json!(gw));
                }
                if let Some(dns) = &sta.dns {
                    entry.insert("nameserver".into(), json!(dns));
                }
                config.insert("sta".into(), Value::Object(entry));
            }
            if let Some(ap) = &diff.wifi_ap {
                let mut entry = serde_json::Map::new();
                entry.insert("enable".into(), json!(ap.enabled));
                if let Some(ssid) = &ap.ssid {
                    entry.insert("ssid".into(), json!(ssid));
                }
                if let Some(pass) = &ap.password {
                    entry.insert("pass".into(), json!(pass));
                }
                config.insert("ap".into(), Value::Object(entry));
            }
            self.rpc("WiFi.SetConfig", Some(json!({ "config": config })))
                .await?;
        }

        if let Some(mqtt) = &diff.mqtt {
            let mut entry = serde_json::Map::new();
            entry.insert("enable".into(), json!(mqtt.enabled));
            if let Some(server) = &mqtt.server {
                entry.insert("server".into(), json!(server));
            }
            if let Some(user) = &mqtt.user {
                entry.insert("user".into(), json!(user));
            }
            if let Some(pass) = &mqtt.password {
                entry.insert("pass".into(), json!(pass));
            }
            if let Some(prefix) = &mqtt.topic_prefix {
                entry.insert("topic_prefix".into(), json!(prefix));
            }
            self.rpc("MQTT.SetConfig", Some(json!({ "config": entry })))
                .await?;
        }

        if let Some(cloud) = &diff.cloud {
            self.rpc(
                "Cloud.SetConfig",
                Some(json!({ "config": { "enable": cloud.enabled } })),
            )
            .await?;
        }

        if let Some(sntp) = &diff.sntp {
            let mut config = serde_json::Map::new();
            if let Some(server) = &sntp.server {
                config.insert("sntp".into(), json!({ "server": server }));
            }
            if let Some(tz) = &sntp.timezone {
                config.insert("location".into(), json!({ "tz": tz }));
            }
            if !config.is_empty() {
                self.rpc("Sys.SetConfig", Some(json!({ "config": config })))
                    .await?;
            }
        }

        if let Some(auth) = &diff.auth {
            if auth.enabled {
                let user = auth.user.as_deref().unwrap_or("admin");
                let pass = auth.password.as_deref().ok_or_else(|| Error::Protocol {
                    message: "auth.enabled requires auth.password".into(),
                })?;
                self.set_auth(user, device_id, pass).await?;
            } else {
                let user = auth.user.as_deref().unwrap_or("admin");
                self.reset_auth(user, device_id).await?;
            }
        }

        for relay in &diff.relays {
            let mut entry = serde_json::Map::new();
            if let Some(name) = &relay.name {
                entry.insert("name".into(), json!(name));
            }
            if let Some(state) = &relay.default_state {
                entry.insert("initial_state".into(), json!(state));
            }
            if let Some(delay) = relay.auto_on_secs {
                entry.insert("auto_on".into(), json!(true));
                entry.insert("auto_on_delay".into(), json!(delay));
            }
            if let Some(delay) = relay.auto_off_secs {
                entry.insert("auto_off".into(), json!(true));
                entry.insert("auto_off_delay".into(), json!(delay));
            }
            if !entry.is_empty() {
                self.rpc(
                    "Switch.SetConfig",
                    Some(json!({ "id": relay.id, "config": entry })),
                )
                .await?;
            }
        }

        for input in &diff.inputs {
            let mut entry = serde_json::Map::new();
            if let Some(name) = &input.name {
                entry.insert("name".into(), json!(name));
            }
            if let Some(mode) = &input.mode {
                entry.insert("type".into(), json!(mode));
            }
            entry.insert("invert".into(), json!(input.inverted));
            self.rpc(
                "Input.SetConfig",
                Some(json!({ "id": input.id, "config": entry })),
            )
            .await?;
        }

        Ok(())
    }
}

fn challenge_from_response(resp: &reqwest::Response) -> Result<DigestChallenge, Error> {
    let header = resp
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Protocol {
            message: "401 without WWW-Authenticate header".into(),
        })?;
    DigestChallenge::parse(header)
}

/// Parse an `/rpc` response body into the RPC result, mapping device
/// error frames to `Error::Device`.
async fn parse_rpc_response(resp: reqwest::Response) -> Result<Value, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(Error::Transport)?;

    if !status.is_success() {
        // Some firmware reports RPC errors with a matching HTTP status
        // and an error frame body; prefer the frame when parseable.
        if let Ok(frame) = serde_json::from_str::<RpcResponse>(&body) {
            if let Some(err) = frame.error {
                return Err(Error::Device {
                    code: err.code,
                    message: err.message,
                });
            }
        }
        return Err(Error::Device {
            code: i64::from(status.as_u16()),
            message: format!("HTTP {status}: {}", &body[..body.len().min(200)]),
        });
    }

    let frame: RpcResponse = serde_json::from_str(&body).map_err(|e| Error::Protocol {
        message: format!("{e} (body preview: {:?})", &body[..body.len().min(200)]),
    })?;

    if let Some(err) = frame.error {
        return Err(Error::Device {
            code: err.code,
            message: err.message,
        });
    }

    frame.result.ok_or_else(|| Error::Protocol {
        message: "RPC response carried neither result nor error".into(),
    })
}
