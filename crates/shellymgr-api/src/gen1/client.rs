// Gen1 HTTP client
//
// Wraps `reqwest::Client` with the retry/auth discipline shared by all
// Gen1 endpoints: bounded transport retries with fixed delay, 5xx retry,
// and a single HTTP Basic retry after the first 401.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::auth::Credentials;
use crate::config::DeviceConfig;
use crate::error::Error;
use crate::transport::TransportConfig;

use super::models::{Gen1Ident, Gen1Meter, Gen1Settings, Gen1Status, Gen1UpdateStatus};

/// Raw HTTP client for a single Gen1 device.
#[derive(Debug)]
pub struct Gen1Client {
    http: reqwest::Client,
    base_url: Url,
    credentials: Option<Credentials>,
    transport: TransportConfig,
}

impl Gen1Client {
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
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    // ── Request plumbing ─────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base_url.join(path).map_err(Error::InvalidUrl)
    }

    /// Send a request with retry and lazy-auth semantics, returning the
    /// parsed JSON body.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        let timeout_secs = self.transport.timeout.as_secs();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(%url, attempt, "{} {}", method, path);

            let mut builder = self.http.request(method.clone(), url.clone());
            if !query.is_empty() {
                builder = builder.query(query);
            }

            let result = builder.send().await;
            let resp = match result {
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

            if status == StatusCode::UNAUTHORIZED {
                return self.retry_with_basic(method, &url, query).await;
            }

            if status.is_server_error() && attempt < self.transport.retries {
                trace!(attempt, %status, "server error, retrying");
                tokio::time::sleep(self.transport.retry_delay).await;
                continue;
            }

            return parse_body(resp).await;
        }
    }

    /// One authenticated retry after a 401. Persistent 401 is `AuthFailed`;
    /// a 401 with no credentials configured is `AuthRequired`.
    async fn retry_with_basic<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &Url,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let Some(creds) = &self.credentials else {
            return Err(Error::AuthRequired);
        };

        debug!(%url, "retrying with HTTP Basic credentials");
        let mut builder = self.http.request(method, url.clone()).basic_auth(
            &creds.username,
            Some(secrecy::ExposeSecret::expose_secret(&creds.password)),
        );
        if !query.is_empty() {
            builder = builder.query(query);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::from_transport(e, self.transport.timeout.as_secs()))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthFailed {
                message: "device rejected HTTP Basic credentials".into(),
            });
        }

        parse_body(resp).await
    }

    // ── Identification & state ───────────────────────────────────────

    /// `GET /shelly` -- unauthenticated identification probe.
    pub async fn ident(&self) -> Result<(Gen1Ident, Value), Error> {
        let raw: Value = self.request(Method::GET, "/shelly", &[]).await?;
        let ident = serde_json::from_value(raw.clone()).map_err(|e| Error::Protocol {
            message: format!("unexpected /shelly payload: {e}"),
        })?;
        Ok((ident, raw))
    }

    /// `GET /status` -- live state, typed subset plus the raw document.
    pub async fn status(&self) -> Result<(Gen1Status, Value), Error> {
        let raw: Value = self.request(Method::GET, "/status", &[]).await?;
        let status = serde_json::from_value(raw.clone()).map_err(|e| Error::Protocol {
            message: format!("unexpected /status payload: {e}"),
        })?;
        Ok((status, raw))
    }

    /// `GET /settings` -- configuration, typed subset plus the raw document.
    pub async fn settings(&self) -> Result<(Gen1Settings, Value), Error> {
        let raw: Value = self.request(Method::GET, "/settings", &[]).await?;
        let settings = serde_json::from_value(raw.clone()).map_err(|e| Error::Protocol {
            message: format!("unexpected /settings payload: {e}"),
        })?;
        Ok((settings, raw))
    }

    /// `GET /meter/{ch}` -- per-channel power meter.
    pub async fn meter(&self, channel: u8) -> Result<Gen1Meter, Error> {
        self.request(Method::GET, &format!("/meter/{channel}"), &[])
            .await
    }

    // ── Control ──────────────────────────────────────────────────────

    /// `POST /settings/relay/{ch}?turn=on|off`.
    pub async fn set_relay(&self, channel: u8, on: bool) -> Result<Value, Error> {
        let turn = if on { "on" } else { "off" };
        self.request(
            Method::POST,
            &format!("/settings/relay/{channel}"),
            &[("turn", turn.to_owned())],
        )
        .await
    }

    /// `GET /light/{ch}?turn=on&brightness=N`.
    pub async fn set_brightness(&self, channel: u8, brightness: u8) -> Result<Value, Error> {
        self.request(
            Method::GET,
            &format!("/light/{channel}"),
            &[
                ("turn", "on".to_owned()),
                ("brightness", brightness.min(100).to_string()),
            ],
        )
        .await
    }

    /// `GET /color/{ch}?red=..&green=..&blue=..` (colour-capable bulbs).
    pub async fn set_color_rgb(&self, channel: u8, r: u8, g: u8, b: u8) -> Result<Value, Error> {
        self.request(
            Method::GET,
            &format!("/color/{channel}"),
            &[
                ("turn", "on".to_owned()),
                ("red", r.to_string()),
                ("green", g.to_string()),
                ("blue", b.to_string()),
            ],
        )
        .await
    }

    /// `GET /light/{ch}?temp=K` (white-spectrum bulbs).
    pub async fn set_color_temp(&self, channel: u8, kelvin: u32) -> Result<Value, Error> {
        self.request(
            Method::GET,
            &format!("/light/{channel}"),
            &[("turn", "on".to_owned()), ("temp", kelvin.to_string())],
        )
        .await
    }

    /// `GET /roller/{ch}?go=open|close|stop`.
    pub async fn roller_command(&self, channel: u8, go: &str) -> Result<Value, Error> {
        self.request(
            Method::GET,
            &format!("/roller/{channel}"),
            &[("go", go.to_owned())],
        )
        .await
    }

    /// `GET /roller/{ch}?go=to_pos&roller_pos=P`.
    pub async fn roller_position(&self, channel: u8, position: u8) -> Result<Value, Error> {
        self.request(
            Method::GET,
            &format!("/roller/{channel}"),
            &[
                ("go", "to_pos".to_owned()),
                ("roller_pos", position.min(100).to_string()),
            ],
        )
        .await
    }

    // ── Administration ───────────────────────────────────────────────

    /// `POST /settings/login` -- enable or rotate admin credentials.
    pub async fn set_login(
        &self,
        enabled: bool,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Value, Error> {
        let mut query = vec![("enabled", if enabled { "1" } else { "0" }.to_owned())];
        if let Some(user) = username {
            query.push(("username", user.to_owned()));
        }
        if let Some(pass) = password {
            query.push(("password", pass.to_owned()));
        }
        self.request(Method::POST, "/settings/login", &query).await
    }

    /// `POST /settings/sta` -- station Wi-Fi settings.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_sta(
        &self,
        enabled: bool,
        ssid: Option<&str>,
        key: Option<&str>,
        ipv4_method: Option<&str>,
        ip: Option<&str>,
        netmask: Option<&str>,
        gateway: Option<&str>,
        dns: Option<&str>,
    ) -> Result<Value, Error> {
        let mut query = vec![("enabled", if enabled { "1" } else { "0" }.to_owned())];
        for (name, value) in [
            ("ssid", ssid),
            ("key", key),
            ("ipv4_method", ipv4_method),
            ("ip", ip),
            ("netmask", netmask),
            ("gateway", gateway),
            ("dns", dns),
        ] {
            if let Some(v) = value {
                query.push((name, v.to_owned()));
            }
        }
        self.request(Method::POST, "/settings/sta", &query).await
    }

    /// `POST /settings/cloud?enabled=0|1`.
    pub async fn set_cloud(&self, enabled: bool) -> Result<Value, Error> {
        self.request(
            Method::POST,
            "/settings/cloud",
            &[("enabled", if enabled { "1" } else { "0" }.to_owned())],
        )
        .await
    }

    /// `POST /settings` -- generic flat settings (mqtt_*, sntp, name, led).
    pub async fn set_settings(&self, params: &[(&str, String)]) -> Result<Value, Error> {
        self.request(Method::POST, "/settings", params).await
    }

    /// `GET /ota` -- current update state.
    pub async fn ota_status(&self) -> Result<Gen1UpdateStatus, Error> {
        self.request(Method::GET, "/ota", &[]).await
    }

    /// `GET /ota/check` -- ask the device to re-check for firmware.
    pub async fn ota_check(&self) -> Result<Value, Error> {
        self.request(Method::GET, "/ota/check", &[]).await
    }

    /// `GET /ota?update=true` -- start a firmware update.
    pub async fn ota_update(&self) -> Result<Value, Error> {
        self.request(Method::GET, "/ota", &[("update", "true".to_owned())])
            .await
    }

    /// `GET /reboot`.
    pub async fn reboot(&self) -> Result<Value, Error> {
        self.request(Method::GET, "/reboot", &[]).await
    }

    /// `GET /reset` -- factory reset.
    pub async fn factory_reset(&self) -> Result<Value, Error> {
        self.request(Method::GET, "/reset", &[]).await
    }

    // ── Typed configuration push ─────────────────────────────────────

    /// Push the sections present in `diff` to their Gen1 endpoints.
    ///
    /// Sections absent from the envelope are left untouched on the device.
    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    pub async fn apply_config(&self, diff: &DeviceConfig) -> Result<(), Error> {
        if let Some(sta) = &diff.wifi_sta {
            let method = match sta.ipv4_mode {
                crate::config::Ipv4Mode::Static => Some("static"),
                crate::config::Ipv4Mode::Dhcp => Some("dhcp"),
            };
            self.set_sta(
                sta.enabled,
                sta.ssid.as_deref(),
                sta.password.as_deref(),
                method,
                sta.ip.as_deref(),
                sta.netmask.as_deref(),
                sta.gateway.as_deref(),
                sta.dns.as_deref(),
            )
            .await?;
        }

        if let Some(ap) = &diff.wifi_ap {
            let mut query = vec![("enabled", if ap.enabled { "1" } else { "0" }.to_owned())];
            if let Some(ssid) = &ap.ssid {
                query.push(("ssid", ssid.clone()));
            }
            if let Some(key) = &ap.password {
                query.push(("key", key.clone()));
            }
            self.request::<Value>(Method::POST, "/settings/ap", &query)
                .await?;
        }

        if let Some(mqtt) = &diff.mqtt {
            let mut params = vec![(
                "mqtt_enable",
                if mqtt.enabled { "1" } else { "0" }.to_owned(),
            )];
            if let Some(server) = &mqtt.server {
                params.push(("mqtt_server", server.clone()));
            }
            if let Some(user) = &mqtt.user {
                params.push(("mqtt_user", user.clone()));
            }
            if let Some(pass) = &mqtt.password {
                params.push(("mqtt_pass", pass.clone()));
            }
            if let Some(prefix) = &mqtt.topic_prefix {
                params.push(("mqtt_id", prefix.clone()));
            }
            params.push(("mqtt_retain", if mqtt.retain { "1" } else { "0" }.to_owned()));
            if let Some(keep_alive) = mqtt.keep_alive {
                params.push(("mqtt_keep_alive", keep_alive.to_string()));
            }
            self.set_settings(&params).await?;
        }

        if let Some(auth) = &diff.auth {
            self.set_login(auth.enabled, auth.user.as_deref(), auth.password.as_deref())
                .await?;
        }

        if let Some(cloud) = &diff.cloud {
            self.set_cloud(cloud.enabled).await?;
        }

        if let Some(sntp) = &diff.sntp {
            let mut params = Vec::new();
            if let Some(server) = &sntp.server {
                params.push(("sntp_server", server.clone()));
            }
            if let Some(tz) = &sntp.timezone {
                params.push(("timezone", tz.clone()));
            }
            if !params.is_empty() {
                self.set_settings(&params).await?;
            }
        }

        for relay in &diff.relays {
            let mut query = Vec::new();
            if let Some(name) = &relay.name {
                query.push(("name", name.clone()));
            }
            if let Some(state) = &relay.default_state {
                query.push(("default_state", state.clone()));
            }
            if let Some(auto_on) = relay.auto_on_secs {
                query.push(("auto_on", auto_on.to_string()));
            }
            if let Some(auto_off) = relay.auto_off_secs {
                query.push(("auto_off", auto_off.to_string()));
            }
            if !query.is_empty() {
                self.request::<Value>(
                    Method::POST,
                    &format!("/settings/relay/{}", relay.id),
                    &query,
                )
                .await?;
            }
        }

        if let Some(led) = &diff.led {
            self.set_settings(&[
                (
                    "led_status_disable",
                    if led.status_disabled { "1" } else { "0" }.to_owned(),
                ),
                (
                    "led_power_disable",
                    if led.network_disabled { "1" } else { "0" }.to_owned(),
                ),
            ])
            .await?;
        }

        Ok(())
    }
}

/// Parse a non-401 response body, mapping HTTP errors to typed variants.
async fn parse_body<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Device {
            code: i64::from(status.as_u16()),
            message: format!("HTTP {status}: {}", &body[..body.len().min(200)]),
        });
    }

    let body = resp.text().await.map_err(Error::Transport)?;
    serde_json::from_str(&body).map_err(|e| Error::Protocol {
        message: format!("{e} (body preview: {:?})", &body[..body.len().min(200)]),
    })
}
