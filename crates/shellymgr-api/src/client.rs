// ── Unified device facade ──
//
// One `ShellyClient` per device, speaking whichever dialect the firmware
// understands. Generation is detected once at connect time and pinned;
// the cache layer decides when a client (and its pinned generation) gets
// thrown away.

use std::net::IpAddr;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::Credentials;
use crate::config::{AuthConfig, DeviceConfig};
use crate::error::Error;
use crate::gen1::Gen1Client;
use crate::gen2::Gen2Client;
use crate::model::{canonical_mac, DeviceIdent, EnergyReading, Generation, SwitchState, UpdateCheck};
use crate::transport::TransportConfig;

/// Budget for each generation-detection probe.
const DETECT_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Dialect {
    Gen1(Gen1Client),
    Gen2 {
        client: Gen2Client,
        /// Device id (digest realm) captured at detection.
        device_id: String,
        auth_required: bool,
    },
}

/// Protocol client for a single device, uniform across generations.
#[derive(Debug)]
pub struct ShellyClient {
    ip: IpAddr,
    generation: Generation,
    ident: DeviceIdent,
    dialect: Dialect,
}

fn base_url(ip: IpAddr) -> Result<Url, Error> {
    Url::parse(&format!("http://{ip}")).map_err(Error::InvalidUrl)
}

impl ShellyClient {
    /// Probe the host, pin the generation, and build a ready client.
    ///
    /// The Gen2 RPC is probed first; a device that answers
    /// `Shelly.GetDeviceInfo` with a positive generation is pinned Gen2+.
    /// Otherwise the Gen1 `/shelly` endpoint decides. Each probe gets a
    /// 5 s budget. A host that answers neither is `Unreachable`.
    pub async fn connect(
        ip: IpAddr,
        credentials: Option<Credentials>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Self::connect_url(base_url(ip)?, credentials, transport).await
    }

    /// [`connect`](Self::connect) against an explicit base URL
    /// (non-standard port, test server).
    pub async fn connect_url(
        url: Url,
        credentials: Option<Credentials>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let ip = url
            .host_str()
            .and_then(|h| h.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
        // Detection never waits longer than its own budget, but a tighter
        // caller budget (discovery probes) wins.
        let probe = TransportConfig::probe(DETECT_BUDGET.min(transport.timeout));

        // Gen2 probe
        let gen2_probe = Gen2Client::new(url.clone(), credentials.clone(), &probe)?;
        match gen2_probe.device_info().await {
            Ok((info, raw)) if info.generation >= 1 => {
                debug!(%ip, generation = info.generation, "detected Gen2+ device");
                let ident = DeviceIdent {
                    mac: canonical_mac(&info.mac),
                    model: info.model.clone(),
                    generation: Generation::Gen2,
                    firmware: info.ver.clone(),
                    name: info.name.clone(),
                    auth_required: info.auth_en,
                    raw,
                };
                let client = Gen2Client::new(url, credentials, transport)?;
                return Ok(Self {
                    ip,
                    generation: Generation::Gen2,
                    ident,
                    dialect: Dialect::Gen2 {
                        client,
                        device_id: info.id,
                        auth_required: info.auth_en,
                    },
                });
            }
            Ok(_) => {
                return Err(Error::Protocol {
                    message: "device reported a non-positive generation".into(),
                });
            }
            Err(err) if !err.is_transient() && !matches!(err, Error::Device { .. }) => {
                // Auth and protocol errors still prove a Gen2 RPC endpoint
                // exists; anything transient falls through to the Gen1 probe.
                if err.is_auth() {
                    return Err(err);
                }
            }
            Err(_) => {}
        }

        // Gen1 probe
        let gen1_probe = Gen1Client::new(url.clone(), credentials.clone(), &probe)?;
        let (ident1, raw) = gen1_probe.ident().await.map_err(|err| match err {
            Error::Protocol { .. } => Error::Unreachable {
                message: format!("{ip} answered but is not a Shelly device"),
            },
            other => other,
        })?;

        debug!(%ip, model = %ident1.device_type, "detected Gen1 device");
        let ident = DeviceIdent {
            mac: canonical_mac(&ident1.mac),
            model: ident1.device_type.clone(),
            generation: Generation::Gen1,
            firmware: ident1.fw.clone(),
            name: None,
            auth_required: ident1.auth,
            raw,
        };
        let client = Gen1Client::new(url, credentials, transport)?;
        Ok(Self {
            ip,
            generation: Generation::Gen1,
            ident,
            dialect: Dialect::Gen1(client),
        })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The identification captured at detection time.
    pub fn ident(&self) -> &DeviceIdent {
        &self.ident
    }

    // ── Uniform operations ───────────────────────────────────────────

    /// Re-fetch identification from the device.
    pub async fn get_info(&self) -> Result<DeviceIdent, Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                let (ident, raw) = client.ident().await?;
                Ok(DeviceIdent {
                    mac: canonical_mac(&ident.mac),
                    model: ident.device_type,
                    generation: Generation::Gen1,
                    firmware: ident.fw,
                    name: None,
                    auth_required: ident.auth,
                    raw,
                })
            }
            Dialect::Gen2 { client, .. } => {
                let (info, raw) = client.device_info().await?;
                Ok(DeviceIdent {
                    mac: canonical_mac(&info.mac),
                    model: info.model,
                    generation: Generation::Gen2,
                    firmware: info.ver,
                    name: info.name,
                    auth_required: info.auth_en,
                    raw,
                })
            }
        }
    }

    /// Raw live status document (shape is generation-specific).
    pub async fn get_status(&self) -> Result<Value, Error> {
        match &self.dialect {
            Dialect::Gen1(client) => Ok(client.status().await?.1),
            Dialect::Gen2 { client, .. } => client.status().await,
        }
    }

    /// Generation-neutral typed configuration view.
    pub async fn get_config(&self) -> Result<DeviceConfig, Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                let (settings, raw) = client.settings().await?;
                Ok(settings.to_device_config(raw))
            }
            Dialect::Gen2 {
                client,
                auth_required,
                ..
            } => {
                let mut config = client.get_config().await?;
                // GetConfig doesn't expose auth state on Gen2; splice in
                // the flag from detection.
                config.auth = Some(AuthConfig {
                    enabled: *auth_required,
                    user: None,
                    password: None,
                });
                Ok(config)
            }
        }
    }

    /// Push a configuration diff, translated to per-generation endpoints.
    pub async fn set_config(&self, diff: &DeviceConfig) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => client.apply_config(diff).await,
            Dialect::Gen2 {
                client, device_id, ..
            } => client.apply_config(diff, device_id).await,
        }
    }

    /// Idempotent for a given `(channel, on)` pair.
    pub async fn set_switch(&self, channel: u8, on: bool) -> Result<SwitchState, Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.set_relay(channel, on).await?;
            }
            Dialect::Gen2 { client, .. } => {
                client.switch_set(channel, on).await?;
            }
        }
        Ok(SwitchState { channel, on })
    }

    pub async fn set_brightness(&self, channel: u8, brightness: u8) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.set_brightness(channel, brightness).await?;
            }
            Dialect::Gen2 { client, .. } => {
                client.light_set_brightness(channel, brightness).await?;
            }
        }
        Ok(())
    }

    pub async fn set_color_rgb(&self, channel: u8, r: u8, g: u8, b: u8) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.set_color_rgb(channel, r, g, b).await?;
            }
            Dialect::Gen2 { client, .. } => {
                client.light_set_rgb(channel, r, g, b).await?;
            }
        }
        Ok(())
    }

    pub async fn set_color_temp(&self, channel: u8, kelvin: u32) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.set_color_temp(channel, kelvin).await?;
            }
            Dialect::Gen2 { client, .. } => {
                client.light_set_temp(channel, kelvin).await?;
            }
        }
        Ok(())
    }

    pub async fn roller_open(&self, channel: u8) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.roller_command(channel, "open").await?;
            }
            Dialect::Gen2 { client, .. } => {
                client.cover_open(channel).await?;
            }
        }
        Ok(())
    }

    pub async fn roller_close(&self, channel: u8) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.roller_command(channel, "close").await?;
            }
            Dialect::Gen2 { client, .. } => {
                client.cover_close(channel).await?;
            }
        }
        Ok(())
    }

    pub async fn roller_stop(&self, channel: u8) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.roller_command(channel, "stop").await?;
            }
            Dialect::Gen2 { client, .. } => {
                client.cover_stop(channel).await?;
            }
        }
        Ok(())
    }

    pub async fn roller_position(&self, channel: u8, position: u8) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.roller_position(channel, position).await?;
            }
            Dialect::Gen2 { client, .. } => {
                client.cover_go_to_position(channel, position).await?;
            }
        }
        Ok(())
    }

    /// Set the device display name.
    pub async fn set_name(&self, name: &str) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.set_settings(&[("name", name.to_owned())]).await?;
                Ok(())
            }
            Dialect::Gen2 { client, .. } => {
                client
                    .rpc(
                        "Sys.SetConfig",
                        Some(serde_json::json!({ "config": { "device": { "name": name } } })),
                    )
                    .await?;
                Ok(())
            }
        }
    }

    /// Enable admin credentials on the device.
    pub async fn set_auth(&self, user: &str, password: &str) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.set_login(true, Some(user), Some(password)).await?;
                Ok(())
            }
            Dialect::Gen2 {
                client, device_id, ..
            } => client.set_auth(user, device_id, password).await,
        }
    }

    /// Disable admin credentials on the device.
    pub async fn reset_auth(&self) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.set_login(false, None, None).await?;
                Ok(())
            }
            Dialect::Gen2 {
                client, device_id, ..
            } => client.reset_auth("admin", device_id).await,
        }
    }

    pub async fn reboot(&self) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.reboot().await?;
                Ok(())
            }
            Dialect::Gen2 { client, .. } => client.reboot().await,
        }
    }

    pub async fn factory_reset(&self) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.factory_reset().await?;
                Ok(())
            }
            Dialect::Gen2 { client, .. } => client.factory_reset().await,
        }
    }

    pub async fn check_update(&self) -> Result<UpdateCheck, Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                let ota = client.ota_status().await?;
                Ok(UpdateCheck {
                    current_version: ota.old_version,
                    new_version: ota.new_version.clone(),
                    has_update: ota.has_update,
                })
            }
            Dialect::Gen2 { client, .. } => {
                let avail = client.check_update().await?;
                let new_version = avail
                    .get("stable")
                    .and_then(|s| s.get("version"))
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                Ok(UpdateCheck {
                    current_version: self.ident.firmware.clone(),
                    has_update: new_version.is_some(),
                    new_version,
                })
            }
        }
    }

    pub async fn perform_update(&self) -> Result<(), Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                client.ota_update().await?;
                Ok(())
            }
            Dialect::Gen2 { client, .. } => client.perform_update().await,
        }
    }

    /// Normalised power/energy reading for one channel. Power in watts,
    /// cumulative energy in kWh (Gen1 reports Wh and is divided by 1000).
    pub async fn get_energy(&self, channel: u8) -> Result<EnergyReading, Error> {
        match &self.dialect {
            Dialect::Gen1(client) => {
                let meter = client.meter(channel).await?;
                Ok(EnergyReading {
                    channel,
                    power_w: meter.power,
                    total_kwh: meter.total / 1000.0,
                })
            }
            Dialect::Gen2 { client, .. } => {
                let status = client.switch_status(channel).await?;
                let power_w = status
                    .get("apower")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                let total_kwh = status
                    .get("aenergy")
                    .and_then(|e| e.get("total"))
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                Ok(EnergyReading {
                    channel,
                    power_w,
                    total_kwh,
                })
            }
        }
    }

    /// Cheap liveness check against the pinned generation's id endpoint.
    pub async fn test_connection(&self) -> Result<(), Error> {
        self.get_info().await.map(|_| ())
    }
}
