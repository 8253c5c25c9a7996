// Gen1 wire models
//
// Shapes are frozen by the firmware; everything is optional-heavy because
// different models report different subsets. `Gen1Settings::to_device_config`
// is the single place the flat Gen1 layout becomes the typed envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{
    AuthConfig, CloudConfig, DeviceConfig, InputConfig, Ipv4Mode, LedConfig, LightConfig,
    MqttConfig, RelayConfig, RollerConfig, SntpConfig, WifiApConfig, WifiStaConfig,
};

/// `GET /shelly` -- unauthenticated identification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gen1Ident {
    #[serde(rename = "type")]
    pub device_type: String,
    pub mac: String,
    /// True when the admin interface requires credentials.
    #[serde(default)]
    pub auth: bool,
    pub fw: Option<String>,
    pub num_outputs: Option<u8>,
    pub num_meters: Option<u8>,
    pub num_rollers: Option<u8>,
}

/// One relay entry in `GET /status`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gen1Relay {
    pub ison: bool,
    #[serde(default)]
    pub has_timer: bool,
    pub overpower: Option<bool>,
    pub source: Option<String>,
}

/// `GET /meter/{ch}` and the `meters` array in `/status`.
///
/// `power` is watts; `total` is watt-hours and gets divided by 1000
/// before leaving this crate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gen1Meter {
    pub power: f64,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub total: f64,
}

/// The `update` block in `/status` and the `GET /ota/check` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gen1UpdateStatus {
    pub status: Option<String>,
    #[serde(default)]
    pub has_update: bool,
    pub new_version: Option<String>,
    pub old_version: Option<String>,
}

/// `GET /status` -- the subset the manager consumes, raw kept by callers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gen1Status {
    #[serde(default)]
    pub relays: Vec<Gen1Relay>,
    #[serde(default)]
    pub meters: Vec<Gen1Meter>,
    pub update: Option<Gen1UpdateStatus>,
    pub uptime: Option<i64>,
    pub temperature: Option<f64>,
    pub overtemperature: Option<bool>,
}

/// The `login` block of `/settings`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gen1Login {
    #[serde(default)]
    pub enabled: bool,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gen1WifiSta {
    #[serde(default)]
    pub enabled: bool,
    pub ssid: Option<String>,
    pub ipv4_method: Option<String>,
    pub ip: Option<String>,
    pub gw: Option<String>,
    pub mask: Option<String>,
    pub dns: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gen1WifiAp {
    #[serde(default)]
    pub enabled: bool,
    pub ssid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gen1Mqtt {
    #[serde(default)]
    pub enable: bool,
    pub server: Option<String>,
    pub user: Option<String>,
    #[serde(default)]
    pub retain: bool,
    pub keep_alive: Option<u32>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gen1Sntp {
    pub server: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gen1Cloud {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gen1RelaySettings {
    pub name: Option<String>,
    pub default_state: Option<String>,
    pub auto_on: Option<f64>,
    pub auto_off: Option<f64>,
    pub btn_type: Option<String>,
    #[serde(default)]
    pub btn_reverse: u8,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gen1LightSettings {
    pub name: Option<String>,
    pub default_brightness: Option<u8>,
    pub transition: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gen1RollerSettings {
    pub name: Option<String>,
    pub maxtime_open: Option<f64>,
    pub maxtime_close: Option<f64>,
}

/// `GET /settings` -- the typed subset plus whatever else the device sent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gen1Settings {
    pub name: Option<String>,
    pub fw: Option<String>,
    pub timezone: Option<String>,
    pub wifi_sta: Option<Gen1WifiSta>,
    pub wifi_ap: Option<Gen1WifiAp>,
    pub mqtt: Option<Gen1Mqtt>,
    pub sntp: Option<Gen1Sntp>,
    pub login: Option<Gen1Login>,
    pub cloud: Option<Gen1Cloud>,
    #[serde(default)]
    pub relays: Vec<Gen1RelaySettings>,
    #[serde(default)]
    pub lights: Vec<Gen1LightSettings>,
    #[serde(default)]
    pub rollers: Vec<Gen1RollerSettings>,
    pub led_status_disable: Option<bool>,
    pub led_power_disable: Option<bool>,
}

impl Gen1Settings {
    /// Translate the flat Gen1 settings document into the typed envelope.
    ///
    /// `raw` is the untouched `/settings` body, preserved on the result.
    #[allow(clippy::too_many_lines)]
    pub fn to_device_config(&self, raw: Value) -> DeviceConfig {
        let wifi_sta = self.wifi_sta.as_ref().map(|sta| WifiStaConfig {
            enabled: sta.enabled,
            ssid: sta.ssid.clone(),
            password: None,
            ipv4_mode: match sta.ipv4_method.as_deref() {
                Some("static") => Ipv4Mode::Static,
                _ => Ipv4Mode::Dhcp,
            },
            ip: sta.ip.clone(),
            netmask: sta.mask.clone(),
            gateway: sta.gw.clone(),
            dns: sta.dns.clone(),
        });

        let wifi_ap = self.wifi_ap.as_ref().map(|ap| WifiApConfig {
            enabled: ap.enabled,
            ssid: ap.ssid.clone(),
            password: None,
        });

        let mqtt = self.mqtt.as_ref().map(|m| MqttConfig {
            enabled: m.enable,
            server: m.server.clone(),
            user: m.user.clone(),
            password: None,
            topic_prefix: m.id.clone(),
            retain: m.retain,
            keep_alive: m.keep_alive,
        });

        let auth = self.login.as_ref().map(|l| AuthConfig {
            enabled: l.enabled,
            user: l.username.clone(),
            password: None,
        });

        let sntp = self.sntp.as_ref().map(|s| SntpConfig {
            server: s.server.clone(),
            timezone: self.timezone.clone(),
        });

        let relays = self
            .relays
            .iter()
            .enumerate()
            .map(|(i, r)| RelayConfig {
                id: i as u8,
                name: r.name.clone(),
                default_state: r.default_state.clone(),
                auto_on_secs: r.auto_on.filter(|v| *v > 0.0),
                auto_off_secs: r.auto_off.filter(|v| *v > 0.0),
            })
            .collect();

        let lights = self
            .lights
            .iter()
            .enumerate()
            .map(|(i, l)| LightConfig {
                id: i as u8,
                name: l.name.clone(),
                default_brightness: l.default_brightness,
                transition_ms: l.transition,
            })
            .collect();

        let rollers = self
            .rollers
            .iter()
            .enumerate()
            .map(|(i, r)| RollerConfig {
                id: i as u8,
                name: r.name.clone(),
                max_open_secs: r.maxtime_open,
                max_close_secs: r.maxtime_close,
            })
            .collect();

        let led = match (self.led_status_disable, self.led_power_disable) {
            (None, None) => None,
            (status, network) => Some(LedConfig {
                status_disabled: status.unwrap_or(false),
                network_disabled: network.unwrap_or(false),
            }),
        };

        DeviceConfig {
            wifi_sta,
            wifi_ap,
            mqtt,
            auth,
            cloud: self.cloud.as_ref().map(|c| CloudConfig { enabled: c.enabled }),
            sntp,
            relays,
            lights,
            rollers,
            inputs: Vec::<InputConfig>::new(),
            led,
            raw: Some(raw),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_translate_to_envelope() {
        let body = json!({
            "name": "kitchen-plug",
            "fw": "1.14.0",
            "timezone": "Europe/Sofia",
            "wifi_sta": {
                "enabled": true, "ssid": "home", "ipv4_method": "static",
                "ip": "192.168.1.40", "gw": "192.168.1.1",
                "mask": "255.255.255.0", "dns": "1.1.1.1"
            },
            "mqtt": {
                "enable": true, "server": "broker:1883", "user": "shelly",
                "retain": false, "keep_alive": 60, "id": "shellies/kitchen"
            },
            "login": {"enabled": true, "username": "admin"},
            "cloud": {"enabled": false},
            "sntp": {"server": "time.google.com", "enabled": true},
            "relays": [
                {"name": "kettle", "default_state": "off", "auto_on": 0.0, "auto_off": 300.0}
            ],
            "led_status_disable": true
        });

        let settings: Gen1Settings = serde_json::from_value(body.clone()).unwrap();
        let config = settings.to_device_config(body);

        let sta = config.wifi_sta.unwrap();
        assert!(sta.enabled);
        assert_eq!(sta.ipv4_mode, Ipv4Mode::Static);
        assert_eq!(sta.ip.as_deref(), Some("192.168.1.40"));

        let mqtt = config.mqtt.unwrap();
        assert!(mqtt.enabled);
        assert_eq!(mqtt.server.as_deref(), Some("broker:1883"));
        assert_eq!(mqtt.topic_prefix.as_deref(), Some("shellies/kitchen"));

        assert!(config.auth.unwrap().enabled);
        assert!(!config.cloud.unwrap().enabled);
        assert_eq!(config.sntp.unwrap().timezone.as_deref(), Some("Europe/Sofia"));

        assert_eq!(config.relays.len(), 1);
        assert_eq!(config.relays[0].name.as_deref(), Some("kettle"));
        assert_eq!(config.relays[0].auto_on_secs, None);
        assert_eq!(config.relays[0].auto_off_secs, Some(300.0));

        assert!(config.led.unwrap().status_disabled);
        assert!(config.raw.is_some());
    }
}
