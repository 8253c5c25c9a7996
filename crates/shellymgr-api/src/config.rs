// ── Generation-neutral device configuration ──
//
// The typed envelope both generation clients translate to and from.
// Sections are keyed by device capability; absent sections mean the
// capability is not present (or was not reported) on the device.
// The raw device payload is always preserved alongside the typed view
// so fields we don't model survive round-trips.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// IPv4 addressing mode for the station interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Ipv4Mode {
    #[default]
    Dhcp,
    Static,
}

/// `wifi.sta` -- the device's uplink to the home network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WifiStaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    /// Write-only: devices never report it back, exports redact it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub ipv4_mode: Ipv4Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
}

/// `wifi.ap` -- the device's own access point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WifiApConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// `mqtt` -- broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_prefix: Option<String>,
    #[serde(default)]
    pub retain: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<u32>,
}

/// `auth` -- admin credentials on the device's own HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// `cloud` -- vendor cloud connectivity flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CloudConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// `sntp` -- time source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SntpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// `relay[i]` -- a switched output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    pub id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Power-on behaviour: `on`, `off`, `last`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_on_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_off_secs: Option<f64>,
}

/// `light[i]` -- a dimmable output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LightConfig {
    pub id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_ms: Option<u32>,
}

/// `roller[i]` -- a cover/shutter channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RollerConfig {
    pub id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_open_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_close_secs: Option<f64>,
}

/// `input[i]` -- a physical input (button or switch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InputConfig {
    pub id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Input mode: `momentary`, `toggle`, `edge`, `detached`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub inverted: bool,
}

/// `led` -- status LED behaviour (generation-specific semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LedConfig {
    #[serde(default)]
    pub status_disabled: bool,
    #[serde(default)]
    pub network_disabled: bool,
}

/// The full typed configuration envelope for one device.
///
/// `GetConfig` returns this view regardless of generation; `SetConfig`
/// accepts it and the client translates to per-generation endpoints.
/// Only sections present in a `SetConfig` envelope are pushed -- it is
/// a diff, not a full replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_sta: Option<WifiStaConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_ap: Option<WifiApConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sntp: Option<SntpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relays: Vec<RelayConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lights: Vec<LightConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollers: Vec<RollerConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led: Option<LedConfig>,
    /// The raw payload as the device reported it. Never pushed back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl DeviceConfig {
    /// Strip password fields, used when exporting without `include_secrets`.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if let Some(sta) = &mut out.wifi_sta {
            sta.password = None;
        }
        if let Some(ap) = &mut out.wifi_ap {
            ap.password = None;
        }
        if let Some(mqtt) = &mut out.mqtt {
            mqtt.password = None;
        }
        if let Some(auth) = &mut out.auth {
            auth.password = None;
        }
        out
    }

    /// True when no capability section is present at all.
    pub fn is_empty(&self) -> bool {
        self.wifi_sta.is_none()
            && self.wifi_ap.is_none()
            && self.mqtt.is_none()
            && self.auth.is_none()
            && self.cloud.is_none()
            && self.sntp.is_none()
            && self.relays.is_empty()
            && self.lights.is_empty()
            && self.rollers.is_empty()
            && self.inputs.is_empty()
            && self.led.is_none()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redaction_strips_all_passwords() {
        let config = DeviceConfig {
            wifi_sta: Some(WifiStaConfig {
                enabled: true,
                ssid: Some("home".into()),
                password: Some("p@ss".into()),
                ..Default::default()
            }),
            mqtt: Some(MqttConfig {
                enabled: true,
                server: Some("broker:1883".into()),
                password: Some("mq".into()),
                ..Default::default()
            }),
            auth: Some(AuthConfig {
                enabled: true,
                user: Some("admin".into()),
                password: Some("hunter2".into()),
            }),
            ..Default::default()
        };

        let redacted = config.redacted();
        assert_eq!(redacted.wifi_sta.unwrap().password, None);
        assert_eq!(redacted.mqtt.as_ref().unwrap().password, None);
        assert_eq!(redacted.auth.unwrap().password, None);
        // Non-secret fields are untouched.
        assert_eq!(
            redacted.mqtt.unwrap().server.as_deref(),
            Some("broker:1883")
        );
    }

    #[test]
    fn empty_envelope_reports_empty() {
        assert!(DeviceConfig::default().is_empty());
    }

    #[test]
    fn serialisation_skips_absent_sections() {
        let json = serde_json::to_value(DeviceConfig::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
