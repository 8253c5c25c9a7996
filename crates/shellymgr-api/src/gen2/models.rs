// Gen2 wire models and config translation
//
// `Shelly.GetConfig` returns a component map keyed by `wifi`, `mqtt`,
// `sys`, `cloud` and per-channel `switch:N` / `light:N` / `cover:N` /
// `input:N` entries. `parse_config` turns that map into the typed
// envelope; the reverse direction is assembled as RPC calls in the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{
    AuthConfig, CloudConfig, DeviceConfig, InputConfig, Ipv4Mode, LightConfig, MqttConfig,
    RelayConfig, RollerConfig, SntpConfig, WifiApConfig, WifiStaConfig,
};

/// `Shelly.GetDeviceInfo` result.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gen2DeviceInfo {
    /// Device id, e.g. `shellypro4pm-f008d1d8b8b8`. Doubles as the
    /// digest realm.
    pub id: String,
    pub mac: String,
    pub model: String,
    #[serde(rename = "gen")]
    pub generation: u8,
    pub fw_id: Option<String>,
    pub ver: Option<String>,
    pub app: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub auth_en: bool,
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn bool_field(obj: &Value, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Channel entries are keyed `component:index`; collect and sort by index.
fn channel_entries<'a>(raw: &'a Value, component: &str) -> Vec<(u8, &'a Value)> {
    let Some(map) = raw.as_object() else {
        return Vec::new();
    };
    let prefix = format!("{component}:");
    let mut entries: Vec<(u8, &Value)> = map
        .iter()
        .filter_map(|(key, value)| {
            let idx = key.strip_prefix(&prefix)?.parse::<u8>().ok()?;
            Some((idx, value))
        })
        .collect();
    entries.sort_by_key(|(idx, _)| *idx);
    entries
}

/// Translate a raw `Shelly.GetConfig` result into the typed envelope.
///
/// The untouched result is preserved on `raw`.
#[allow(clippy::too_many_lines)]
pub fn parse_config(raw: &Value) -> DeviceConfig {
    let wifi = raw.get("wifi");

    let wifi_sta = wifi.and_then(|w| w.get("sta")).map(|sta| WifiStaConfig {
        enabled: bool_field(sta, "enable"),
        ssid: str_field(sta, "ssid"),
        password: None,
        ipv4_mode: match sta.get("ipv4mode").and_then(Value::as_str) {
            Some("static") => Ipv4Mode::Static,
            _ => Ipv4Mode::Dhcp,
        },
        ip: str_field(sta, "ip"),
        netmask: str_field(sta, "netmask"),
        gateway: str_field(sta, "gw"),
        dns: str_field(sta, "nameserver"),
    });

    let wifi_ap = wifi.and_then(|w| w.get("ap")).map(|ap| WifiApConfig {
        enabled: bool_field(ap, "enable"),
        ssid: str_field(ap, "ssid"),
        password: None,
    });

    let mqtt = raw.get("mqtt").map(|m| MqttConfig {
        enabled: bool_field(m, "enable"),
        server: str_field(m, "server"),
        user: str_field(m, "user"),
        password: None,
        topic_prefix: str_field(m, "topic_prefix"),
        retain: false,
        keep_alive: None,
    });

    let sys = raw.get("sys");
    let sntp = sys.and_then(|s| s.get("sntp")).map(|s| SntpConfig {
        server: str_field(s, "server"),
        timezone: sys
            .and_then(|s| s.get("location"))
            .and_then(|l| str_field(l, "tz")),
    });

    let cloud = raw.get("cloud").map(|c| CloudConfig {
        enabled: bool_field(c, "enable"),
    });

    // Gen2 does not report auth state in GetConfig; the facade fills the
    // auth section from GetDeviceInfo's auth_en flag.
    let auth: Option<AuthConfig> = None;

    let relays = channel_entries(raw, "switch")
        .into_iter()
        .map(|(id, sw)| RelayConfig {
            id,
            name: str_field(sw, "name"),
            default_state: str_field(sw, "initial_state"),
            auto_on_secs: if bool_field(sw, "auto_on") {
                sw.get("auto_on_delay").and_then(Value::as_f64)
            } else {
                None
            },
            auto_off_secs: if bool_field(sw, "auto_off") {
                sw.get("auto_off_delay").and_then(Value::as_f64)
            } else {
                None
            },
        })
        .collect();

    let lights = channel_entries(raw, "light")
        .into_iter()
        .map(|(id, l)| LightConfig {
            id,
            name: str_field(l, "name"),
            default_brightness: l
                .get("default")
                .and_then(|d| d.get("brightness"))
                .and_then(Value::as_u64)
                .map(|b| b.min(100) as u8),
            transition_ms: l
                .get("transition_duration")
                .and_then(Value::as_f64)
                .map(|s| (s * 1000.0) as u32),
        })
        .collect();

    let rollers = channel_entries(raw, "cover")
        .into_iter()
        .map(|(id, c)| RollerConfig {
            id,
            name: str_field(c, "name"),
            max_open_secs: c.get("maxtime_open").and_then(Value::as_f64),
            max_close_secs: c.get("maxtime_close").and_then(Value::as_f64),
        })
        .collect();

    let inputs = channel_entries(raw, "input")
        .into_iter()
        .map(|(id, i)| InputConfig {
            id,
            name: str_field(i, "name"),
            mode: str_field(i, "type"),
            inverted: bool_field(i, "invert"),
        })
        .collect();

    DeviceConfig {
        wifi_sta,
        wifi_ap,
        mqtt,
        auth,
        cloud,
        sntp,
        relays,
        lights,
        rollers,
        inputs,
        led: None,
        raw: Some(raw.clone()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_component_map() {
        let raw = json!({
            "wifi": {
                "ap": {"ssid": "ShellyPro4PM-F008D1", "enable": false},
                "sta": {
                    "ssid": "home", "enable": true, "ipv4mode": "static",
                    "ip": "192.168.1.50", "netmask": "255.255.255.0",
                    "gw": "192.168.1.1", "nameserver": "1.1.1.1"
                }
            },
            "mqtt": {
                "enable": true, "server": "broker:1883",
                "user": "shelly", "topic_prefix": "shellypro4pm-f008d1"
            },
            "sys": {
                "device": {"name": "garage"},
                "sntp": {"server": "time.google.com"},
                "location": {"tz": "Europe/Berlin"}
            },
            "cloud": {"enable": false},
            "switch:0": {"id": 0, "name": "door", "initial_state": "off",
                          "auto_on": false, "auto_on_delay": 60.0,
                          "auto_off": true, "auto_off_delay": 30.0},
            "switch:1": {"id": 1, "name": null, "initial_state": "restore_last"},
            "input:0": {"id": 0, "name": null, "type": "switch", "invert": true}
        });

        let config = parse_config(&raw);

        let sta = config.wifi_sta.unwrap();
        assert_eq!(sta.ipv4_mode, Ipv4Mode::Static);
        assert_eq!(sta.gateway.as_deref(), Some("192.168.1.1"));

        let mqtt = config.mqtt.unwrap();
        assert!(mqtt.enabled);
        assert_eq!(mqtt.topic_prefix.as_deref(), Some("shellypro4pm-f008d1"));

        assert_eq!(config.sntp.unwrap().timezone.as_deref(), Some("Europe/Berlin"));
        assert!(!config.cloud.unwrap().enabled);

        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.relays[0].name.as_deref(), Some("door"));
        assert_eq!(config.relays[0].auto_on_secs, None);
        assert_eq!(config.relays[0].auto_off_secs, Some(30.0));
        assert_eq!(config.relays[1].default_state.as_deref(), Some("restore_last"));

        assert_eq!(config.inputs.len(), 1);
        assert!(config.inputs[0].inverted);
        assert!(config.raw.is_some());
    }
}
