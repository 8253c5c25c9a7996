// ── Typed configuration validation ──
//
// Two levels: basic (required-when rules, formats, length bounds) and
// strict (cross-field rules on top). Field paths are dotted
// (`wifi.sta.ssid`). Warnings never block saves.

use serde::{Deserialize, Serialize};

use shellymgr_api::{DeviceConfig, Ipv4Mode};

/// One failing (or warned) field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Validation strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    #[default]
    Basic,
    /// Basic plus cross-field rules.
    Strict,
}

/// Validation outcome; `warnings` never block saves.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
    pub warnings: Vec<FieldError>,
}

fn is_ipv4(s: &str) -> bool {
    s.parse::<std::net::Ipv4Addr>().is_ok()
}

fn is_host_port(s: &str) -> bool {
    match s.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

fn has_placeholder(s: &str) -> bool {
    s.contains("${")
}

/// Validate a typed configuration envelope.
#[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
pub fn validate(config: &DeviceConfig, level: ValidationLevel) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let strict = level == ValidationLevel::Strict;

    // ── wifi.sta ─────────────────────────────────────────────────────
    if let Some(sta) = &config.wifi_sta {
        match sta.ssid.as_deref() {
            Some(ssid) if !ssid.is_empty() => {
                if ssid.len() > 32 {
                    errors.push(FieldError::new(
                        "wifi.sta.ssid",
                        "length",
                        "SSID must be at most 32 bytes",
                    ));
                }
            }
            _ if sta.enabled => {
                errors.push(FieldError::new(
                    "wifi.sta.ssid",
                    "required",
                    "SSID is required when wifi.sta is enabled",
                ));
            }
            _ => {}
        }

        for (field, value) in [
            ("wifi.sta.ip", &sta.ip),
            ("wifi.sta.netmask", &sta.netmask),
            ("wifi.sta.gateway", &sta.gateway),
            ("wifi.sta.dns", &sta.dns),
        ] {
            if let Some(v) = value {
                if !is_ipv4(v) {
                    errors.push(FieldError::new(field, "format", "expected an IPv4 address"));
                }
            }
        }

        if strict && sta.ipv4_mode == Ipv4Mode::Static {
            for (field, value) in [
                ("wifi.sta.ip", &sta.ip),
                ("wifi.sta.netmask", &sta.netmask),
                ("wifi.sta.gateway", &sta.gateway),
            ] {
                if value.is_none() {
                    errors.push(FieldError::new(
                        field,
                        "required_when_static",
                        "static addressing requires the full network block",
                    ));
                }
            }
        }
    }

    // ── wifi.ap ──────────────────────────────────────────────────────
    if let Some(ap) = &config.wifi_ap {
        if let Some(ssid) = &ap.ssid {
            if ssid.len() > 32 {
                errors.push(FieldError::new(
                    "wifi.ap.ssid",
                    "length",
                    "SSID must be at most 32 bytes",
                ));
            }
        }
        if let Some(password) = &ap.password {
            if !password.is_empty() && password.len() < 8 {
                errors.push(FieldError::new(
                    "wifi.ap.password",
                    "length",
                    "WPA passwords need at least 8 characters",
                ));
            }
        }
    }

    // ── mqtt ─────────────────────────────────────────────────────────
    if let Some(mqtt) = &config.mqtt {
        match mqtt.server.as_deref() {
            Some(server) if !server.is_empty() => {
                if !has_placeholder(server) && !is_host_port(server) {
                    errors.push(FieldError::new(
                        "mqtt.server",
                        "format",
                        "expected host:port",
                    ));
                }
            }
            _ if mqtt.enabled => {
                errors.push(FieldError::new(
                    "mqtt.server",
                    "required",
                    "server is required when mqtt is enabled",
                ));
            }
            _ => {}
        }
        if let Some(keep_alive) = mqtt.keep_alive {
            if keep_alive == 0 {
                warnings.push(FieldError::new(
                    "mqtt.keep_alive",
                    "suspicious",
                    "a zero keep-alive disables broker liveness checks",
                ));
            }
        }
        if strict && mqtt.user.as_deref().is_some_and(|u| !u.is_empty()) {
            let empty = mqtt.password.as_deref().is_none_or(str::is_empty);
            if empty {
                warnings.push(FieldError::new(
                    "mqtt.password",
                    "missing_secret",
                    "user is set but password is empty",
                ));
            }
        }
    }

    // ── auth ─────────────────────────────────────────────────────────
    if let Some(auth) = &config.auth {
        if auth.enabled && auth.user.as_deref().is_none_or(str::is_empty) {
            errors.push(FieldError::new(
                "auth.user",
                "required",
                "user is required when auth is enabled",
            ));
        }
        if strict && auth.enabled && auth.password.as_deref().is_none_or(str::is_empty) {
            errors.push(FieldError::new(
                "auth.password",
                "required",
                "auth cannot be enabled with an empty password",
            ));
        }
    }

    // ── channels ─────────────────────────────────────────────────────
    for relay in &config.relays {
        if let Some(state) = &relay.default_state {
            if !matches!(state.as_str(), "on" | "off" | "last" | "restore_last") {
                warnings.push(FieldError::new(
                    &format!("relay[{}].default_state", relay.id),
                    "unknown_value",
                    format!("{state:?} is not a known power-on state"),
                ));
            }
        }
    }
    for light in &config.lights {
        if let Some(brightness) = light.default_brightness {
            if brightness > 100 {
                errors.push(FieldError::new(
                    &format!("light[{}].default_brightness", light.id),
                    "range",
                    "brightness is a percentage (0-100)",
                ));
            }
        }
    }

    // ── unresolved template placeholders ─────────────────────────────
    if let Ok(value) = serde_json::to_value(config) {
        collect_placeholders(&value, String::new(), &mut errors);
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Walk every string field looking for `${...}` left over from template
/// materialisation.
fn collect_placeholders(value: &serde_json::Value, path: String, errors: &mut Vec<FieldError>) {
    match value {
        serde_json::Value::String(s) if has_placeholder(s) => {
            errors.push(FieldError::new(
                &dotted(&path),
                "unresolved_var",
                format!("unresolved template variable in {s:?}"),
            ));
        }
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                if key == "raw" && path.is_empty() {
                    continue;
                }
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                collect_placeholders(child, child_path, errors);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_placeholders(child, format!("{path}[{i}]"), errors);
            }
        }
        _ => {}
    }
}

/// Present serialised field names in their API-facing dotted spelling.
fn dotted(path: &str) -> String {
    path.replacen("wifi_sta", "wifi.sta", 1)
        .replacen("wifi_ap", "wifi.ap", 1)
        .replacen("relays[", "relay[", 1)
        .replacen("lights[", "light[", 1)
        .replacen("rollers[", "roller[", 1)
        .replacen("inputs[", "input[", 1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use shellymgr_api::{AuthConfig, MqttConfig, WifiStaConfig};

    fn sta(enabled: bool, ssid: Option<&str>) -> DeviceConfig {
        DeviceConfig {
            wifi_sta: Some(WifiStaConfig {
                enabled,
                ssid: ssid.map(str::to_owned),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn enabled_sta_requires_ssid() {
        let report = validate(&sta(true, None), ValidationLevel::Basic);
        assert!(!report.valid);
        assert_eq!(report.errors[0].field, "wifi.sta.ssid");
        assert_eq!(report.errors[0].code, "required");
    }

    #[test]
    fn disabled_sta_needs_no_ssid() {
        let report = validate(&sta(false, None), ValidationLevel::Strict);
        assert!(report.valid);
    }

    #[test]
    fn static_mode_requires_network_block_only_in_strict() {
        let config = DeviceConfig {
            wifi_sta: Some(WifiStaConfig {
                enabled: true,
                ssid: Some("home".into()),
                ipv4_mode: Ipv4Mode::Static,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate(&config, ValidationLevel::Basic).valid);
        let strict = validate(&config, ValidationLevel::Strict);
        assert!(!strict.valid);
        assert_eq!(strict.errors.len(), 3);
    }

    #[test]
    fn bad_ip_format_is_an_error() {
        let config = DeviceConfig {
            wifi_sta: Some(WifiStaConfig {
                enabled: true,
                ssid: Some("home".into()),
                ip: Some("not-an-ip".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&config, ValidationLevel::Basic);
        assert!(report.errors.iter().any(|e| e.field == "wifi.sta.ip"));
    }

    #[test]
    fn strict_auth_requires_password() {
        let config = DeviceConfig {
            auth: Some(AuthConfig {
                enabled: true,
                user: Some("admin".into()),
                password: None,
            }),
            ..Default::default()
        };
        assert!(validate(&config, ValidationLevel::Basic).valid);
        assert!(!validate(&config, ValidationLevel::Strict).valid);
    }

    #[test]
    fn strict_validity_implies_basic_validity() {
        // A config valid under strict rules must be valid under basic.
        let config = DeviceConfig {
            wifi_sta: Some(WifiStaConfig {
                enabled: true,
                ssid: Some("home".into()),
                ipv4_mode: Ipv4Mode::Static,
                ip: Some("192.168.1.40".into()),
                netmask: Some("255.255.255.0".into()),
                gateway: Some("192.168.1.1".into()),
                ..Default::default()
            }),
            auth: Some(AuthConfig {
                enabled: true,
                user: Some("admin".into()),
                password: Some("hunter2".into()),
            }),
            ..Default::default()
        };
        assert!(validate(&config, ValidationLevel::Strict).valid);
        assert!(validate(&config, ValidationLevel::Basic).valid);
    }

    #[test]
    fn validation_reports_every_failing_field() {
        let config = DeviceConfig {
            wifi_sta: Some(WifiStaConfig {
                enabled: true,
                ssid: None,
                ip: Some("bogus".into()),
                ..Default::default()
            }),
            mqtt: Some(MqttConfig {
                enabled: true,
                server: None,
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&config, ValidationLevel::Basic);
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn unresolved_placeholder_fails_basic() {
        let config = DeviceConfig {
            mqtt: Some(MqttConfig {
                enabled: true,
                server: Some("${mqtt_host}".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&config, ValidationLevel::Basic);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.code == "unresolved_var"));
    }

    #[test]
    fn warnings_do_not_block() {
        let config = DeviceConfig {
            mqtt: Some(MqttConfig {
                enabled: true,
                server: Some("broker:1883".into()),
                keep_alive: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&config, ValidationLevel::Basic);
        assert!(report.valid);
        assert!(!report.warnings.is_empty());
    }
}
