// ── Template materialisation ──
//
// Templates carry `${name}` placeholders inside string-typed fields.
// Materialisation substitutes a per-device variable map; anything left
// unresolved is caught by basic validation afterwards.

use std::collections::HashMap;

use serde_json::Value;

use shellymgr_api::DeviceConfig;

use crate::error::CoreError;
use crate::model::ConfigurationTemplate;

/// Substitute `${name}` placeholders in every string field of the
/// template body.
pub fn materialize(
    template: &ConfigurationTemplate,
    variables: &HashMap<String, String>,
) -> Result<DeviceConfig, CoreError> {
    let mut value = serde_json::to_value(&template.config)
        .map_err(|e| CoreError::Internal(format!("template serialisation failed: {e}")))?;
    substitute(&mut value, variables);
    serde_json::from_value(value)
        .map_err(|e| CoreError::Internal(format!("materialised template is malformed: {e}")))
}

fn substitute(value: &mut Value, variables: &HashMap<String, String>) {
    match value {
        Value::String(s) if s.contains("${") => *s = interpolate(s, variables),
        Value::Object(map) => {
            for child in map.values_mut() {
                substitute(child, variables);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                substitute(child, variables);
            }
        }
        _ => {}
    }
}

/// Replace each `${name}` with its value; unknown names stay in place.
fn interpolate(input: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match variables.get(name) {
                    Some(replacement) => out.push_str(replacement),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shellymgr_api::{MqttConfig, WifiStaConfig};

    fn template(config: DeviceConfig, variables: Vec<String>) -> ConfigurationTemplate {
        ConfigurationTemplate {
            id: 1,
            name: "plug-defaults".into(),
            device_type: "SHPLG-S".into(),
            generation: 1,
            variables,
            config,
            is_default: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn substitutes_variables_in_strings() {
        let config = DeviceConfig {
            wifi_sta: Some(WifiStaConfig {
                enabled: true,
                ssid: Some("${wifi_ssid}".into()),
                password: Some("${wifi_pass}".into()),
                ..Default::default()
            }),
            mqtt: Some(MqttConfig {
                enabled: true,
                server: Some("${mqtt_host}:1883".into()),
                topic_prefix: Some("shellies/${device_name}".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let template = template(
            config,
            vec!["wifi_ssid".into(), "wifi_pass".into(), "mqtt_host".into()],
        );

        let vars = HashMap::from([
            ("wifi_ssid".to_owned(), "home".to_owned()),
            ("wifi_pass".to_owned(), "p@ss".to_owned()),
            ("mqtt_host".to_owned(), "broker".to_owned()),
            ("device_name".to_owned(), "kitchen".to_owned()),
        ]);
        let materialized = materialize(&template, &vars).unwrap();

        assert_eq!(materialized.wifi_sta.as_ref().unwrap().ssid.as_deref(), Some("home"));
        let mqtt = materialized.mqtt.unwrap();
        assert_eq!(mqtt.server.as_deref(), Some("broker:1883"));
        assert_eq!(mqtt.topic_prefix.as_deref(), Some("shellies/kitchen"));
    }

    #[test]
    fn unknown_variables_stay_in_place() {
        let config = DeviceConfig {
            mqtt: Some(MqttConfig {
                enabled: true,
                server: Some("${mqtt_host}:1883".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let template = template(config, vec!["mqtt_host".into()]);
        let materialized = materialize(&template, &HashMap::new()).unwrap();
        assert_eq!(
            materialized.mqtt.unwrap().server.as_deref(),
            Some("${mqtt_host}:1883")
        );
    }

    #[test]
    fn interpolate_handles_multiple_and_dangling() {
        let vars = HashMap::from([("a".to_owned(), "1".to_owned())]);
        assert_eq!(interpolate("${a}-${a}", &vars), "1-1");
        assert_eq!(interpolate("${unclosed", &vars), "${unclosed");
    }
}
