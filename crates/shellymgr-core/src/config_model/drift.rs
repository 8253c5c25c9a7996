// ── Drift detection ──
//
// Compares the stored desired configuration against the live view from
// the device, field by field. Severity is classed per field (auth,
// network, telemetry) and the active policy decides which classes are
// reported. Password fields compare only when both sides carry a value.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use shellymgr_api::{ClientCache, DeviceConfig};

use crate::error::CoreError;
use crate::model::{DriftEntry, DriftReport, DriftSeverity, SyncStatus};
use crate::store::StorageProvider;

/// Which severity classes a drift run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DriftPolicy {
    /// Everything, telemetry included.
    Strict,
    /// Auth and network classes.
    #[default]
    Moderate,
    /// Auth only.
    Relaxed,
}

impl DriftPolicy {
    fn includes(self, severity: DriftSeverity) -> bool {
        match self {
            Self::Strict => true,
            Self::Moderate => !matches!(severity, DriftSeverity::Telemetry),
            Self::Relaxed => matches!(severity, DriftSeverity::Auth),
        }
    }
}

/// One comparable field: dotted path, severity class, both sides as
/// display strings, and whether the value is write-only.
struct FieldCmp {
    path: &'static str,
    severity: DriftSeverity,
    expected: Option<String>,
    observed: Option<String>,
    sensitive: bool,
}

fn opt_bool(v: bool) -> Option<String> {
    Some(v.to_string())
}

#[allow(clippy::too_many_lines)]
fn comparable_fields(stored: &DeviceConfig, live: &DeviceConfig) -> Vec<FieldCmp> {
    let mut fields = Vec::new();

    if let Some(expected) = &stored.wifi_sta {
        let observed = live.wifi_sta.as_ref();
        fields.push(FieldCmp {
            path: "wifi.sta.enabled",
            severity: DriftSeverity::Network,
            expected: opt_bool(expected.enabled),
            observed: observed.map(|o| o.enabled.to_string()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "wifi.sta.ssid",
            severity: DriftSeverity::Network,
            expected: expected.ssid.clone(),
            observed: observed.and_then(|o| o.ssid.clone()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "wifi.sta.password",
            severity: DriftSeverity::Auth,
            expected: expected.password.clone(),
            observed: observed.and_then(|o| o.password.clone()),
            sensitive: true,
        });
        fields.push(FieldCmp {
            path: "wifi.sta.ipv4_mode",
            severity: DriftSeverity::Network,
            expected: Some(format!("{:?}", expected.ipv4_mode).to_lowercase()),
            observed: observed.map(|o| format!("{:?}", o.ipv4_mode).to_lowercase()),
            sensitive: false,
        });
        let addresses = [
            ("wifi.sta.ip", expected.ip.clone(), observed.and_then(|o| o.ip.clone())),
            (
                "wifi.sta.netmask",
                expected.netmask.clone(),
                observed.and_then(|o| o.netmask.clone()),
            ),
            (
                "wifi.sta.gateway",
                expected.gateway.clone(),
                observed.and_then(|o| o.gateway.clone()),
            ),
            ("wifi.sta.dns", expected.dns.clone(), observed.and_then(|o| o.dns.clone())),
        ];
        for (path, expected, observed) in addresses {
            fields.push(FieldCmp {
                path,
                severity: DriftSeverity::Network,
                expected,
                observed,
                sensitive: false,
            });
        }
    }

    if let Some(expected) = &stored.wifi_ap {
        let observed = live.wifi_ap.as_ref();
        fields.push(FieldCmp {
            path: "wifi.ap.enabled",
            severity: DriftSeverity::Network,
            expected: opt_bool(expected.enabled),
            observed: observed.map(|o| o.enabled.to_string()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "wifi.ap.ssid",
            severity: DriftSeverity::Network,
            expected: expected.ssid.clone(),
            observed: observed.and_then(|o| o.ssid.clone()),
            sensitive: false,
        });
    }

    if let Some(expected) = &stored.mqtt {
        let observed = live.mqtt.as_ref();
        fields.push(FieldCmp {
            path: "mqtt.enabled",
            severity: DriftSeverity::Network,
            expected: opt_bool(expected.enabled),
            observed: observed.map(|o| o.enabled.to_string()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "mqtt.server",
            severity: DriftSeverity::Network,
            expected: expected.server.clone(),
            observed: observed.and_then(|o| o.server.clone()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "mqtt.user",
            severity: DriftSeverity::Auth,
            expected: expected.user.clone(),
            observed: observed.and_then(|o| o.user.clone()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "mqtt.password",
            severity: DriftSeverity::Auth,
            expected: expected.password.clone(),
            observed: observed.and_then(|o| o.password.clone()),
            sensitive: true,
        });
        fields.push(FieldCmp {
            path: "mqtt.topic_prefix",
            severity: DriftSeverity::Telemetry,
            expected: expected.topic_prefix.clone(),
            observed: observed.and_then(|o| o.topic_prefix.clone()),
            sensitive: false,
        });
    }

    if let Some(expected) = &stored.auth {
        let observed = live.auth.as_ref();
        fields.push(FieldCmp {
            path: "auth.enabled",
            severity: DriftSeverity::Auth,
            expected: opt_bool(expected.enabled),
            observed: observed.map(|o| o.enabled.to_string()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "auth.user",
            severity: DriftSeverity::Auth,
            expected: expected.user.clone(),
            observed: observed.and_then(|o| o.user.clone()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "auth.password",
            severity: DriftSeverity::Auth,
            expected: expected.password.clone(),
            observed: observed.and_then(|o| o.password.clone()),
            sensitive: true,
        });
    }

    if let Some(expected) = &stored.cloud {
        fields.push(FieldCmp {
            path: "cloud.enabled",
            severity: DriftSeverity::Telemetry,
            expected: opt_bool(expected.enabled),
            observed: live.cloud.as_ref().map(|o| o.enabled.to_string()),
            sensitive: false,
        });
    }

    if let Some(expected) = &stored.sntp {
        let observed = live.sntp.as_ref();
        fields.push(FieldCmp {
            path: "sntp.server",
            severity: DriftSeverity::Telemetry,
            expected: expected.server.clone(),
            observed: observed.and_then(|o| o.server.clone()),
            sensitive: false,
        });
        fields.push(FieldCmp {
            path: "sntp.timezone",
            severity: DriftSeverity::Telemetry,
            expected: expected.timezone.clone(),
            observed: observed.and_then(|o| o.timezone.clone()),
            sensitive: false,
        });
    }

    fields
}

/// Pure comparison: stored vs. live under a policy.
pub fn compare(
    device_id: i64,
    stored: &DeviceConfig,
    live: &DeviceConfig,
    policy: DriftPolicy,
) -> DriftReport {
    let mut entries = Vec::new();

    for field in comparable_fields(stored, live) {
        if !policy.includes(field.severity) {
            continue;
        }

        let expected = field.expected.filter(|v| !v.is_empty());
        let observed = field.observed.filter(|v| !v.is_empty());

        let drifted = match (&expected, &observed) {
            // Sensitive fields: empty on either side means "skip, not drift".
            (None, _) | (_, None) if field.sensitive => false,
            // Unspecified in the desired config: nothing to enforce.
            (None, _) => false,
            (Some(e), Some(o)) => e != o,
            (Some(_), None) => true,
        };

        if drifted {
            entries.push(DriftEntry {
                path: field.path.to_owned(),
                expected: expected.unwrap_or_default(),
                observed: observed.unwrap_or_default(),
                severity: field.severity,
            });
        }
    }

    DriftReport {
        device_id,
        policy: policy.to_string(),
        entries,
        detected_at: Utc::now(),
    }
}

/// Live drift detection: fetch, normalise, compare, persist.
pub struct DriftDetector {
    store: Arc<dyn StorageProvider>,
    clients: Arc<ClientCache>,
    policy: DriftPolicy,
}

impl DriftDetector {
    pub fn new(
        store: Arc<dyn StorageProvider>,
        clients: Arc<ClientCache>,
        policy: DriftPolicy,
    ) -> Self {
        Self {
            store,
            clients,
            policy,
        }
    }

    /// Compare the stored configuration of `device_id` against the live
    /// device, persist the report, and update the sync status.
    pub async fn detect(&self, device_id: i64) -> Result<DriftReport, CoreError> {
        let device = self.store.get_device(device_id).await?;
        let stored = self.store.get_configuration(device_id).await?;

        let client = self.clients.get_or_connect(device.ip, None).await?;
        let live = client.get_config().await?;

        let report = compare(device_id, &stored.config, &live, self.policy);
        debug!(
            device_id,
            entries = report.entries.len(),
            "drift detection complete"
        );

        self.store.save_drift_report(&report).await?;
        let status = if report.in_sync() {
            SyncStatus::InSync
        } else {
            SyncStatus::Drifted
        };
        self.store
            .set_sync_status(device_id, status, Some(Utc::now()))
            .await?;

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use shellymgr_api::{AuthConfig, CloudConfig, MqttConfig};

    fn mqtt(server: &str) -> DeviceConfig {
        DeviceConfig {
            mqtt: Some(MqttConfig {
                enabled: true,
                server: Some(server.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn mqtt_server_drift_is_network_severity() {
        let report = compare(1, &mqtt("broker:1883"), &mqtt("other:1883"), DriftPolicy::Moderate);
        assert_eq!(report.entries.len(), 1);
        let entry = &report.entries[0];
        assert_eq!(entry.path, "mqtt.server");
        assert_eq!(entry.expected, "broker:1883");
        assert_eq!(entry.observed, "other:1883");
        assert_eq!(entry.severity, DriftSeverity::Network);
    }

    #[test]
    fn identical_configs_are_in_sync() {
        let report = compare(1, &mqtt("broker:1883"), &mqtt("broker:1883"), DriftPolicy::Strict);
        assert!(report.in_sync());
    }

    #[test]
    fn empty_password_on_one_side_is_not_drift() {
        let stored = DeviceConfig {
            auth: Some(AuthConfig {
                enabled: true,
                user: Some("admin".into()),
                password: Some("secret".into()),
            }),
            ..Default::default()
        };
        let live = DeviceConfig {
            auth: Some(AuthConfig {
                enabled: true,
                user: Some("admin".into()),
                password: None,
            }),
            ..Default::default()
        };
        let report = compare(1, &stored, &live, DriftPolicy::Strict);
        assert!(report.in_sync());
    }

    #[test]
    fn relaxed_policy_ignores_network_drift() {
        let report = compare(1, &mqtt("broker:1883"), &mqtt("other:1883"), DriftPolicy::Relaxed);
        assert!(report.in_sync());
    }

    #[test]
    fn strict_policy_reports_telemetry() {
        let stored = DeviceConfig {
            cloud: Some(CloudConfig { enabled: true }),
            ..Default::default()
        };
        let live = DeviceConfig {
            cloud: Some(CloudConfig { enabled: false }),
            ..Default::default()
        };
        assert!(compare(1, &stored, &live, DriftPolicy::Moderate).in_sync());
        let strict = compare(1, &stored, &live, DriftPolicy::Strict);
        assert_eq!(strict.entries.len(), 1);
        assert_eq!(strict.entries[0].severity, DriftSeverity::Telemetry);
    }

    #[test]
    fn stored_value_missing_live_is_drift() {
        let stored = mqtt("broker:1883");
        let live = DeviceConfig {
            mqtt: Some(MqttConfig {
                enabled: true,
                server: None,
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = compare(1, &stored, &live, DriftPolicy::Moderate);
        assert!(report.entries.iter().any(|e| e.path == "mqtt.server"));
    }
}
