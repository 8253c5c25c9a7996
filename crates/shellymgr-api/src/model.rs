// ── Cross-generation device types ──
//
// Normalised views the facade returns regardless of which firmware
// family answered. Raw payloads stay attached where the inventory
// needs them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two incompatible Shelly firmware families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Generation {
    /// REST-style API (`/shelly`, `/status`, `/settings`).
    Gen1,
    /// JSON-RPC over HTTP (`/rpc`). Covers gen 2 and later.
    Gen2,
}

impl Generation {
    /// The number the inventory stores: 1 or 2 (2 stands in for 2+).
    pub fn as_number(self) -> u8 {
        match self {
            Self::Gen1 => 1,
            Self::Gen2 => 2,
        }
    }

    pub fn from_number(n: u8) -> Self {
        if n <= 1 { Self::Gen1 } else { Self::Gen2 }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_number())
    }
}

/// What a probe learned about a device, before adoption.
///
/// `raw` preserves the untouched identification payload (`/shelly` or
/// `Shelly.GetDeviceInfo`) so the inventory keeps fields we don't model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdent {
    /// Canonical MAC: uppercase, colon-free (`68C63A123456`).
    pub mac: String,
    pub model: String,
    pub generation: Generation,
    pub firmware: Option<String>,
    pub name: Option<String>,
    pub auth_required: bool,
    pub raw: Value,
}

/// Canonicalise a MAC to the wire form Shelly devices use:
/// uppercase hex, no separators.
pub fn canonical_mac(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Normalised power/energy reading for one channel.
///
/// Power is watts and cumulative energy is kWh on every generation
/// (Gen1 reports Wh and is converted).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub channel: u8,
    pub power_w: f64,
    pub total_kwh: f64,
}

/// Result of a switch state change or query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwitchState {
    pub channel: u8,
    pub on: bool,
}

/// Firmware update availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCheck {
    pub current_version: Option<String>,
    pub new_version: Option<String>,
    pub has_update: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_mac_strips_separators_and_uppercases() {
        assert_eq!(canonical_mac("68:c6:3a:12:34:56"), "68C63A123456");
        assert_eq!(canonical_mac("68-C6-3A-12-34-56"), "68C63A123456");
        assert_eq!(canonical_mac("68C63A123456"), "68C63A123456");
    }

    #[test]
    fn generation_round_trips_through_numbers() {
        assert_eq!(Generation::from_number(1), Generation::Gen1);
        assert_eq!(Generation::from_number(2), Generation::Gen2);
        assert_eq!(Generation::from_number(3), Generation::Gen2);
        assert_eq!(Generation::Gen2.as_number(), 2);
    }
}
