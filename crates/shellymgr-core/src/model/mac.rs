// ── MAC address identity ──
//
// The MAC is the natural unique key of every inventory device. Canonical
// form matches what Shelly firmware reports: uppercase hex, no separators
// (`68C63A123456`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Canonicalised MAC address (uppercase, colon-free).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a canonical MAC from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex; must yield
    /// exactly 12 hex digits.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let canonical: String = raw
            .as_ref()
            .chars()
            .filter(char::is_ascii_hexdigit)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if canonical.len() != 12 {
            return Err(CoreError::validation(
                "mac",
                format!("{:?} is not a valid MAC address", raw.as_ref()),
            ));
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last six hex digits, used in factory SSIDs and default names.
    pub fn suffix6(&self) -> &str {
        &self.0[6..]
    }

    /// Colon-separated presentation form (`68:C6:3A:12:34:56`).
    pub fn pretty(&self) -> String {
        self.0
            .as_bytes()
            .chunks(2)
            .map(|pair| std::str::from_utf8(pair).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
