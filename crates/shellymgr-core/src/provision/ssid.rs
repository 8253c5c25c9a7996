// ── Factory SSID parsing ──
//
// Factory APs announce `shelly<model>-<mac>` where the MAC part is the
// full 12-digit address on Plus/Pro firmware and the 6-digit suffix on
// Gen1. The model token maps to a vendor model string through a static
// table.

use shellymgr_api::Generation;

/// Result of parsing a `shelly*` SSID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSsid {
    pub ssid: String,
    /// Model token between the `shelly` prefix and the MAC part,
    /// e.g. `plug-s` or `plus1pm`. Empty for bare `shelly-XXXXXX`.
    pub model_token: String,
    /// 12 hex digits (full MAC) or 6 (suffix only), uppercase.
    pub mac_hex: String,
}

impl ParsedSsid {
    pub fn generation(&self) -> Generation {
        // Plus/Pro firmware broadcasts the full MAC; Gen1 only the suffix.
        if self.mac_hex.len() == 12 || self.model_token.starts_with("plus")
            || self.model_token.starts_with("pro")
        {
            Generation::Gen2
        } else {
            Generation::Gen1
        }
    }

    /// Vendor model string for the token, if known.
    pub fn model(&self) -> Option<&'static str> {
        lookup_model(&self.model_token)
    }

    /// The trailing six MAC digits, used for default names and target
    /// network polling.
    pub fn mac_suffix(&self) -> &str {
        &self.mac_hex[self.mac_hex.len() - 6..]
    }

    /// Default display name when the caller provides none.
    pub fn default_name(&self) -> String {
        format!("Shelly-{}", self.mac_suffix())
    }
}

/// Parse a factory SSID. Returns `None` for anything that is not a
/// Shelly AP announcement.
pub fn parse_shelly_ssid(ssid: &str) -> Option<ParsedSsid> {
    let lower = ssid.to_lowercase();
    let rest = lower.strip_prefix("shelly")?;

    // The MAC part is the final dash-separated segment.
    let (token, mac_part) = match rest.rfind('-') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => ("", rest),
    };

    let is_hex = !mac_part.is_empty() && mac_part.chars().all(|c| c.is_ascii_hexdigit());
    if !is_hex || !(mac_part.len() == 6 || mac_part.len() == 12) {
        return None;
    }

    Some(ParsedSsid {
        ssid: ssid.to_owned(),
        model_token: token.trim_matches('-').to_owned(),
        mac_hex: mac_part.to_ascii_uppercase(),
    })
}

/// Static model table keyed by SSID token.
fn lookup_model(token: &str) -> Option<&'static str> {
    let model = match token {
        "1" => "SHSW-1",
        "1pm" => "SHSW-PM",
        "1l" => "SHSW-L",
        "switch25" => "SHSW-25",
        "plug" => "SHPLG2-1",
        "plug-s" | "plugs" => "SHPLG-S",
        "em" => "SHEM",
        "em3" | "3em" => "SHEM-3",
        "dimmer" => "SHDM-1",
        "dimmer2" => "SHDM-2",
        "rgbw2" => "SHRGBW2",
        "bulb" => "SHBLB-1",
        "duo" => "SHBDUO-1",
        "vintage" => "SHVIN-1",
        "ht" => "SHHT-1",
        "flood" => "SHWT-1",
        "dw2" => "SHDW-2",
        "button1" => "SHBTN-2",
        "ix3" => "SHIX3-1",
        "uni" => "SHUNI-1",
        "plus1" => "SNSW-001X16EU",
        "plus1pm" => "SNSW-001P16EU",
        "plus2pm" => "SNSW-102P16EU",
        "plusi4" => "SNSN-0024X",
        "plusplugs" => "SNPL-00112EU",
        "plusht" => "SNSN-0013A",
        "pro1" => "SPSW-201XE16EU",
        "pro1pm" => "SPSW-201PE16EU",
        "pro2" => "SPSW-202XE16EU",
        "pro2pm" => "SPSW-202PE16EU",
        "pro3" => "SPSW-003XE16EU",
        "pro4pm" => "SPSW-004PE16EU",
        _ => return None,
    };
    Some(model)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_gen1_plug_ssid() {
        let parsed = parse_shelly_ssid("shellyplug-s-112233").unwrap();
        assert_eq!(parsed.model_token, "plug-s");
        assert_eq!(parsed.mac_hex, "112233");
        assert_eq!(parsed.generation(), Generation::Gen1);
        assert_eq!(parsed.model(), Some("SHPLG-S"));
        assert_eq!(parsed.default_name(), "Shelly-112233");
    }

    #[test]
    fn parses_gen2_full_mac_ssid() {
        let parsed = parse_shelly_ssid("ShellyPlus1-A8032AB12345").unwrap();
        assert_eq!(parsed.model_token, "plus1");
        assert_eq!(parsed.mac_hex, "A8032AB12345");
        assert_eq!(parsed.generation(), Generation::Gen2);
        assert_eq!(parsed.mac_suffix(), "B12345");
    }

    #[test]
    fn rejects_foreign_ssids() {
        assert!(parse_shelly_ssid("MyHomeWifi").is_none());
        assert!(parse_shelly_ssid("shellyplug-s-notahex").is_none());
        assert!(parse_shelly_ssid("shelly").is_none());
    }

    #[test]
    fn switch25_token_maps_to_model() {
        let parsed = parse_shelly_ssid("shellyswitch25-AABBCC").unwrap();
        assert_eq!(parsed.model(), Some("SHSW-25"));
        assert_eq!(parsed.generation(), Generation::Gen1);
    }

    #[test]
    fn unknown_token_still_parses() {
        let parsed = parse_shelly_ssid("shellysomethingnew-AABBCC").unwrap();
        assert_eq!(parsed.model(), None);
    }
}
