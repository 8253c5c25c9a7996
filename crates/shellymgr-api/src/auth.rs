// Device authentication
//
// Gen1 devices protect endpoints with HTTP Basic; Gen2+ devices use HTTP
// Digest (RFC 7616) with a device-supplied nonce and algorithm. Credentials
// are applied lazily: the first 401 triggers a single authenticated retry.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Username/password pair for a protected device.
///
/// The password never appears in `Debug` output or serialised forms.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into().into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ── Digest challenge ────────────────────────────────────────────────

/// Hash algorithm advertised in a Digest challenge.
///
/// Gen2 firmware uses SHA-256; older builds fall back to MD5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    fn hash(self, input: &str) -> String {
        match self {
            Self::Md5 => hex::encode(md5::compute(input.as_bytes()).0),
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(input.as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// Set when the server rejected a previous response only because the
    /// nonce expired. One re-nonce retry is permitted in that case.
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse the value of a `WWW-Authenticate` header.
    pub fn parse(header: &str) -> Result<Self, Error> {
        let rest = header
            .strip_prefix("Digest ")
            .or_else(|| header.strip_prefix("digest "))
            .ok_or_else(|| Error::Protocol {
                message: format!("not a Digest challenge: {header:?}"),
            })?;

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = DigestAlgorithm::Md5;
        let mut stale = false;

        for part in split_challenge_params(rest) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value.to_owned()),
                "nonce" => nonce = Some(value.to_owned()),
                "qop" => qop = Some(value.to_owned()),
                "opaque" => opaque = Some(value.to_owned()),
                "algorithm" => {
                    algorithm = match value.to_ascii_uppercase().as_str() {
                        "SHA-256" => DigestAlgorithm::Sha256,
                        _ => DigestAlgorithm::Md5,
                    };
                }
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| Error::Protocol {
                message: "Digest challenge missing realm".into(),
            })?,
            nonce: nonce.ok_or_else(|| Error::Protocol {
                message: "Digest challenge missing nonce".into(),
            })?,
            qop,
            opaque,
            algorithm,
            stale,
        })
    }

    /// Compute the `Authorization` header value for a request.
    ///
    /// Implements the `qop=auth` response computation; Shelly firmware
    /// always advertises `qop="auth"`.
    pub fn authorization(
        &self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
    ) -> String {
        let cnonce = uuid::Uuid::new_v4().simple().to_string();
        let nc = "00000001";

        let ha1 = self.algorithm.hash(&format!(
            "{}:{}:{}",
            credentials.username,
            self.realm,
            credentials.password.expose_secret()
        ));
        let ha2 = self.algorithm.hash(&format!("{method}:{uri}"));

        let response = if self.qop.as_deref() == Some("auth") {
            self.algorithm
                .hash(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            self.algorithm.hash(&format!("{ha1}:{}:{ha2}", self.nonce))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", \
             response=\"{response}\", algorithm={}",
            credentials.username,
            self.realm,
            self.nonce,
            self.algorithm.label(),
        );
        if self.qop.as_deref() == Some("auth") {
            header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        header
    }
}

/// Split challenge parameters on commas, respecting quoted values
/// (a nonce may legally contain commas).
fn split_challenge_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CHALLENGE: &str = "Digest qop=\"auth\", realm=\"shellypro4pm-f008d1d8b8b8\", \
                             nonce=\"60dc3900\", algorithm=SHA-256";

    #[test]
    fn parses_gen2_challenge() {
        let c = DigestChallenge::parse(CHALLENGE).unwrap();
        assert_eq!(c.realm, "shellypro4pm-f008d1d8b8b8");
        assert_eq!(c.nonce, "60dc3900");
        assert_eq!(c.qop.as_deref(), Some("auth"));
        assert_eq!(c.algorithm, DigestAlgorithm::Sha256);
        assert!(!c.stale);
    }

    #[test]
    fn parses_md5_default_algorithm() {
        let c = DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\"").unwrap();
        assert_eq!(c.algorithm, DigestAlgorithm::Md5);
    }

    #[test]
    fn rejects_basic_challenge() {
        assert!(DigestChallenge::parse("Basic realm=\"r\"").is_err());
    }

    #[test]
    fn stale_flag_is_parsed() {
        let c =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", stale=true").unwrap();
        assert!(c.stale);
    }

    #[test]
    fn authorization_contains_required_fields() {
        let c = DigestChallenge::parse(CHALLENGE).unwrap();
        let creds = Credentials::new("admin", "secret");
        let header = c.authorization(&creds, "POST", "/rpc");
        assert!(header.starts_with("Digest username=\"admin\""));
        assert!(header.contains("realm=\"shellypro4pm-f008d1d8b8b8\""));
        assert!(header.contains("uri=\"/rpc\""));
        assert!(header.contains("qop=auth"));
        assert!(header.contains("algorithm=SHA-256"));
        assert!(header.contains("response=\""));
    }

    #[test]
    fn md5_response_matches_rfc2617_example() {
        // The worked example from RFC 2617 section 3.5.
        let challenge = DigestChallenge {
            realm: "testrealm@host.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            qop: Some("auth".into()),
            opaque: None,
            algorithm: DigestAlgorithm::Md5,
            stale: false,
        };
        let creds = Credentials::new("Mufasa", "Circle Of Life");
        let header = challenge.authorization(&creds, "GET", "/dir/index.html");
        // The response depends on the random cnonce, so recompute with the
        // same inputs instead of comparing against the RFC's literal value.
        let cnonce = header
            .split("cnonce=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap();
        let ha1 = DigestAlgorithm::Md5
            .hash("Mufasa:testrealm@host.com:Circle Of Life");
        let ha2 = DigestAlgorithm::Md5.hash("GET:/dir/index.html");
        let expected = DigestAlgorithm::Md5.hash(&format!(
            "{ha1}:dcd98b7102dd2f0e8b11d0f600bfb0c093:00000001:{cnonce}:auth:{ha2}"
        ));
        assert!(header.contains(&format!("response=\"{expected}\"")));
    }
}
