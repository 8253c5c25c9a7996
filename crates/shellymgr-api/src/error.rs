use thiserror::Error;

/// Top-level error type for the `shellymgr-api` crate.
///
/// Covers every failure mode a single device interaction can produce:
/// transport, authentication, protocol, and device-reported faults.
/// `shellymgr-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Reachability ────────────────────────────────────────────────
    /// The device did not answer within the deadline.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The device could not be reached at all (refused, no route, DNS).
    #[error("Device unreachable: {message}")]
    Unreachable { message: String },

    // ── Authentication ──────────────────────────────────────────────
    /// The device requires credentials and none were supplied.
    #[error("Device requires authentication")]
    AuthRequired,

    /// Credentials were supplied but the device rejected them.
    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// The operation is not available on the device's firmware generation.
    #[error("Operation {operation} not supported on Gen{generation}")]
    UnsupportedOnGeneration {
        operation: &'static str,
        generation: u8,
    },

    /// The device answered with something we could not make sense of.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// A structured error reported by the device itself
    /// (e.g. an RPC error frame or an overtemperature lockout).
    #[error("Device error {code}: {message}")]
    Device { code: i64, message: String },

    // ── Transport plumbing ──────────────────────────────────────────
    /// HTTP transport error that is neither a timeout nor a connect failure.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL construction failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Classify a `reqwest` failure into the reachability variants.
    ///
    /// Timeouts and connection-level failures get their own variants so
    /// callers can distinguish transient from structural problems; anything
    /// else stays a raw transport error.
    pub fn from_transport(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_secs }
        } else if err.is_connect() || err.is_request() {
            Self::Unreachable {
                message: err.to_string(),
            }
        } else {
            Self::Transport(err)
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Unreachable { .. } => true,
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if re-authenticating could resolve this error.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRequired | Self::AuthFailed { .. })
    }
}
