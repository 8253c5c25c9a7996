// ── Core error types ──
//
// User-facing errors from shellymgr-core. Consumers never see raw sqlx
// or reqwest failures -- the From impls translate transport- and
// storage-layer errors into domain-appropriate variants. `kind()` gives
// every variant a stable string code the API facade maps onto HTTP.

use thiserror::Error;

use crate::config_model::FieldError;

/// Stable classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    AuthRequired,
    AuthFailed,
    Unreachable,
    Timeout,
    UnsupportedOnGeneration,
    Protocol,
    Storage,
    Plugin,
    Internal,
}

impl ErrorKind {
    /// The wire code used in API error envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation_failed",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::AuthRequired => "auth_required",
            Self::AuthFailed => "auth_failed",
            Self::Unreachable => "device_unreachable",
            Self::Timeout => "timeout",
            Self::UnsupportedOnGeneration => "unsupported_on_generation",
            Self::Protocol => "protocol_error",
            Self::Storage => "storage_error",
            Self::Plugin => "plugin_error",
            Self::Internal => "internal_error",
        }
    }

    /// Transient errors may succeed on retry; permanent ones will not.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Unreachable | Self::Storage)
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    #[error("Validation failed: {}", summarize(.errors))]
    Validation { errors: Vec<FieldError> },

    #[error("{entity} not found: {identifier}")]
    NotFound { entity: &'static str, identifier: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device requires authentication")]
    AuthRequired,

    #[error("Device authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Device unreachable: {message}")]
    Unreachable { message: String },

    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Operation {operation} not supported on Gen{generation}")]
    UnsupportedOnGeneration { operation: String, generation: u8 },

    #[error("Device protocol error: {message}")]
    Protocol { message: String },

    /// Structured fault reported by the device itself.
    #[error("Device error {code}: {message}")]
    Device { code: i64, message: String },

    // ── Infrastructure errors ────────────────────────────────────────
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Plugin {name} failed: {message}")]
    Plugin { name: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize(errors: &[FieldError]) -> String {
    if errors.is_empty() {
        return "invalid input".into();
    }
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::AuthRequired => ErrorKind::AuthRequired,
            Self::AuthFailed { .. } => ErrorKind::AuthFailed,
            Self::Unreachable { .. } => ErrorKind::Unreachable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::UnsupportedOnGeneration { .. } => ErrorKind::UnsupportedOnGeneration,
            Self::Protocol { .. } | Self::Device { .. } => ErrorKind::Protocol,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Plugin { .. } => ErrorKind::Plugin,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a single-field validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![FieldError {
                field: field.into(),
                code: "invalid".into(),
                message: message.into(),
            }],
        }
    }

    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }
}

// ── Conversion from device-client errors ─────────────────────────────

impl From<shellymgr_api::Error> for CoreError {
    fn from(err: shellymgr_api::Error) -> Self {
        match err {
            shellymgr_api::Error::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            shellymgr_api::Error::Unreachable { message } => Self::Unreachable { message },
            shellymgr_api::Error::AuthRequired => Self::AuthRequired,
            shellymgr_api::Error::AuthFailed { message } => Self::AuthFailed { message },
            shellymgr_api::Error::UnsupportedOnGeneration {
                operation,
                generation,
            } => Self::UnsupportedOnGeneration {
                operation: operation.to_owned(),
                generation,
            },
            shellymgr_api::Error::Protocol { message } => Self::Protocol { message },
            shellymgr_api::Error::Device { code, message } => Self::Device { code, message },
            shellymgr_api::Error::Transport(e) => {
                if e.is_timeout() {
                    Self::Timeout { seconds: 0 }
                } else if e.is_connect() {
                    Self::Unreachable {
                        message: e.to_string(),
                    }
                } else {
                    Self::Protocol {
                        message: e.to_string(),
                    }
                }
            }
            shellymgr_api::Error::InvalidUrl(e) => Self::Internal(format!("invalid URL: {e}")),
        }
    }
}

// ── Conversion from storage-layer errors ─────────────────────────────

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                identifier: String::new(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict {
                message: db.message().to_owned(),
            },
            _ => Self::Storage {
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ErrorKind::Conflict.as_str(), "conflict");
        assert_eq!(ErrorKind::Unreachable.as_str(), "device_unreachable");
        assert!(ErrorKind::Timeout.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
    }

    #[test]
    fn validation_lists_every_field() {
        let err = CoreError::Validation {
            errors: vec![
                FieldError {
                    field: "wifi.sta.ssid".into(),
                    code: "required".into(),
                    message: "must not be empty".into(),
                },
                FieldError {
                    field: "mqtt.server".into(),
                    code: "format".into(),
                    message: "expected host:port".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("wifi.sta.ssid"));
        assert!(text.contains("mqtt.server"));
    }
}
