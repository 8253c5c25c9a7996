// CLI error type: wraps core/config failures and maps each class to a
// stable process exit code.

use miette::Diagnostic;
use thiserror::Error;

use shellymgr_core::{CoreError, ErrorKind};

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("configuration error: {0}")]
    Config(#[from] shellymgr_config::ConfigError),

    #[error("{0}")]
    Usage(String),

    #[error("server failed: {0}")]
    Server(String),
}

impl CliError {
    /// Non-zero exit codes by failure class, 0 is success.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::Config(_) => 2,
            Self::Server(_) => 1,
            Self::Core(err) => match err.kind() {
                ErrorKind::Validation => 2,
                ErrorKind::NotFound => 3,
                ErrorKind::Conflict => 4,
                ErrorKind::AuthRequired | ErrorKind::AuthFailed => 5,
                ErrorKind::Unreachable | ErrorKind::Timeout => 6,
                ErrorKind::Storage => 7,
                _ => 1,
            },
        }
    }
}
