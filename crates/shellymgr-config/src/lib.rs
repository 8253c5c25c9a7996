//! Shared configuration for the shellymgr CLI and server.
//!
//! Layered loading: built-in defaults → TOML file → `SHELLY_*`
//! environment variables (double underscore as the nesting separator,
//! e.g. `SHELLY_DATABASE__DSN`). The admin key and database DSN are
//! always overridable via env.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Admin API key; compared in constant time at the HTTP edge.
    /// Override with `SHELLY_SERVER__ADMIN_KEY`.
    #[serde(default)]
    pub admin_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// `sqlite:...`, `postgres://...`, or `mysql://...`.
    /// Override with `SHELLY_DATABASE__DSN`.
    #[serde(default = "default_dsn")]
    pub dsn: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
            max_connections: None,
            slow_query_ms: default_slow_query_ms(),
            backup_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverySection {
    /// CIDR blocks swept by `discover auto`.
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            probe_timeout_secs: default_probe_timeout(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvisioningSection {
    /// Default target network for `provision` when none is given.
    #[serde(default)]
    pub target_ssid: Option<String>,
    #[serde(default)]
    pub target_password: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportSection {
    /// Root for file-sink artifacts and the download guard.
    #[serde(default = "default_export_dir")]
    pub base_dir: PathBuf,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            base_dir: default_export_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSection {
    /// `error|warn|info|debug|trace`, or a full EnvFilter directive.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub provisioning: ProvisioningSection,
    #[serde(default)]
    pub export: ExportSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_dsn() -> String {
    "sqlite:shellymgr.db?mode=rwc".into()
}
fn default_slow_query_ms() -> u64 {
    500
}
fn default_probe_timeout() -> u64 {
    2
}
fn default_concurrency() -> usize {
    20
}
fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}
fn default_log_level() -> String {
    "info".into()
}

// ── Loading ─────────────────────────────────────────────────────────

/// Default config file location: `$XDG_CONFIG_HOME/shellymgr/shellymgr.toml`
/// (platform equivalent), falling back to `./shellymgr.toml`.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "shellymgr")
        .map(|dirs| dirs.config_dir().join("shellymgr.toml"))
        .unwrap_or_else(|| PathBuf::from("shellymgr.toml"))
}

/// Load configuration: defaults → TOML file → `SHELLY_*` env.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let file = path.map_or_else(default_config_path, Path::to_path_buf);

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&file))
        .merge(Env::prefixed("SHELLY_").split("__"))
        .extract()?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::Validation {
            field: "server.port".into(),
            reason: "port 0 is not listenable".into(),
        });
    }
    let scheme = config.database.dsn.split(':').next().unwrap_or_default();
    if !matches!(scheme, "sqlite" | "postgres" | "postgresql" | "mysql" | "mariadb") {
        return Err(ConfigError::Validation {
            field: "database.dsn".into(),
            reason: format!("unsupported backend scheme {scheme:?}"),
        });
    }
    Ok(())
}

/// Render the default configuration as commented TOML (for `config init`).
pub fn default_toml() -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(&Config::default())?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.dsn, "sqlite:shellymgr.db?mode=rwc");
        assert_eq!(config.discovery.probe_timeout_secs, 2);
        assert_eq!(config.discovery.concurrency, 20);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shellymgr.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9090

[discovery]
networks = ["192.168.1.0/24"]
"#,
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.discovery.networks, vec!["192.168.1.0/24"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.database.slow_query_ms, 500);
    }

    #[test]
    fn bad_dsn_scheme_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shellymgr.toml");
        std::fs::write(&path, "[database]\ndsn = \"mongodb://nope\"\n").unwrap();
        assert!(matches!(
            load(Some(&path)),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn default_toml_round_trips() {
        let rendered = default_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.server.port, Config::default().server.port);
    }
}
