// Shared service wiring: one place builds the store, client cache,
// discovery, provisioner, and export engine from the loaded config.

use std::sync::Arc;
use std::time::Duration;

use shellymgr_api::{ClientCache, TransportConfig};
use shellymgr_config::Config;
use shellymgr_core::config_model::DriftPolicy;
use shellymgr_core::export::ExportEngine;
use shellymgr_core::provision::{NetworkAdapter, NoopAdapter, ProvisionConfig, Provisioner};
use shellymgr_core::store::{self, StorageConfig, StorageProvider};
use shellymgr_core::{Discovery, DiscoveryConfig};

use crate::error::CliError;

/// Everything a command or HTTP handler needs.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn StorageProvider>,
    pub clients: Arc<ClientCache>,
    pub discovery: Discovery,
    pub provisioner: Arc<Provisioner>,
    pub engine: Arc<ExportEngine>,
    pub drift_policy: DriftPolicy,
}

impl AppContext {
    /// Connect storage, run migrations, and wire the services.
    pub async fn build(config: Config) -> Result<Self, CliError> {
        let storage = StorageConfig {
            dsn: config.database.dsn.clone(),
            max_connections: config.database.max_connections,
            slow_query_threshold: Duration::from_millis(config.database.slow_query_ms),
            backup_dir: config.database.backup_dir.clone(),
            test_mode: false,
        };
        let store = store::connect(&storage).await.map_err(CliError::Core)?;

        let clients = Arc::new(ClientCache::new(TransportConfig::default()));

        let discovery = Discovery::new(
            Arc::clone(&store),
            Arc::clone(&clients),
            DiscoveryConfig {
                networks: config.discovery.networks.clone(),
                probe_timeout: Duration::from_secs(config.discovery.probe_timeout_secs),
                concurrency: config.discovery.concurrency,
                ..Default::default()
            },
        );

        let mut provision_config = ProvisionConfig::default();
        if let Some(timeout) = config.provisioning.timeout_secs {
            provision_config.overall_timeout = Duration::from_secs(timeout);
        }
        let adapter: Arc<dyn NetworkAdapter> = Arc::new(NoopAdapter);
        let provisioner = Arc::new(Provisioner::new(
            adapter,
            discovery.clone(),
            Arc::clone(&store),
            provision_config,
            Arc::new(tokio::sync::Mutex::new(())),
        ));

        let engine = Arc::new(ExportEngine::new(
            Arc::clone(&store),
            config.export.base_dir.clone(),
        ));
        engine.register_builtins().await.map_err(CliError::Core)?;

        Ok(Self {
            config,
            store,
            clients,
            discovery,
            provisioner,
            engine,
            drift_policy: DriftPolicy::default(),
        })
    }
}
