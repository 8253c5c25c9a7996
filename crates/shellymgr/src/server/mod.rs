// ── HTTP API (stateless facade over core services) ──

mod envelope;
mod handlers;

use std::sync::{Arc, RwLock};

use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Router;
use subtle::ConstantTimeEq;
use tracing::info;

use shellymgr_core::config_model::DriftPolicy;
use shellymgr_core::export::ExportEngine;
use shellymgr_core::provision::Provisioner;
use shellymgr_core::store::StorageProvider;
use shellymgr_core::{ClientCache, CoreError, Discovery};

use crate::context::AppContext;
use envelope::ApiError;

/// Shared state handed to every handler.
pub struct ServerState {
    pub store: Arc<dyn StorageProvider>,
    pub clients: Arc<ClientCache>,
    pub discovery: Discovery,
    pub provisioner: Arc<Provisioner>,
    pub engine: Arc<ExportEngine>,
    pub drift_policy: DriftPolicy,
    /// Rotatable admin key; absent means admin endpoints are disabled.
    pub admin_key: RwLock<Option<String>>,
}

impl ServerState {
    fn from_context(context: &AppContext) -> Self {
        Self {
            store: Arc::clone(&context.store),
            clients: Arc::clone(&context.clients),
            discovery: context.discovery.clone(),
            provisioner: Arc::clone(&context.provisioner),
            engine: Arc::clone(&context.engine),
            drift_policy: context.drift_policy,
            admin_key: RwLock::new(context.config.server.admin_key.clone()),
        }
    }

    /// Constant-time comparison of the `X-Admin-Key` header.
    pub fn require_admin(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let guard = self.admin_key.read().expect("admin key lock poisoned");
        let Some(expected) = guard.as_deref() else {
            return Err(ApiError(CoreError::AuthRequired));
        };
        let provided = headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(ApiError(CoreError::AuthFailed {
                message: "invalid admin key".into(),
            }))
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Devices
        .route(
            "/api/v1/devices",
            get(handlers::devices::list).post(handlers::devices::create),
        )
        .route(
            "/api/v1/devices/{id}",
            get(handlers::devices::get_one)
                .put(handlers::devices::update)
                .delete(handlers::devices::remove),
        )
        .route("/api/v1/devices/{id}/status", get(handlers::devices::status))
        .route("/api/v1/devices/{id}/energy", get(handlers::devices::energy))
        .route("/api/v1/devices/{id}/control", post(handlers::devices::control))
        // Configurations & drift
        .route(
            "/api/v1/devices/{id}/config",
            get(handlers::configurations::get_one).put(handlers::configurations::put),
        )
        .route(
            "/api/v1/devices/{id}/config/validate",
            post(handlers::configurations::validate_config),
        )
        .route(
            "/api/v1/devices/{id}/config/apply",
            post(handlers::configurations::apply),
        )
        .route(
            "/api/v1/devices/{id}/drift",
            get(handlers::configurations::last_drift).post(handlers::configurations::detect_drift),
        )
        .route(
            "/api/v1/configurations",
            get(handlers::configurations::list),
        )
        // Discovery & provisioning
        .route("/api/v1/discovery", post(handlers::discovery::run))
        .route("/api/v1/provisioning/scan", post(handlers::provisioning::scan))
        .route(
            "/api/v1/provisioning/discovered",
            get(handlers::provisioning::discovered),
        )
        .route("/api/v1/provisioning", post(handlers::provisioning::provision))
        .route(
            "/api/v1/provisioning/batch",
            post(handlers::provisioning::provision_batch),
        )
        // Templates
        .route(
            "/api/v1/templates",
            get(handlers::templates::list).post(handlers::templates::create),
        )
        .route(
            "/api/v1/templates/{id}",
            get(handlers::templates::get_one)
                .put(handlers::templates::update)
                .delete(handlers::templates::remove),
        )
        // Export / import
        .route("/api/v1/plugins", get(handlers::exports::plugins))
        .route("/api/v1/export", post(handlers::exports::export))
        .route("/api/v1/export/preview", post(handlers::exports::preview))
        .route("/api/v1/export/history", get(handlers::exports::export_history))
        .route(
            "/api/v1/export/download/{name}",
            get(handlers::exports::download),
        )
        .route("/api/v1/import", post(handlers::exports::import))
        .route("/api/v1/import/preview", post(handlers::exports::import_preview))
        .route("/api/v1/import/history", get(handlers::exports::import_history))
        // System
        .route("/api/v1/health", get(handlers::system::health))
        .route("/api/v1/admin/rotate-key", post(handlers::system::rotate_key))
        .route("/api/v1/admin/history", delete(handlers::system::delete_history))
        .route("/api/v1/admin/restore", post(handlers::system::restore))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(context: &AppContext) -> Result<(), std::io::Error> {
    let address = format!(
        "{}:{}",
        context.config.server.host, context.config.server.port
    );
    let state = Arc::new(ServerState::from_context(context));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "HTTP API listening");
    axum::serve(listener, router(state)).await
}
