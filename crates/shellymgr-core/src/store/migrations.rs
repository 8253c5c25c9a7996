// ── Schema migrations ──
//
// Forward-only and idempotent: each migration is named, applied at most
// once, and recorded in the `migrations` table. Statements are rendered
// per backend for the few spellings that differ (auto-increment ids,
// boolean columns).

use sqlx::AnyPool;
use sqlx::Executor;
use tracing::{debug, info};

use super::backend::Backend;
use crate::error::CoreError;

/// A named migration: an ordered list of DDL statements.
struct Migration {
    name: &'static str,
    statements: Vec<String>,
}

fn schema(backend: Backend) -> Vec<Migration> {
    let id = backend.id_column();
    let boolean = backend.bool_type();
    let text = backend.text_type();

    vec![
        Migration {
            name: "0001_devices",
            statements: vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS devices (
                        id {id},
                        mac VARCHAR(12) NOT NULL UNIQUE,
                        ip VARCHAR(45) NOT NULL,
                        name VARCHAR(255),
                        device_type VARCHAR(64) NOT NULL,
                        generation BIGINT NOT NULL,
                        firmware VARCHAR(128),
                        status VARCHAR(16) NOT NULL,
                        last_seen VARCHAR(40),
                        settings {text} NOT NULL,
                        created_at VARCHAR(40) NOT NULL,
                        updated_at VARCHAR(40) NOT NULL
                    )"
                ),
                "CREATE INDEX idx_devices_ip ON devices (ip)".into(),
                "CREATE INDEX idx_devices_status ON devices (status)".into(),
            ],
        },
        Migration {
            name: "0002_configuration_templates",
            statements: vec![format!(
                "CREATE TABLE IF NOT EXISTS configuration_templates (
                    id {id},
                    name VARCHAR(255) NOT NULL UNIQUE,
                    device_type VARCHAR(64) NOT NULL,
                    generation BIGINT NOT NULL,
                    variables {text} NOT NULL,
                    config {text} NOT NULL,
                    is_default {boolean} NOT NULL,
                    created_at VARCHAR(40) NOT NULL,
                    updated_at VARCHAR(40) NOT NULL
                )"
            )],
        },
        Migration {
            name: "0003_device_configurations",
            statements: vec![format!(
                "CREATE TABLE IF NOT EXISTS device_configurations (
                    device_id BIGINT PRIMARY KEY
                        REFERENCES devices (id) ON DELETE CASCADE,
                    template_id BIGINT,
                    config {text} NOT NULL,
                    last_synced VARCHAR(40),
                    sync_status VARCHAR(16) NOT NULL,
                    updated_at VARCHAR(40) NOT NULL
                )"
            )],
        },
        Migration {
            name: "0004_drift_reports",
            statements: vec![format!(
                "CREATE TABLE IF NOT EXISTS drift_reports (
                    device_id BIGINT PRIMARY KEY
                        REFERENCES devices (id) ON DELETE CASCADE,
                    policy VARCHAR(16) NOT NULL,
                    entries {text} NOT NULL,
                    detected_at VARCHAR(40) NOT NULL
                )"
            )],
        },
        Migration {
            name: "0005_discovered_devices",
            statements: vec![format!(
                "CREATE TABLE IF NOT EXISTS discovered_devices (
                    mac VARCHAR(12) PRIMARY KEY,
                    ssid VARCHAR(64) NOT NULL,
                    model VARCHAR(64),
                    generation BIGINT NOT NULL,
                    ip VARCHAR(45) NOT NULL,
                    signal_percent BIGINT,
                    agent_id VARCHAR(64),
                    first_seen VARCHAR(40) NOT NULL
                )"
            )],
        },
        Migration {
            name: "0006_history",
            statements: vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS export_history (
                        id VARCHAR(36) PRIMARY KEY,
                        plugin VARCHAR(64) NOT NULL,
                        format VARCHAR(32) NOT NULL,
                        requested_by VARCHAR(128),
                        success {boolean} NOT NULL,
                        record_count BIGINT NOT NULL,
                        file_size BIGINT,
                        duration_ms BIGINT NOT NULL,
                        error {text},
                        request {text} NOT NULL,
                        created_at VARCHAR(40) NOT NULL
                    )"
                ),
                format!(
                    "CREATE TABLE IF NOT EXISTS import_history (
                        id VARCHAR(36) PRIMARY KEY,
                        plugin VARCHAR(64) NOT NULL,
                        format VARCHAR(32) NOT NULL,
                        requested_by VARCHAR(128),
                        success {boolean} NOT NULL,
                        records_imported BIGINT NOT NULL,
                        records_skipped BIGINT NOT NULL,
                        duration_ms BIGINT NOT NULL,
                        error {text},
                        request {text} NOT NULL,
                        created_at VARCHAR(40) NOT NULL
                    )"
                ),
            ],
        },
    ]
}

/// Run all pending migrations. Safe to call repeatedly.
pub async fn run(pool: &AnyPool, backend: Backend) -> Result<(), CoreError> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            name VARCHAR(64) PRIMARY KEY,
            applied_at VARCHAR(40) NOT NULL
        )",
    )
    .await?;

    let applied: Vec<String> = sqlx::query_scalar("SELECT name FROM migrations")
        .fetch_all(pool)
        .await?;

    let mut ran = 0;
    for migration in schema(backend) {
        if applied.iter().any(|name| name == migration.name) {
            debug!(name = migration.name, "migration already applied");
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in &migration.statements {
            (&mut *tx).execute(statement.as_str()).await.map_err(|e| {
                CoreError::Storage {
                    message: format!("migration {} failed: {e}", migration.name),
                }
            })?;
        }
        sqlx::query(&backend.sql("INSERT INTO migrations (name, applied_at) VALUES (?, ?)"))
            .bind(migration.name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(name = migration.name, "applied migration");
        ran += 1;
    }

    if ran > 0 {
        info!(count = ran, "schema migrations complete");
    }
    Ok(())
}
