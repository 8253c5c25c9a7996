// ── SQL storage provider ──
//
// One implementation serves the embedded SQLite store and the networked
// PostgreSQL/MySQL engines through sqlx's Any driver. Backend-specific
// behaviour (pool class, pragmas, dialect) is delegated to `Backend`.
//
// The pool lives behind an async RwLock so the embedded backend can swap
// it out during a backup restore; every operation clones the pool out of
// a short read lock and never holds the lock across a query.

mod backup;
mod rows;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use sqlx::Executor;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{
    ConfigurationTemplate, Device, DeviceConfiguration, DiscoveredDevice, DriftReport,
    ExportRecord, ImportRecord, MacAddress, MergeOutcome, NewDevice, NewTemplate, Page, PageMeta,
    PageRequest, SyncStatus,
};

use super::backend::Backend;
use super::migrations;
use super::{
    BackupProvider, DeviceFilter, DeviceSort, HealthReport, ImportBatch, ImportCounts, Snapshot,
    StorageConfig, StorageProvider, StorageStats, TEST_MODE_ENV,
};

use rows::{opt_ts, ts};

// ── Query metrics ───────────────────────────────────────────────────

#[derive(Default)]
struct Metrics {
    total: AtomicU64,
    slow: AtomicU64,
    failed: AtomicU64,
    total_micros: AtomicU64,
}

/// Times an operation body and feeds the query counters.
macro_rules! timed {
    ($self:ident, $body:expr) => {{
        let started = Instant::now();
        let result = $body.await;
        $self.note(started, result.is_err());
        result
    }};
}

/// Dynamic bind value for filter-built queries.
enum Bind {
    S(String),
    I(i64),
}

// ── Store ───────────────────────────────────────────────────────────

/// sqlx-backed storage provider.
pub struct SqlStore {
    backend: Backend,
    pool: RwLock<AnyPool>,
    metrics: Metrics,
    slow_threshold: Duration,
    test_mode: bool,
    /// Database file path (embedded backend only, absent in memory mode).
    db_path: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
}

impl SqlStore {
    /// Establish and verify the connection.
    ///
    /// When [`TEST_MODE_ENV`] is set the store switches to an in-memory
    /// SQLite database regardless of the configured DSN -- the test
    /// suite depends on this contract.
    pub async fn connect(config: &StorageConfig) -> Result<Self, CoreError> {
        let test_mode = config.test_mode
            || std::env::var(TEST_MODE_ENV)
                .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let (backend, dsn) = if test_mode {
            (Backend::Sqlite, "sqlite::memory:".to_owned())
        } else {
            (Backend::from_dsn(&config.dsn)?, config.dsn.clone())
        };

        sqlx::any::install_default_drivers();

        let pool = build_pool(backend, &dsn, config.max_connections, test_mode).await?;

        // Verify the connection before declaring ourselves Connected.
        sqlx::query("SELECT 1").execute(&pool).await?;
        info!(backend = backend.name(), test_mode, "storage connected");

        let db_path = if test_mode {
            None
        } else {
            sqlite_file_path(backend, &dsn)
        };

        Ok(Self {
            backend,
            pool: RwLock::new(pool),
            metrics: Metrics::default(),
            slow_threshold: config.slow_query_threshold,
            test_mode,
            db_path,
            backup_dir: config.backup_dir.clone(),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    async fn pool(&self) -> AnyPool {
        self.pool.read().await.clone()
    }

    fn note(&self, started: Instant, failed: bool) {
        let elapsed = started.elapsed();
        self.metrics.total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if elapsed >= self.slow_threshold {
            self.metrics.slow.fetch_add(1, Ordering::Relaxed);
        }
        if failed {
            self.metrics.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn sql(&self, query: &str) -> String {
        self.backend.sql(query)
    }

    // ── Merge helper ─────────────────────────────────────────────────

    async fn merge_discovered(
        &self,
        new: &NewDevice,
    ) -> Result<(Device, MergeOutcome), CoreError> {
        let pool = self.pool().await;
        let mut tx = pool.begin().await?;

        let existing = sqlx::query(&self.sql("SELECT * FROM devices WHERE mac = ?"))
            .bind(new.mac.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let now = ts(Utc::now());
        let outcome = match existing.as_ref().map(rows::device).transpose()? {
            None => {
                sqlx::query(&self.sql(
                    "INSERT INTO devices \
                     (mac, ip, name, device_type, generation, firmware, status, last_seen, \
                      settings, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ))
                .bind(new.mac.as_str())
                .bind(new.ip.to_string())
                .bind(new.name.clone())
                .bind(new.device_type.clone())
                .bind(i64::from(new.generation.as_number()))
                .bind(new.firmware.clone())
                .bind(new.status.to_string())
                .bind(opt_ts(new.last_seen))
                .bind(new.settings.to_string())
                .bind(now.clone())
                .bind(now.clone())
                .execute(&mut *tx)
                .await?;
                MergeOutcome::Inserted
            }
            Some(current) => {
                sqlx::query(&self.sql(
                    "UPDATE devices SET ip = ?, firmware = ?, status = ?, last_seen = ?, \
                     settings = ?, updated_at = ? WHERE mac = ?",
                ))
                .bind(new.ip.to_string())
                .bind(new.firmware.clone())
                .bind(new.status.to_string())
                .bind(opt_ts(new.last_seen))
                .bind(new.settings.to_string())
                .bind(now.clone())
                .bind(new.mac.as_str())
                .execute(&mut *tx)
                .await?;
                if current.ip == new.ip {
                    MergeOutcome::Touched
                } else {
                    MergeOutcome::Moved { old_ip: current.ip }
                }
            }
        };

        let row = sqlx::query(&self.sql("SELECT * FROM devices WHERE mac = ?"))
            .bind(new.mac.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let device = rows::device(&row)?;

        tx.commit().await?;
        Ok((device, outcome))
    }
}

// ── Pool construction ───────────────────────────────────────────────

async fn build_pool(
    backend: Backend,
    dsn: &str,
    max_connections: Option<u32>,
    test_mode: bool,
) -> Result<AnyPool, sqlx::Error> {
    let max = max_connections.unwrap_or_else(|| backend.default_max_connections());
    let min = backend.default_min_connections().min(max);

    let mut options = AnyPoolOptions::new()
        .max_connections(max)
        .min_connections(min)
        .acquire_timeout(Duration::from_secs(5));

    if let Some(lifetime) = backend.max_lifetime() {
        options = options.max_lifetime(lifetime);
    }
    if let Some(idle) = backend.idle_timeout() {
        options = options.idle_timeout(idle);
    }

    let statements = backend.connect_statements(test_mode);
    if !statements.is_empty() {
        options = options.after_connect(move |conn, _meta| {
            let statements = statements.clone();
            Box::pin(async move {
                for statement in statements {
                    conn.execute(statement).await?;
                }
                Ok(())
            })
        });
    }

    options.connect(dsn).await
}

/// Extract the file path from an embedded DSN; `None` for in-memory.
fn sqlite_file_path(backend: Backend, dsn: &str) -> Option<PathBuf> {
    if !backend.is_embedded() {
        return None;
    }
    let rest = dsn.strip_prefix("sqlite://").or_else(|| dsn.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

// ── Provider contract ───────────────────────────────────────────────

#[async_trait]
impl StorageProvider for SqlStore {
    // ── Lifecycle ────────────────────────────────────────────────────

    async fn ping(&self) -> Result<(), CoreError> {
        let pool = self.pool().await;
        tokio::time::timeout(Duration::from_secs(5), sqlx::query("SELECT 1").execute(&pool))
            .await
            .map_err(|_| CoreError::Timeout { seconds: 5 })??;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), CoreError> {
        let pool = self.pool().await;
        migrations::run(&pool, self.backend).await
    }

    async fn close(&self) {
        self.pool().await.close().await;
        debug!("storage pool closed");
    }

    async fn stats(&self) -> Result<StorageStats, CoreError> {
        let pool = self.pool().await;

        let version: String = sqlx::query_scalar(self.backend.version_query())
            .fetch_one(&pool)
            .await?;
        let size: Option<i64> = sqlx::query_scalar(self.backend.size_query())
            .fetch_optional(&pool)
            .await?;

        let total = self.metrics.total.load(Ordering::Relaxed);
        let total_micros = self.metrics.total_micros.load(Ordering::Relaxed);
        let open = pool.size();
        let idle = pool.num_idle() as u32;

        Ok(StorageStats {
            backend: self.backend.name(),
            version,
            open_connections: open,
            idle_connections: idle,
            in_use_connections: open.saturating_sub(idle),
            total_queries: total,
            slow_queries: self.metrics.slow.load(Ordering::Relaxed),
            failed_queries: self.metrics.failed.load(Ordering::Relaxed),
            avg_latency_ms: if total == 0 {
                0.0
            } else {
                (total_micros as f64 / total as f64) / 1000.0
            },
            database_size_bytes: size.map(|s| s.max(0) as u64),
        })
    }

    async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let checked_at = Utc::now();

        let ping = self.ping().await;
        let stats = self.stats().await;

        let (healthy, error, details) = match (&ping, &stats) {
            (Ok(()), Ok(stats)) => (
                true,
                None,
                serde_json::json!({
                    "backend": stats.backend,
                    "version": stats.version,
                    "open_connections": stats.open_connections,
                    "idle_connections": stats.idle_connections,
                    "database_size_bytes": stats.database_size_bytes,
                    "test_mode": self.test_mode,
                }),
            ),
            (Err(e), _) => (false, Some(e.to_string()), serde_json::json!({})),
            (_, Err(e)) => (false, Some(e.to_string()), serde_json::json!({})),
        };

        HealthReport {
            healthy,
            response_time_ms: started.elapsed().as_millis() as u64,
            details,
            checked_at,
            error,
        }
    }

    // ── Devices ──────────────────────────────────────────────────────

    async fn add_device(&self, new: NewDevice) -> Result<Device, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let now = ts(Utc::now());
            sqlx::query(&self.sql(
                "INSERT INTO devices \
                 (mac, ip, name, device_type, generation, firmware, status, last_seen, \
                  settings, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ))
            .bind(new.mac.as_str())
            .bind(new.ip.to_string())
            .bind(new.name.clone())
            .bind(new.device_type.clone())
            .bind(i64::from(new.generation.as_number()))
            .bind(new.firmware.clone())
            .bind(new.status.to_string())
            .bind(opt_ts(new.last_seen))
            .bind(new.settings.to_string())
            .bind(now.clone())
            .bind(now)
            .execute(&pool)
            .await
            .map_err(|e| match CoreError::from(e) {
                CoreError::Conflict { .. } => CoreError::Conflict {
                    message: format!("device with MAC {} already exists", new.mac),
                },
                other => other,
            })?;

            self.get_device_by_mac(&new.mac).await
        })
    }

    async fn get_device(&self, id: i64) -> Result<Device, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let row = sqlx::query(&self.sql("SELECT * FROM devices WHERE id = ?"))
                .bind(id)
                .fetch_optional(&pool)
                .await?
                .ok_or_else(|| CoreError::not_found("device", id.to_string()))?;
            rows::device(&row)
        })
    }

    async fn get_device_by_mac(&self, mac: &MacAddress) -> Result<Device, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let row = sqlx::query(&self.sql("SELECT * FROM devices WHERE mac = ?"))
                .bind(mac.as_str())
                .fetch_optional(&pool)
                .await?
                .ok_or_else(|| CoreError::not_found("device", mac.to_string()))?;
            rows::device(&row)
        })
    }

    async fn get_device_by_ip(&self, ip: IpAddr) -> Result<Device, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let row = sqlx::query(&self.sql("SELECT * FROM devices WHERE ip = ?"))
                .bind(ip.to_string())
                .fetch_optional(&pool)
                .await?
                .ok_or_else(|| CoreError::not_found("device", ip.to_string()))?;
            rows::device(&row)
        })
    }

    async fn update_device(&self, device: &Device) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            // The MAC is immutable once created and is deliberately
            // absent from the SET list.
            let result = sqlx::query(&self.sql(
                "UPDATE devices SET ip = ?, name = ?, device_type = ?, generation = ?, \
                 firmware = ?, status = ?, last_seen = ?, settings = ?, updated_at = ? \
                 WHERE id = ?",
            ))
            .bind(device.ip.to_string())
            .bind(device.name.clone())
            .bind(device.device_type.clone())
            .bind(i64::from(device.generation.as_number()))
            .bind(device.firmware.clone())
            .bind(device.status.to_string())
            .bind(opt_ts(device.last_seen))
            .bind(device.settings.to_string())
            .bind(ts(Utc::now()))
            .bind(device.id)
            .execute(&pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::not_found("device", device.id.to_string()));
            }
            Ok(())
        })
    }

    async fn list_devices(
        &self,
        page: PageRequest,
        filter: &DeviceFilter,
        sort: DeviceSort,
    ) -> Result<Page<Device>, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let page = page.normalized();

            let mut clauses: Vec<&str> = Vec::new();
            let mut binds: Vec<Bind> = Vec::new();
            if let Some(status) = filter.status {
                clauses.push("status = ?");
                binds.push(Bind::S(status.to_string()));
            }
            if let Some(device_type) = &filter.device_type {
                clauses.push("device_type = ?");
                binds.push(Bind::S(device_type.clone()));
            }
            if let Some(generation) = filter.generation {
                clauses.push("generation = ?");
                binds.push(Bind::I(i64::from(generation)));
            }
            if let Some(fragment) = &filter.name_contains {
                clauses.push("name LIKE ?");
                binds.push(Bind::S(format!("%{fragment}%")));
            }
            if let Some(after) = filter.last_seen_after {
                clauses.push("last_seen > ?");
                binds.push(Bind::S(ts(after)));
            }

            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };

            let count_sql = self.sql(&format!("SELECT COUNT(*) FROM devices{where_sql}"));
            let mut count_query = sqlx::query_scalar(&count_sql);
            for bind in &binds {
                count_query = match bind {
                    Bind::S(s) => count_query.bind(s.clone()),
                    Bind::I(i) => count_query.bind(*i),
                };
            }
            let total: i64 = count_query.fetch_one(&pool).await?;

            let order = match sort {
                DeviceSort::Id => "id",
                DeviceSort::Name => "name",
                DeviceSort::Ip => "ip",
                DeviceSort::Mac => "mac",
                DeviceSort::LastSeen => "last_seen",
            };
            let page_sql = self.sql(&format!(
                "SELECT * FROM devices{where_sql} ORDER BY {order} LIMIT ? OFFSET ?"
            ));
            let mut page_query = sqlx::query(&page_sql);
            for bind in &binds {
                page_query = match bind {
                    Bind::S(s) => page_query.bind(s.clone()),
                    Bind::I(i) => page_query.bind(*i),
                };
            }
            let rows = page_query
                .bind(i64::from(page.page_size))
                .bind(i64::from(page.offset()))
                .fetch_all(&pool)
                .await?;

            let items = rows.iter().map(rows::device).collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                meta: PageMeta::new(page, total.max(0) as u64),
            })
        })
    }

    async fn delete_device(&self, id: i64) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let mut tx = pool.begin().await?;

            // Dependent rows go first: inline REFERENCES clauses are not
            // enforced on every backend.
            sqlx::query(&self.sql("DELETE FROM drift_reports WHERE device_id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(&self.sql("DELETE FROM device_configurations WHERE device_id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query(&self.sql("DELETE FROM devices WHERE id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::not_found("device", id.to_string()));
            }
            tx.commit().await?;
            Ok(())
        })
    }

    async fn upsert_discovered(
        &self,
        new: NewDevice,
    ) -> Result<(Device, MergeOutcome), CoreError> {
        timed!(self, async {
            match self.merge_discovered(&new).await {
                // A racing discovery inserted the same MAC first; re-run
                // the merge, which now takes the update path.
                Err(CoreError::Conflict { .. }) => self.merge_discovered(&new).await,
                other => other,
            }
        })
    }

    // ── Templates ────────────────────────────────────────────────────

    async fn add_template(&self, new: NewTemplate) -> Result<ConfigurationTemplate, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let now = ts(Utc::now());
            let variables = serde_json::to_string(&new.variables)
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            let config = serde_json::to_string(&new.config)
                .map_err(|e| CoreError::Internal(e.to_string()))?;

            sqlx::query(&self.sql(
                "INSERT INTO configuration_templates \
                 (name, device_type, generation, variables, config, is_default, \
                  created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            ))
            .bind(new.name.clone())
            .bind(new.device_type.clone())
            .bind(i64::from(new.generation))
            .bind(variables)
            .bind(config)
            .bind(i64::from(new.is_default))
            .bind(now.clone())
            .bind(now)
            .execute(&pool)
            .await
            .map_err(|e| match CoreError::from(e) {
                CoreError::Conflict { .. } => CoreError::Conflict {
                    message: format!("template {:?} already exists", new.name),
                },
                other => other,
            })?;

            self.get_template_by_name(&new.name).await
        })
    }

    async fn get_template(&self, id: i64) -> Result<ConfigurationTemplate, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let row = sqlx::query(&self.sql("SELECT * FROM configuration_templates WHERE id = ?"))
                .bind(id)
                .fetch_optional(&pool)
                .await?
                .ok_or_else(|| CoreError::not_found("template", id.to_string()))?;
            rows::template(&row)
        })
    }

    async fn get_template_by_name(&self, name: &str) -> Result<ConfigurationTemplate, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let row =
                sqlx::query(&self.sql("SELECT * FROM configuration_templates WHERE name = ?"))
                    .bind(name)
                    .fetch_optional(&pool)
                    .await?
                    .ok_or_else(|| CoreError::not_found("template", name))?;
            rows::template(&row)
        })
    }

    async fn update_template(&self, template: &ConfigurationTemplate) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let variables = serde_json::to_string(&template.variables)
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            let config = serde_json::to_string(&template.config)
                .map_err(|e| CoreError::Internal(e.to_string()))?;

            let result = sqlx::query(&self.sql(
                "UPDATE configuration_templates SET name = ?, device_type = ?, generation = ?, \
                 variables = ?, config = ?, is_default = ?, updated_at = ? WHERE id = ?",
            ))
            .bind(template.name.clone())
            .bind(template.device_type.clone())
            .bind(i64::from(template.generation))
            .bind(variables)
            .bind(config)
            .bind(i64::from(template.is_default))
            .bind(ts(Utc::now()))
            .bind(template.id)
            .execute(&pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::not_found("template", template.id.to_string()));
            }
            Ok(())
        })
    }

    async fn list_templates(
        &self,
        page: PageRequest,
    ) -> Result<Page<ConfigurationTemplate>, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let page = page.normalized();

            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM configuration_templates")
                .fetch_one(&pool)
                .await?;
            let rows = sqlx::query(&self.sql(
                "SELECT * FROM configuration_templates ORDER BY name LIMIT ? OFFSET ?",
            ))
            .bind(i64::from(page.page_size))
            .bind(i64::from(page.offset()))
            .fetch_all(&pool)
            .await?;

            let items = rows.iter().map(rows::template).collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                meta: PageMeta::new(page, total.max(0) as u64),
            })
        })
    }

    async fn delete_template(&self, id: i64) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let mut tx = pool.begin().await?;

            // Templates outlive devices; configurations keep working but
            // lose the back-reference.
            sqlx::query(&self.sql(
                "UPDATE device_configurations SET template_id = NULL WHERE template_id = ?",
            ))
            .bind(id)
            .execute(&mut *tx)
            .await?;
            let result = sqlx::query(&self.sql("DELETE FROM configuration_templates WHERE id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::not_found("template", id.to_string()));
            }
            tx.commit().await?;
            Ok(())
        })
    }

    // ── Device configurations ────────────────────────────────────────

    async fn upsert_configuration(&self, config: &DeviceConfiguration) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let mut tx = pool.begin().await?;

            let device_exists =
                sqlx::query(&self.sql("SELECT id FROM devices WHERE id = ?"))
                    .bind(config.device_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .is_some();
            if !device_exists {
                return Err(CoreError::not_found("device", config.device_id.to_string()));
            }

            let body = serde_json::to_string(&config.config)
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            let now = ts(Utc::now());

            let updated = sqlx::query(&self.sql(
                "UPDATE device_configurations SET template_id = ?, config = ?, \
                 last_synced = ?, sync_status = ?, updated_at = ? WHERE device_id = ?",
            ))
            .bind(config.template_id)
            .bind(body.clone())
            .bind(opt_ts(config.last_synced))
            .bind(config.sync_status.to_string())
            .bind(now.clone())
            .bind(config.device_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                sqlx::query(&self.sql(
                    "INSERT INTO device_configurations \
                     (device_id, template_id, config, last_synced, sync_status, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                ))
                .bind(config.device_id)
                .bind(config.template_id)
                .bind(body)
                .bind(opt_ts(config.last_synced))
                .bind(config.sync_status.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        })
    }

    async fn get_configuration(&self, device_id: i64) -> Result<DeviceConfiguration, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let row = sqlx::query(
                &self.sql("SELECT * FROM device_configurations WHERE device_id = ?"),
            )
            .bind(device_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| CoreError::not_found("configuration", device_id.to_string()))?;
            rows::configuration(&row)
        })
    }

    async fn list_configurations(
        &self,
        page: PageRequest,
    ) -> Result<Page<DeviceConfiguration>, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let page = page.normalized();

            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM device_configurations")
                .fetch_one(&pool)
                .await?;
            let rows = sqlx::query(&self.sql(
                "SELECT * FROM device_configurations ORDER BY device_id LIMIT ? OFFSET ?",
            ))
            .bind(i64::from(page.page_size))
            .bind(i64::from(page.offset()))
            .fetch_all(&pool)
            .await?;

            let items = rows
                .iter()
                .map(rows::configuration)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                meta: PageMeta::new(page, total.max(0) as u64),
            })
        })
    }

    async fn set_sync_status(
        &self,
        device_id: i64,
        status: SyncStatus,
        last_synced: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let result = sqlx::query(&self.sql(
                "UPDATE device_configurations SET sync_status = ?, last_synced = ?, \
                 updated_at = ? WHERE device_id = ?",
            ))
            .bind(status.to_string())
            .bind(opt_ts(last_synced))
            .bind(ts(Utc::now()))
            .bind(device_id)
            .execute(&pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::not_found("configuration", device_id.to_string()));
            }
            Ok(())
        })
    }

    async fn delete_configuration(&self, device_id: i64) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let result =
                sqlx::query(&self.sql("DELETE FROM device_configurations WHERE device_id = ?"))
                    .bind(device_id)
                    .execute(&pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::not_found("configuration", device_id.to_string()));
            }
            Ok(())
        })
    }

    // ── Drift reports ────────────────────────────────────────────────

    async fn save_drift_report(&self, report: &DriftReport) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let entries = serde_json::to_string(&report.entries)
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            let detected = ts(report.detected_at);

            let updated = sqlx::query(&self.sql(
                "UPDATE drift_reports SET policy = ?, entries = ?, detected_at = ? \
                 WHERE device_id = ?",
            ))
            .bind(report.policy.clone())
            .bind(entries.clone())
            .bind(detected.clone())
            .bind(report.device_id)
            .execute(&pool)
            .await?;

            if updated.rows_affected() == 0 {
                sqlx::query(&self.sql(
                    "INSERT INTO drift_reports (device_id, policy, entries, detected_at) \
                     VALUES (?, ?, ?, ?)",
                ))
                .bind(report.device_id)
                .bind(report.policy.clone())
                .bind(entries)
                .bind(detected)
                .execute(&pool)
                .await?;
            }
            Ok(())
        })
    }

    async fn get_drift_report(&self, device_id: i64) -> Result<DriftReport, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let row = sqlx::query(&self.sql("SELECT * FROM drift_reports WHERE device_id = ?"))
                .bind(device_id)
                .fetch_optional(&pool)
                .await?
                .ok_or_else(|| CoreError::not_found("drift report", device_id.to_string()))?;
            rows::drift_report(&row)
        })
    }

    async fn list_drift_reports(&self, page: PageRequest) -> Result<Page<DriftReport>, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let page = page.normalized();

            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM drift_reports")
                .fetch_one(&pool)
                .await?;
            let rows = sqlx::query(&self.sql(
                "SELECT * FROM drift_reports ORDER BY device_id LIMIT ? OFFSET ?",
            ))
            .bind(i64::from(page.page_size))
            .bind(i64::from(page.offset()))
            .fetch_all(&pool)
            .await?;

            let items = rows
                .iter()
                .map(rows::drift_report)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                meta: PageMeta::new(page, total.max(0) as u64),
            })
        })
    }

    // ── AP-mode discoveries ──────────────────────────────────────────

    async fn upsert_ap_device(&self, device: &DiscoveredDevice) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;

            let updated = sqlx::query(&self.sql(
                "UPDATE discovered_devices SET ssid = ?, model = ?, generation = ?, ip = ?, \
                 signal_percent = ?, agent_id = ? WHERE mac = ?",
            ))
            .bind(device.ssid.clone())
            .bind(device.model.clone())
            .bind(i64::from(device.generation.as_number()))
            .bind(device.ip.to_string())
            .bind(device.signal_percent.map(i64::from))
            .bind(device.agent_id.clone())
            .bind(device.mac.as_str())
            .execute(&pool)
            .await?;

            if updated.rows_affected() == 0 {
                sqlx::query(&self.sql(
                    "INSERT INTO discovered_devices \
                     (mac, ssid, model, generation, ip, signal_percent, agent_id, first_seen) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                ))
                .bind(device.mac.as_str())
                .bind(device.ssid.clone())
                .bind(device.model.clone())
                .bind(i64::from(device.generation.as_number()))
                .bind(device.ip.to_string())
                .bind(device.signal_percent.map(i64::from))
                .bind(device.agent_id.clone())
                .bind(ts(device.first_seen))
                .execute(&pool)
                .await?;
            }
            Ok(())
        })
    }

    async fn list_ap_devices(&self) -> Result<Vec<DiscoveredDevice>, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let rows = sqlx::query("SELECT * FROM discovered_devices ORDER BY first_seen")
                .fetch_all(&pool)
                .await?;
            rows.iter()
                .map(rows::discovered)
                .collect::<Result<Vec<DiscoveredDevice>, CoreError>>()
        })
    }

    async fn clear_ap_devices(&self) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            sqlx::query("DELETE FROM discovered_devices")
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    // ── Export pipeline support ──────────────────────────────────────

    async fn load_snapshot(&self) -> Result<Snapshot, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let mut tx = pool.begin().await?;

            let devices = sqlx::query("SELECT * FROM devices ORDER BY id")
                .fetch_all(&mut *tx)
                .await?
                .iter()
                .map(rows::device)
                .collect::<Result<Vec<_>, _>>()?;
            let templates = sqlx::query("SELECT * FROM configuration_templates ORDER BY id")
                .fetch_all(&mut *tx)
                .await?
                .iter()
                .map(rows::template)
                .collect::<Result<Vec<_>, _>>()?;
            let configurations =
                sqlx::query("SELECT * FROM device_configurations ORDER BY device_id")
                    .fetch_all(&mut *tx)
                    .await?
                    .iter()
                    .map(rows::configuration)
                    .collect::<Result<Vec<_>, _>>()?;

            tx.commit().await?;
            Ok(Snapshot {
                devices,
                templates,
                configurations,
            })
        })
    }

    #[allow(clippy::too_many_lines)]
    async fn apply_import(&self, batch: &ImportBatch) -> Result<ImportCounts, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let mut tx = pool.begin().await?;
            let mut counts = ImportCounts::default();
            let now = ts(Utc::now());

            for device in &batch.devices {
                let existing = sqlx::query(&self.sql("SELECT id FROM devices WHERE mac = ?"))
                    .bind(device.mac.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
                match existing {
                    Some(_) if !batch.force_overwrite => counts.skipped += 1,
                    Some(_) => {
                        sqlx::query(&self.sql(
                            "UPDATE devices SET ip = ?, name = ?, device_type = ?, \
                             generation = ?, firmware = ?, status = ?, settings = ?, \
                             updated_at = ? WHERE mac = ?",
                        ))
                        .bind(device.ip.to_string())
                        .bind(device.name.clone())
                        .bind(device.device_type.clone())
                        .bind(i64::from(device.generation.as_number()))
                        .bind(device.firmware.clone())
                        .bind(device.status.to_string())
                        .bind(device.settings.to_string())
                        .bind(now.clone())
                        .bind(device.mac.as_str())
                        .execute(&mut *tx)
                        .await?;
                        counts.imported += 1;
                    }
                    None => {
                        sqlx::query(&self.sql(
                            "INSERT INTO devices \
                             (mac, ip, name, device_type, generation, firmware, status, \
                              last_seen, settings, created_at, updated_at) \
                             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        ))
                        .bind(device.mac.as_str())
                        .bind(device.ip.to_string())
                        .bind(device.name.clone())
                        .bind(device.device_type.clone())
                        .bind(i64::from(device.generation.as_number()))
                        .bind(device.firmware.clone())
                        .bind(device.status.to_string())
                        .bind(opt_ts(device.last_seen))
                        .bind(device.settings.to_string())
                        .bind(now.clone())
                        .bind(now.clone())
                        .execute(&mut *tx)
                        .await?;
                        counts.imported += 1;
                    }
                }
            }

            for template in &batch.templates {
                let existing = sqlx::query(
                    &self.sql("SELECT id FROM configuration_templates WHERE name = ?"),
                )
                .bind(template.name.clone())
                .fetch_optional(&mut *tx)
                .await?;
                let variables = serde_json::to_string(&template.variables)
                    .map_err(|e| CoreError::Internal(e.to_string()))?;
                let config = serde_json::to_string(&template.config)
                    .map_err(|e| CoreError::Internal(e.to_string()))?;
                match existing {
                    Some(_) if !batch.force_overwrite => counts.skipped += 1,
                    Some(_) => {
                        sqlx::query(&self.sql(
                            "UPDATE configuration_templates SET device_type = ?, \
                             generation = ?, variables = ?, config = ?, is_default = ?, \
                             updated_at = ? WHERE name = ?",
                        ))
                        .bind(template.device_type.clone())
                        .bind(i64::from(template.generation))
                        .bind(variables)
                        .bind(config)
                        .bind(i64::from(template.is_default))
                        .bind(now.clone())
                        .bind(template.name.clone())
                        .execute(&mut *tx)
                        .await?;
                        counts.imported += 1;
                    }
                    None => {
                        sqlx::query(&self.sql(
                            "INSERT INTO configuration_templates \
                             (name, device_type, generation, variables, config, is_default, \
                              created_at, updated_at) \
                             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                        ))
                        .bind(template.name.clone())
                        .bind(template.device_type.clone())
                        .bind(i64::from(template.generation))
                        .bind(variables)
                        .bind(config)
                        .bind(i64::from(template.is_default))
                        .bind(now.clone())
                        .bind(now.clone())
                        .execute(&mut *tx)
                        .await?;
                        counts.imported += 1;
                    }
                }
            }

            for (mac, config) in &batch.configurations {
                let device_id: Option<i64> =
                    sqlx::query_scalar(&self.sql("SELECT id FROM devices WHERE mac = ?"))
                        .bind(mac.as_str())
                        .fetch_optional(&mut *tx)
                        .await?;
                let Some(device_id) = device_id else {
                    counts.skipped += 1;
                    continue;
                };
                let body = serde_json::to_string(config)
                    .map_err(|e| CoreError::Internal(e.to_string()))?;

                let existing = sqlx::query(
                    &self.sql("SELECT device_id FROM device_configurations WHERE device_id = ?"),
                )
                .bind(device_id)
                .fetch_optional(&mut *tx)
                .await?;
                match existing {
                    Some(_) if !batch.force_overwrite => counts.skipped += 1,
                    Some(_) => {
                        sqlx::query(&self.sql(
                            "UPDATE device_configurations SET config = ?, sync_status = ?, \
                             updated_at = ? WHERE device_id = ?",
                        ))
                        .bind(body)
                        .bind(SyncStatus::Pending.to_string())
                        .bind(now.clone())
                        .bind(device_id)
                        .execute(&mut *tx)
                        .await?;
                        counts.imported += 1;
                    }
                    None => {
                        sqlx::query(&self.sql(
                            "INSERT INTO device_configurations \
                             (device_id, template_id, config, last_synced, sync_status, \
                              updated_at) VALUES (?, NULL, ?, NULL, ?, ?)",
                        ))
                        .bind(device_id)
                        .bind(body)
                        .bind(SyncStatus::Pending.to_string())
                        .bind(now.clone())
                        .execute(&mut *tx)
                        .await?;
                        counts.imported += 1;
                    }
                }
            }

            tx.commit().await?;
            Ok(counts)
        })
    }

    // ── History ──────────────────────────────────────────────────────

    async fn record_export(&self, record: &ExportRecord) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            sqlx::query(&self.sql(
                "INSERT INTO export_history \
                 (id, plugin, format, requested_by, success, record_count, file_size, \
                  duration_ms, error, request, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ))
            .bind(record.id.clone())
            .bind(record.plugin.clone())
            .bind(record.format.clone())
            .bind(record.requested_by.clone())
            .bind(i64::from(record.success))
            .bind(record.record_count as i64)
            .bind(record.file_size.map(|s| s as i64))
            .bind(record.duration_ms as i64)
            .bind(record.error.clone())
            .bind(record.request.to_string())
            .bind(ts(record.created_at))
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    async fn record_import(&self, record: &ImportRecord) -> Result<(), CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            sqlx::query(&self.sql(
                "INSERT INTO import_history \
                 (id, plugin, format, requested_by, success, records_imported, \
                  records_skipped, duration_ms, error, request, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ))
            .bind(record.id.clone())
            .bind(record.plugin.clone())
            .bind(record.format.clone())
            .bind(record.requested_by.clone())
            .bind(i64::from(record.success))
            .bind(record.records_imported as i64)
            .bind(record.records_skipped as i64)
            .bind(record.duration_ms as i64)
            .bind(record.error.clone())
            .bind(record.request.to_string())
            .bind(ts(record.created_at))
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    async fn list_export_history(
        &self,
        page: PageRequest,
    ) -> Result<Page<ExportRecord>, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let page = page.normalized();

            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM export_history")
                .fetch_one(&pool)
                .await?;
            let rows = sqlx::query(&self.sql(
                "SELECT * FROM export_history ORDER BY created_at DESC LIMIT ? OFFSET ?",
            ))
            .bind(i64::from(page.page_size))
            .bind(i64::from(page.offset()))
            .fetch_all(&pool)
            .await?;

            let items = rows
                .iter()
                .map(rows::export_record)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                meta: PageMeta::new(page, total.max(0) as u64),
            })
        })
    }

    async fn list_import_history(
        &self,
        page: PageRequest,
    ) -> Result<Page<ImportRecord>, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let page = page.normalized();

            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_history")
                .fetch_one(&pool)
                .await?;
            let rows = sqlx::query(&self.sql(
                "SELECT * FROM import_history ORDER BY created_at DESC LIMIT ? OFFSET ?",
            ))
            .bind(i64::from(page.page_size))
            .bind(i64::from(page.offset()))
            .fetch_all(&pool)
            .await?;

            let items = rows
                .iter()
                .map(rows::import_record)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                meta: PageMeta::new(page, total.max(0) as u64),
            })
        })
    }

    async fn delete_history(&self) -> Result<u64, CoreError> {
        timed!(self, async {
            let pool = self.pool().await;
            let exports = sqlx::query("DELETE FROM export_history")
                .execute(&pool)
                .await?;
            let imports = sqlx::query("DELETE FROM import_history")
                .execute(&pool)
                .await?;
            Ok(exports.rows_affected() + imports.rows_affected())
        })
    }

    // ── Optional capabilities ────────────────────────────────────────

    fn backup(&self) -> Option<&dyn BackupProvider> {
        if self.backend.is_embedded() && self.db_path.is_some() && self.backup_dir.is_some() {
            Some(self)
        } else {
            None
        }
    }
}
