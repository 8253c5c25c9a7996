// ── Embedded-backend backups ──
//
// Snapshots are taken with `VACUUM INTO`, which produces a consistent
// copy of a live WAL database without blocking writers. Each backup
// carries a `.sha256` sidecar; validation and restore verify it before
// touching anything. Restore swaps the pool: close, copy, reconnect.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::CoreError;

use super::super::{BackupInfo, BackupProvider};
use super::{build_pool, SqlStore};

impl SqlStore {
    fn backup_paths(&self) -> Result<(&Path, &Path), CoreError> {
        let db_path = self.db_path.as_deref().ok_or_else(|| {
            CoreError::Internal("backups require a file-backed embedded store".into())
        })?;
        let backup_dir = self.backup_dir.as_deref().ok_or_else(|| {
            CoreError::Internal("no backup directory configured".into())
        })?;
        Ok((db_path, backup_dir))
    }

    /// Reject names with separators so callers can't escape the backup
    /// directory.
    fn backup_file(&self, name: &str) -> Result<PathBuf, CoreError> {
        let (_, backup_dir) = self.backup_paths()?;
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(CoreError::validation("name", "invalid backup name"));
        }
        Ok(backup_dir.join(name))
    }
}

async fn sha256_file(path: &Path) -> Result<String, CoreError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| CoreError::Storage {
        message: format!("cannot read {}: {e}", path.display()),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn sidecar(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".sha256");
    PathBuf::from(os)
}

#[async_trait]
impl BackupProvider for SqlStore {
    async fn create_backup(&self) -> Result<BackupInfo, CoreError> {
        let (_, backup_dir) = self.backup_paths()?;
        tokio::fs::create_dir_all(backup_dir)
            .await
            .map_err(|e| CoreError::Storage {
                message: format!("cannot create backup directory: {e}"),
            })?;

        let name = format!("shellymgr-{}.db", Utc::now().format("%Y%m%d%H%M%S"));
        let target = backup_dir.join(&name);
        let escaped = target.display().to_string().replace('\'', "''");

        let pool = self.pool.read().await.clone();
        sqlx::query(&format!("VACUUM INTO '{escaped}'"))
            .execute(&pool)
            .await?;

        let checksum = sha256_file(&target).await?;
        tokio::fs::write(sidecar(&target), &checksum)
            .await
            .map_err(|e| CoreError::Storage {
                message: format!("cannot write checksum sidecar: {e}"),
            })?;

        let size_bytes = tokio::fs::metadata(&target)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        info!(name, size_bytes, "created backup");
        Ok(BackupInfo {
            name,
            size_bytes,
            created_at: Utc::now(),
            checksum,
        })
    }

    async fn restore_backup(&self, name: &str) -> Result<(), CoreError> {
        let source = self.backup_file(name)?;
        if !self.validate_backup(name).await? {
            return Err(CoreError::Storage {
                message: format!("backup {name} failed checksum validation"),
            });
        }

        let db_path = self
            .db_path
            .clone()
            .ok_or_else(|| CoreError::Internal("no database path".into()))?;

        // Swap the pool: writers block on the lock until the new pool is in.
        let mut guard = self.pool.write().await;
        guard.close().await;

        // WAL/SHM leftovers belong to the old database.
        for suffix in ["-wal", "-shm"] {
            let mut os = db_path.as_os_str().to_owned();
            os.push(suffix);
            let _ = tokio::fs::remove_file(PathBuf::from(os)).await;
        }

        tokio::fs::copy(&source, &db_path)
            .await
            .map_err(|e| CoreError::Storage {
                message: format!("restore copy failed: {e}"),
            })?;

        let dsn = format!("sqlite://{}?mode=rwc", db_path.display());
        *guard = build_pool(self.backend, &dsn, Some(1), self.test_mode)
            .await
            .map_err(CoreError::from)?;

        info!(name, "restored backup");
        Ok(())
    }

    async fn validate_backup(&self, name: &str) -> Result<bool, CoreError> {
        let path = self.backup_file(name)?;
        let expected = tokio::fs::read_to_string(sidecar(&path))
            .await
            .map_err(|e| CoreError::Storage {
                message: format!("missing checksum sidecar for {name}: {e}"),
            })?;
        let actual = sha256_file(&path).await?;
        let ok = expected.trim() == actual;
        if !ok {
            warn!(name, "backup checksum mismatch");
        }
        Ok(ok)
    }

    async fn list_backups(&self) -> Result<Vec<BackupInfo>, CoreError> {
        let (_, backup_dir) = self.backup_paths()?;
        let mut backups = Vec::new();

        let mut entries = match tokio::fs::read_dir(backup_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(backups),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let created_at = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            let checksum = tokio::fs::read_to_string(sidecar(&path))
                .await
                .map(|c| c.trim().to_owned())
                .unwrap_or_default();
            backups.push(BackupInfo {
                name: name.to_owned(),
                size_bytes: metadata.len(),
                created_at,
                checksum,
            });
        }

        backups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(backups)
    }

    async fn delete_backup(&self, name: &str) -> Result<(), CoreError> {
        let path = self.backup_file(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| CoreError::not_found("backup", format!("{name}: {e}")))?;
        let _ = tokio::fs::remove_file(sidecar(&path)).await;
        Ok(())
    }
}
