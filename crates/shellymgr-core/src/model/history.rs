// ── Export/import audit entities ──
//
// Every export and import run leaves a history row. Rows carry the
// serialised request and outcome metadata only -- artifacts themselves
// are the durable record of what was exported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    /// UUIDv4, matches the `export_id` returned to the caller.
    pub id: String,
    pub plugin: String,
    pub format: String,
    pub requested_by: Option<String>,
    pub success: bool,
    pub record_count: u64,
    pub file_size: Option<u64>,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Serialised export request (options redacted of secrets).
    pub request: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: String,
    pub plugin: String,
    pub format: String,
    pub requested_by: Option<String>,
    pub success: bool,
    pub records_imported: u64,
    pub records_skipped: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub request: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
