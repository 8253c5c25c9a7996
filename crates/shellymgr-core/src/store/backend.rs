// ── Backend classification & SQL dialect ──
//
// The DSN scheme decides everything backend-specific: pool sizing,
// connect-time pragmas, placeholder style, and the handful of type
// spellings that differ between engines.

use std::time::Duration;

use crate::error::CoreError;

/// The storage backend class, classified from the DSN scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Embedded single-file store. Single concurrent writer.
    Sqlite,
    Postgres,
    MySql,
}

impl Backend {
    pub fn from_dsn(dsn: &str) -> Result<Self, CoreError> {
        let scheme = dsn.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(CoreError::validation(
                "database.dsn",
                format!("unsupported backend scheme {other:?}"),
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    pub fn is_embedded(self) -> bool {
        matches!(self, Self::Sqlite)
    }

    // ── Pool class defaults ──────────────────────────────────────────

    /// Embedded: exactly one writer. Networked: 25 open / 5 idle.
    pub fn default_max_connections(self) -> u32 {
        if self.is_embedded() { 1 } else { 25 }
    }

    pub fn default_min_connections(self) -> u32 {
        if self.is_embedded() { 1 } else { 5 }
    }

    pub fn max_lifetime(self) -> Option<Duration> {
        if self.is_embedded() {
            None
        } else {
            Some(Duration::from_secs(3600))
        }
    }

    pub fn idle_timeout(self) -> Option<Duration> {
        if self.is_embedded() {
            None
        } else {
            Some(Duration::from_secs(600))
        }
    }

    /// Connect-time statements. SQLite gets its pragma block; the
    /// networked engines need nothing.
    pub fn connect_statements(self, test_mode: bool) -> Vec<&'static str> {
        match self {
            Self::Sqlite if test_mode => vec![
                "PRAGMA foreign_keys = ON",
                "PRAGMA journal_mode = MEMORY",
                "PRAGMA synchronous = OFF",
            ],
            Self::Sqlite => vec![
                "PRAGMA foreign_keys = ON",
                "PRAGMA journal_mode = WAL",
                "PRAGMA synchronous = NORMAL",
                "PRAGMA cache_size = -65536",
                "PRAGMA busy_timeout = 5000",
            ],
            Self::Postgres | Self::MySql => Vec::new(),
        }
    }

    // ── Dialect helpers ──────────────────────────────────────────────

    /// Rewrite `?` placeholders to `$1..$n` for Postgres; the other
    /// engines take `?` natively. Quoted strings are left alone.
    pub fn sql(self, query: &str) -> String {
        if self != Self::Postgres {
            return query.to_owned();
        }
        let mut out = String::with_capacity(query.len() + 8);
        let mut n = 0;
        let mut in_quotes = false;
        for c in query.chars() {
            match c {
                '\'' => {
                    in_quotes = !in_quotes;
                    out.push(c);
                }
                '?' if !in_quotes => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            }
        }
        out
    }

    /// Auto-increment integer primary key column definition.
    pub fn id_column(self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgres => "BIGSERIAL PRIMARY KEY",
            Self::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
        }
    }

    /// Boolean column type. Booleans persist as small integers on every
    /// engine: the Any driver has no portable boolean encoding.
    pub fn bool_type(self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER",
            Self::Postgres => "SMALLINT",
            Self::MySql => "TINYINT(1)",
        }
    }

    /// Unbounded text column type.
    pub fn text_type(self) -> &'static str {
        match self {
            Self::Sqlite | Self::Postgres => "TEXT",
            Self::MySql => "LONGTEXT",
        }
    }

    /// Query reporting the engine version.
    pub fn version_query(self) -> &'static str {
        match self {
            Self::Sqlite => "SELECT sqlite_version()",
            Self::Postgres | Self::MySql => "SELECT version()",
        }
    }

    /// Query reporting the database size in bytes, where the engine
    /// exposes one.
    pub fn size_query(self) -> &'static str {
        match self {
            Self::Sqlite => {
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()"
            }
            Self::Postgres => "SELECT pg_database_size(current_database())",
            Self::MySql => {
                "SELECT CAST(COALESCE(SUM(data_length + index_length), 0) AS SIGNED) \
                 FROM information_schema.tables WHERE table_schema = DATABASE()"
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dsn_schemes() {
        assert_eq!(Backend::from_dsn("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_dsn("postgres://u:p@h/db").unwrap(),
            Backend::Postgres
        );
        assert_eq!(Backend::from_dsn("mysql://u:p@h/db").unwrap(), Backend::MySql);
        assert!(Backend::from_dsn("mongodb://h/db").is_err());
    }

    #[test]
    fn postgres_placeholders_are_numbered() {
        let sql = Backend::Postgres.sql("SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
    }

    #[test]
    fn quoted_question_marks_survive() {
        let sql = Backend::Postgres.sql("SELECT '?' , x FROM t WHERE y = ?");
        assert_eq!(sql, "SELECT '?' , x FROM t WHERE y = $1");
    }

    #[test]
    fn non_postgres_sql_is_untouched() {
        let q = "SELECT * FROM t WHERE a = ?";
        assert_eq!(Backend::Sqlite.sql(q), q);
        assert_eq!(Backend::MySql.sql(q), q);
    }

    #[test]
    fn pool_classes() {
        assert_eq!(Backend::Sqlite.default_max_connections(), 1);
        assert_eq!(Backend::Postgres.default_max_connections(), 25);
        assert_eq!(Backend::Postgres.default_min_connections(), 5);
        assert!(Backend::Sqlite.max_lifetime().is_none());
    }
}
