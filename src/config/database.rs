use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Where the ledger keeps raw usage rows and running totals.
///
/// ```toml
/// [database]
/// type = "sqlite"
/// path = "ledger.db"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum DatabaseConfig {
    /// Not configured. Rejected by [`super::LedgerConfig::validate`].
    #[default]
    None,

    /// Single file on local disk. Writers from one process queue on the
    /// file's write lock.
    #[cfg(feature = "database-sqlite")]
    Sqlite(SqliteConfig),

    /// Shared database for ingestion workers spread over several hosts.
    #[cfg(feature = "database-postgres")]
    Postgres(PostgresConfig),
}

impl DatabaseConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, DatabaseConfig::None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            DatabaseConfig::None => Ok(()),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(c) => c.validate(),
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(c) => c.validate(),
        }
    }
}

/// File-backed SQLite ledger.
///
/// Every usage write takes the database write lock before reading the row it
/// replaces, so at most one write is in flight and the rest wait up to
/// `busy_timeout_ms` for their turn.
#[cfg(feature = "database-sqlite")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    /// Ledger file. `:memory:` keeps everything in the connection and only
    /// works with `max_connections = 1`.
    pub path: String,

    /// Create the ledger file on first start.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// Apply pending ledger migrations when connecting.
    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Write-ahead logging. Range reads for spend reports then proceed while
    /// an ingestion write holds the lock.
    /// Default: true
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// How long a write waits for another connection to release the write
    /// lock before it counts as a lost race and is retried.
    /// Default: 5000
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Pool size. Extra connections serve concurrent reads; writes still
    /// run one at a time.
    /// Default: 5
    #[serde(default = "default_sqlite_max_connections")]
    pub max_connections: u32,
}

#[cfg(feature = "database-sqlite")]
impl SqliteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "database.path must name the ledger file".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".into(),
            ));
        }
        // Each in-memory connection would see its own empty ledger
        if self.path == ":memory:" && self.max_connections > 1 {
            return Err(ConfigError::Validation(
                "database.path = \":memory:\" requires max_connections = 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "database-sqlite")]
fn default_busy_timeout() -> u64 {
    5000
}

#[cfg(feature = "database-sqlite")]
fn default_sqlite_max_connections() -> u32 {
    5
}

/// PostgreSQL ledger.
///
/// Writers never block each other on different rows. Two writers racing on
/// the same `(lease_id, date)` row are resolved by the version guard and a
/// retry.
#[cfg(feature = "database-postgres")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresConfig {
    /// Primary database, e.g. `postgres://ledger:secret@db:5432/ledger`.
    pub url: String,

    /// Optional read replica used for historical range queries.
    /// Raw-event writes and aggregate increments always go to the primary.
    #[serde(default)]
    pub read_url: Option<String>,

    /// Connections each pool keeps open while idle.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Upper bound per pool, and so on concurrent ledger writes.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection before failing the call.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Apply pending ledger migrations to the primary when connecting.
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[cfg(feature = "database-postgres")]
impl PostgresConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation(
                "database.url must name the primary ledger database".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::Validation(
                "database.min_connections cannot exceed max_connections".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
fn default_true() -> bool {
    true
}

#[cfg(feature = "database-postgres")]
fn default_min_connections() -> u32 {
    1
}

#[cfg(feature = "database-postgres")]
fn default_max_connections() -> u32 {
    10
}

#[cfg(feature = "database-postgres")]
fn default_connect_timeout() -> u64 {
    10
}
