mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod records;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::{DatabaseConfig, LedgerSettings};

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for writes.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Ledger database pool supporting both SQLite and PostgreSQL.
///
/// The repository is created once at construction time and shared.
pub struct DbPool {
    inner: PoolStorage,
    usage_ledger: Arc<dyn UsageLedgerRepo>,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool, settings: LedgerSettings) -> Self {
        DbPool {
            usage_ledger: Arc::new(sqlite::SqliteUsageLedgerRepo::new(pool.clone(), settings)),
            inner: PoolStorage::Sqlite(pool),
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(
        write_pool: sqlx::PgPool,
        read_pool: Option<sqlx::PgPool>,
        settings: LedgerSettings,
    ) -> Self {
        DbPool {
            usage_ledger: Arc::new(postgres::PostgresUsageLedgerRepo::new(
                write_pool.clone(),
                read_pool.clone(),
                settings,
            )),
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
        }
    }

    /// Create a database pool from configuration
    #[cfg_attr(
        not(any(feature = "database-sqlite", feature = "database-postgres")),
        allow(unused_variables)
    )]
    pub async fn from_config(config: &DatabaseConfig, settings: &LedgerSettings) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                tracing::info!(path = %cfg.path, "Connected to SQLite ledger");
                let db = Self::from_sqlite(pool, settings.clone());
                if cfg.run_migrations {
                    db.run_migrations().await?;
                }
                Ok(db)
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let connect_timeout = std::time::Duration::from_secs(cfg.connect_timeout_secs);
                let write_pool = sqlx::postgres::PgPoolOptions::new()
                    .min_connections(cfg.min_connections)
                    .max_connections(cfg.max_connections)
                    .acquire_timeout(connect_timeout)
                    .connect(&cfg.url)
                    .await?;

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    Some(
                        sqlx::postgres::PgPoolOptions::new()
                            .min_connections(cfg.min_connections)
                            .max_connections(cfg.max_connections)
                            .acquire_timeout(connect_timeout)
                            .connect(read_url)
                            .await?,
                    )
                } else {
                    None
                };

                tracing::info!("Connected to PostgreSQL ledger");
                let db = Self::from_postgres(write_pool, read_pool, settings.clone());
                if cfg.run_migrations {
                    db.run_migrations().await?;
                }
                Ok(db)
            }
        }
    }

    /// Run database migrations using sqlx's migration runner
    /// This automatically creates and manages a _sqlx_migrations table
    /// Migrations always run on the primary (write) pool.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(&pools.write)
                    .await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Get the usage ledger repository
    pub fn usage_ledger(&self) -> Arc<dyn UsageLedgerRepo> {
        Arc::clone(&self.usage_ledger)
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                // Check both write and read pools
                sqlx::query("SELECT 1").execute(&pools.write).await?;
                if let Some(read) = &pools.read {
                    sqlx::query("SELECT 1").execute(read).await?;
                }
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}
