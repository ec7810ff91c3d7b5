use chrono::NaiveDate;
use thiserror::Error;

/// Storage failures surfaced by the ledger repositories.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    /// The version guard on a raw usage row no longer matched; another writer
    /// committed between the read and the write.
    #[error("usage row ({lease_id}, {date}) changed during write")]
    StaleVersion { lease_id: String, date: NaiveDate },

    /// Every attempt at a raw usage write lost to a concurrent writer.
    #[error("usage row ({lease_id}, {date}) still contended after {attempts} write attempts")]
    Conflict {
        lease_id: String,
        date: NaiveDate,
        attempts: u32,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;
