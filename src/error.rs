use thiserror::Error;

use crate::{analytics::AnalyticsError, db::DbError};

/// Errors surfaced by the ingestion and spend services.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream analytics failure: {0}")]
    Upstream(#[from] AnalyticsError),

    #[error("Storage failure: {0}")]
    Storage(DbError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Validation(msg) => LedgerError::Validation(msg),
            other => LedgerError::Storage(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
