//! Cost analytics source and delegated sessions.
//!
//! Cost data for a cloud account can only be read from inside that account's
//! trust boundary, so every query runs through a [`DelegatedSession`]
//! obtained for the account's admin role. Figures for today and the last
//! day or so may be incomplete; callers re-query until they settle.

mod http;
mod retry;
mod session;

use async_trait::async_trait;
pub use http::HttpCostSource;
use rust_decimal::Decimal;
use serde::Serialize;
pub use session::{DelegatedSession, SessionProvider, StaticSessionProvider};

use crate::{db::DateRange, models::DailyCost};

/// What a daily cost query is filtered to.
///
/// Serialized as `{"type": "account", "id": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CostScope {
    Account(String),
}

/// Source of per-day and total cost figures.
///
/// All ranges are half-open: `range.end` is excluded.
#[async_trait]
pub trait CostSource: Send + Sync {
    /// Cost per day within `range` for `scope`, one entry per day reported.
    async fn daily_costs(
        &self,
        session: &DelegatedSession,
        scope: &CostScope,
        range: DateRange,
    ) -> Result<Vec<DailyCost>, AnalyticsError>;

    /// Total cost within `range` for the account the session belongs to.
    async fn total_spend(
        &self,
        session: &DelegatedSession,
        range: DateRange,
    ) -> Result<Decimal, AnalyticsError>;
}

/// Analytics source and session errors.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Analytics request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Analytics API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid analytics response: {0}")]
    InvalidResponse(String),

    #[error("Failed to acquire delegated session for role {role}: {message}")]
    Session { role: String, message: String },

    #[error("Analytics source not configured: {0}")]
    NotConfigured(String),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
