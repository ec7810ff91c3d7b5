use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::DateRange;
use crate::{
    db::error::DbResult,
    models::{LeaseUsageAggregate, PrincipalBudgetAggregate, UsageEvent},
};

/// Tables holding ledger rows that expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTable {
    UsageEvents,
    LeaseAggregates,
    PrincipalAggregates,
}

impl LedgerTable {
    pub const ALL: [LedgerTable; 3] = [
        LedgerTable::UsageEvents,
        LedgerTable::LeaseAggregates,
        LedgerTable::PrincipalAggregates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerTable::UsageEvents => "usage_events",
            LedgerTable::LeaseAggregates => "lease_usage_aggregates",
            LedgerTable::PrincipalAggregates => "principal_budget_aggregates",
        }
    }
}

/// Raw per-day usage plus the per-lease and per-principal rollups derived
/// from it.
///
/// Rollups are maintained incrementally: each raw write applies the
/// difference between the new amount and the amount previously applied for
/// the same `(lease_id, date)`. Re-ingesting an unchanged figure is a no-op
/// and concurrent writers for the same principal commute.
#[async_trait]
pub trait UsageLedgerRepo: Send + Sync {
    /// Write an ingested event and apply its delta to both aggregates.
    ///
    /// The raw write and both aggregate increments commit together. Returns
    /// the row that was replaced, if any. A write that keeps losing the
    /// version race fails with [`DbError::Conflict`](crate::db::DbError::Conflict)
    /// after the configured number of attempts.
    async fn upsert_raw_event(&self, event: &UsageEvent) -> DbResult<Option<UsageEvent>>;

    /// Store a provisional figure for `(lease_id, date)` without touching
    /// any aggregate.
    ///
    /// Never replaces an ingested row for the same key.
    async fn write_through(&self, event: &UsageEvent) -> DbResult<()>;

    /// Raw events with `range.start <= date <= range.end` for the
    /// principal and account, ordered by date.
    async fn query_range(
        &self,
        principal_id: &str,
        account_id: &str,
        range: DateRange,
    ) -> DbResult<Vec<UsageEvent>>;

    async fn get_lease_aggregate(&self, lease_id: &str) -> DbResult<Option<LeaseUsageAggregate>>;

    async fn get_principal_aggregate(
        &self,
        principal_id: &str,
        period_start: NaiveDate,
    ) -> DbResult<Option<PrincipalBudgetAggregate>>;

    /// Count rows in `table` with `expires_at < cutoff`.
    async fn count_expired_before(&self, table: LedgerTable, cutoff: DateTime<Utc>)
    -> DbResult<u64>;

    /// Delete rows in `table` with `expires_at < cutoff` in batches.
    ///
    /// Stops after `max_deletes` rows. Returns the number of rows deleted.
    async fn delete_expired_before(
        &self,
        table: LedgerTable,
        cutoff: DateTime<Utc>,
        batch_size: u32,
        max_deletes: u64,
    ) -> DbResult<u64>;
}
