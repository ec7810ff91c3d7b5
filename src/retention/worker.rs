//! Retention worker for purging expired ledger rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    config::RetentionConfig,
    db::{DbPool, DbResult, LedgerTable, UsageLedgerRepo},
    observability::metrics,
};

/// Results from a single retention run.
///
/// In dry-run mode the counts are rows that would have been deleted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionRunResult {
    /// Raw usage rows deleted.
    pub usage_events_deleted: u64,
    /// Lease aggregates deleted.
    pub lease_aggregates_deleted: u64,
    /// Principal budget aggregates deleted.
    pub principal_aggregates_deleted: u64,
}

impl RetentionRunResult {
    /// Total number of records deleted across all tables.
    pub fn total(&self) -> u64 {
        self.usage_events_deleted
            + self.lease_aggregates_deleted
            + self.principal_aggregates_deleted
    }

    /// Check if any records were deleted.
    pub fn has_deletions(&self) -> bool {
        self.total() > 0
    }

    fn set(&mut self, table: LedgerTable, count: u64) {
        match table {
            LedgerTable::UsageEvents => self.usage_events_deleted = count,
            LedgerTable::LeaseAggregates => self.lease_aggregates_deleted = count,
            LedgerTable::PrincipalAggregates => self.principal_aggregates_deleted = count,
        }
    }
}

/// Starts the retention worker as a background task.
///
/// The worker runs in a loop, purging expired rows at the configured interval.
/// It will run indefinitely until the task is cancelled.
pub async fn start_retention_worker(db: Arc<DbPool>, config: RetentionConfig) {
    if !config.enabled {
        tracing::info!("Retention worker disabled by configuration");
        return;
    }

    let dry_run_msg = if config.safety.dry_run {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        interval_hours = config.interval_hours,
        batch_size = config.safety.batch_size,
        max_deletes_per_run = config.safety.max_deletes_per_run,
        dry_run = config.safety.dry_run,
        "Starting retention worker{}",
        dry_run_msg
    );

    let interval = config.interval();
    let ledger = db.usage_ledger();

    loop {
        if let Err(e) = run_retention(ledger.as_ref(), &config, Utc::now()).await {
            tracing::error!(error = %e, "Error running retention");
        }

        tokio::time::sleep(interval).await;
    }
}

/// Run a single retention pass over every ledger table, deleting rows whose
/// `expires_at` is before `now`.
pub async fn run_retention(
    ledger: &dyn UsageLedgerRepo,
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> DbResult<RetentionRunResult> {
    let mut result = RetentionRunResult::default();

    for table in LedgerTable::ALL {
        let count = purge_table(ledger, config, table, now).await?;
        result.set(table, count);
    }

    if result.has_deletions() {
        tracing::info!(
            usage_events = result.usage_events_deleted,
            lease_aggregates = result.lease_aggregates_deleted,
            principal_aggregates = result.principal_aggregates_deleted,
            total = result.total(),
            dry_run = config.safety.dry_run,
            "Retention run complete{}",
            if config.safety.dry_run { " (DRY RUN)" } else { "" }
        );
    } else {
        tracing::debug!("Retention run complete, no records to delete");
    }

    Ok(result)
}

async fn purge_table(
    ledger: &dyn UsageLedgerRepo,
    config: &RetentionConfig,
    table: LedgerTable,
    cutoff: DateTime<Utc>,
) -> DbResult<u64> {
    if config.safety.dry_run {
        let count = ledger.count_expired_before(table, cutoff).await?;
        if count > 0 {
            tracing::info!(
                table = table.as_str(),
                count,
                cutoff = %cutoff,
                "DRY RUN: Would delete expired rows"
            );
        }
        return Ok(count);
    }

    let deleted = ledger
        .delete_expired_before(table, cutoff, config.safety.batch_size, config.max_deletes())
        .await?;

    if deleted > 0 {
        tracing::debug!(
            table = table.as_str(),
            deleted,
            cutoff = %cutoff,
            "Deleted expired rows"
        );
        metrics::record_retention_deletion(table.as_str(), deleted);
    }

    Ok(deleted)
}
