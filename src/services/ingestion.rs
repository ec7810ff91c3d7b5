use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};

use super::AccountLookup;
use crate::{
    analytics::{CostScope, CostSource, SessionProvider},
    config::IngestionConfig,
    db::{DateRange, UsageLedgerRepo},
    error::LedgerError,
    models::{Lease, UsageEvent, UsageOrigin},
    observability::metrics,
};

/// Days to read for a lease as of `today`, as a half-open range.
///
/// The window covers the last `lookback_days` days, ends at the day the lease
/// went inactive if it has, and never starts before the lease was created.
/// A window clipped to nothing comes back empty rather than inverted.
pub fn ingestion_window(
    lease: &Lease,
    today: NaiveDate,
    config: &IngestionConfig,
) -> Result<DateRange, LedgerError> {
    let mut end = today;
    let mut start = end
        .checked_sub_days(Days::new(config.lookback_days as u64))
        .unwrap_or(NaiveDate::MIN);

    if lease.is_inactive() {
        end = lease.status_modified_on.date_naive();
    }

    let created = lease.created_date();
    if created > start {
        start = created;
    }

    if start > end {
        start = end;
    }

    Ok(DateRange::new(start, end)?)
}

/// Pulls settled daily costs for a lease into the ledger.
///
/// Each call is a self-contained unit of work and can be repeated freely:
/// re-ingesting a day only applies the difference from what was last seen.
#[derive(Clone)]
pub struct UsageIngestionService {
    ledger: Arc<dyn UsageLedgerRepo>,
    costs: Arc<dyn CostSource>,
    sessions: Arc<dyn SessionProvider>,
    accounts: Arc<dyn AccountLookup>,
    config: IngestionConfig,
}

impl UsageIngestionService {
    pub fn new(
        ledger: Arc<dyn UsageLedgerRepo>,
        costs: Arc<dyn CostSource>,
        sessions: Arc<dyn SessionProvider>,
        accounts: Arc<dyn AccountLookup>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            ledger,
            costs,
            sessions,
            accounts,
            config,
        }
    }

    pub async fn ingest(&self, lease: Lease) -> Result<Lease, LedgerError> {
        self.ingest_on(lease, Utc::now().date_naive()).await
    }

    /// Ingest the lease's window as of `today`. The lease is passed through
    /// unchanged so the call can sit inside a workflow step.
    pub async fn ingest_on(&self, lease: Lease, today: NaiveDate) -> Result<Lease, LedgerError> {
        let account = match self.accounts.get_account(&lease.account_id).await {
            Ok(account) => account,
            Err(LedgerError::NotFound(_)) => {
                tracing::warn!(
                    lease_id = %lease.id,
                    account_id = %lease.account_id,
                    "Account not found, skipping usage ingestion"
                );
                metrics::record_ingestion("skipped", 0);
                return Ok(lease);
            }
            Err(e) => {
                tracing::warn!(
                    lease_id = %lease.id,
                    account_id = %lease.account_id,
                    error = %e,
                    "Account lookup failed, skipping usage ingestion"
                );
                metrics::record_ingestion("skipped", 0);
                return Ok(lease);
            }
        };

        let window = ingestion_window(&lease, today, &self.config)?;
        if window.is_empty_half_open() {
            tracing::debug!(
                lease_id = %lease.id,
                start = %window.start,
                end = %window.end,
                "Ingestion window is empty"
            );
            metrics::record_ingestion("empty", 0);
            return Ok(lease);
        }

        match self.ingest_window(&lease, &account.admin_role_arn, window).await {
            Ok(written) => {
                tracing::info!(
                    lease_id = %lease.id,
                    principal_id = %lease.principal_id,
                    account_id = %lease.account_id,
                    start = %window.start,
                    end = %window.end,
                    days = written,
                    "Ingested lease usage"
                );
                metrics::record_ingestion("success", written);
                Ok(lease)
            }
            Err(e) => {
                tracing::error!(
                    lease_id = %lease.id,
                    account_id = %lease.account_id,
                    error = %e,
                    "Usage ingestion failed"
                );
                metrics::record_ingestion("error", 0);
                Err(e)
            }
        }
    }

    async fn ingest_window(
        &self,
        lease: &Lease,
        role: &str,
        window: DateRange,
    ) -> Result<usize, LedgerError> {
        let session = self.sessions.assume_role(role).await?;
        let scope = CostScope::Account(lease.account_id.clone());
        let costs = self.costs.daily_costs(&session, &scope, window).await?;

        let mut written = 0;
        for cost in costs {
            let event = UsageEvent {
                principal_id: lease.principal_id.clone(),
                lease_id: lease.id.clone(),
                account_id: lease.account_id.clone(),
                date: cost.date,
                cost_amount: cost.amount,
                cost_currency: lease.budget_currency.clone(),
                origin: UsageOrigin::Ingested,
            };

            let previous = self.ledger.upsert_raw_event(&event).await?;
            let delta = event.cost_amount
                - previous
                    .as_ref()
                    .map(UsageEvent::applied_amount)
                    .unwrap_or_default();
            tracing::debug!(
                lease_id = %event.lease_id,
                date = %event.date,
                amount = %event.cost_amount,
                delta = %delta,
                "Recorded daily usage"
            );
            written += 1;
        }

        Ok(written)
    }

    /// Whether the orchestrator should schedule another ingestion pass.
    ///
    /// Live leases always continue. Once a lease goes inactive its final days
    /// keep settling, so ingestion continues for `continuation_hours` after
    /// the status change.
    pub fn should_continue(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        !lease.is_inactive() || now - lease.status_modified_on < self.config.continuation()
    }
}
