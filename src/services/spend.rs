use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    analytics::{CostSource, SessionProvider},
    db::{DateRange, UsageLedgerRepo},
    error::LedgerError,
    models::{Account, Lease, UsageEvent, UsageOrigin},
    observability::metrics,
};

/// Breakdown of a lease's current spend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendReport {
    pub lease_id: String,
    /// Live figure for today from the analytics source.
    pub today: Decimal,
    /// Ledger total from the budget start through yesterday.
    pub historical: Decimal,
    pub total: Decimal,
    pub budget_amount: Decimal,
    pub budget_currency: String,
}

impl SpendReport {
    pub fn is_over_budget(&self) -> bool {
        self.total > self.budget_amount
    }
}

/// Computes a lease's spend for budget checks.
///
/// Today's figure is read live because the ledger lags the analytics source;
/// earlier days come from the ledger. Any failure aborts the calculation so a
/// budget decision is never made on a partial number.
#[derive(Clone)]
pub struct SpendCalculator {
    ledger: Arc<dyn UsageLedgerRepo>,
    costs: Arc<dyn CostSource>,
    sessions: Arc<dyn SessionProvider>,
}

impl SpendCalculator {
    pub fn new(
        ledger: Arc<dyn UsageLedgerRepo>,
        costs: Arc<dyn CostSource>,
        sessions: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            ledger,
            costs,
            sessions,
        }
    }

    pub async fn calculate_spend(
        &self,
        account: &Account,
        lease: &Lease,
    ) -> Result<Decimal, LedgerError> {
        self.calculate_spend_at(account, lease, Utc::now()).await
    }

    pub async fn calculate_spend_at(
        &self,
        account: &Account,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        Ok(self.spend_report_at(account, lease, now).await?.total)
    }

    pub async fn spend_report_at(
        &self,
        account: &Account,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<SpendReport, LedgerError> {
        let result = self.build_report(account, lease, now.date_naive()).await;
        match &result {
            Ok(report) => metrics::record_spend_calculation(true, report.is_over_budget()),
            Err(e) => {
                tracing::error!(
                    lease_id = %lease.id,
                    account_id = %lease.account_id,
                    error = %e,
                    "Spend calculation failed"
                );
                metrics::record_spend_calculation(false, false);
            }
        }
        result
    }

    async fn build_report(
        &self,
        account: &Account,
        lease: &Lease,
        today: NaiveDate,
    ) -> Result<SpendReport, LedgerError> {
        let session = self.sessions.assume_role(&account.admin_role_arn).await?;

        let tomorrow = next_day(today)?;
        let today_amount = self
            .costs
            .total_spend(&session, DateRange::new(today, tomorrow)?)
            .await?;

        // Cache today's live figure so readers of the ledger see it before
        // ingestion settles the day.
        self.ledger
            .write_through(&UsageEvent {
                principal_id: lease.principal_id.clone(),
                lease_id: lease.id.clone(),
                account_id: lease.account_id.clone(),
                date: today,
                cost_amount: today_amount,
                cost_currency: lease.budget_currency.clone(),
                origin: UsageOrigin::Estimate,
            })
            .await?;

        let budget_start = lease.budget_start_date();
        let historical: Decimal = match today.checked_sub_days(Days::new(1)) {
            Some(budget_end) if budget_start <= budget_end => {
                tracing::debug!(
                    lease_id = %lease.id,
                    start = %budget_start,
                    end = %budget_end,
                    "Reading ledger usage for budget window"
                );
                self.ledger
                    .query_range(
                        &lease.principal_id,
                        &lease.account_id,
                        DateRange::new(budget_start, budget_end)?,
                    )
                    .await?
                    .iter()
                    .filter(|event| event.belongs_to(&lease.principal_id, &lease.account_id))
                    .map(|event| event.cost_amount)
                    .sum()
            }
            _ => Decimal::ZERO,
        };

        let report = SpendReport {
            lease_id: lease.id.clone(),
            today: today_amount,
            historical,
            total: today_amount + historical,
            budget_amount: lease.budget_amount,
            budget_currency: lease.budget_currency.clone(),
        };

        tracing::info!(
            principal_id = %lease.principal_id,
            account_id = %lease.account_id,
            "Lease has spent {} of its {} {} budget",
            report.total.round_dp(2),
            report.budget_amount.round_dp(2),
            report.budget_currency
        );

        Ok(report)
    }
}

fn next_day(date: NaiveDate) -> Result<NaiveDate, LedgerError> {
    date.checked_add_days(Days::new(1))
        .ok_or_else(|| LedgerError::Validation(format!("no day after {date}")))
}
