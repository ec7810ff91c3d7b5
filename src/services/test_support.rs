//! Fakes shared by the service tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::{
    analytics::{AnalyticsError, AnalyticsResult, CostScope, CostSource, DelegatedSession},
    db::DateRange,
    models::{Account, DailyCost, Lease, LeaseStatus},
};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn at(y: i32, m: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, day, hour, 0, 0).unwrap()
}

pub fn account() -> Account {
    Account {
        id: "123456789012".into(),
        admin_role_arn: "arn:aws:iam::123456789012:role/Admin".into(),
    }
}

pub fn lease(created_on: DateTime<Utc>) -> Lease {
    Lease {
        id: "lease-1".into(),
        principal_id: "alice".into(),
        account_id: "123456789012".into(),
        status: LeaseStatus::Active,
        created_on,
        status_modified_on: created_on,
        lease_status_modified_on: created_on,
        budget_amount: Decimal::from(100),
        budget_currency: "USD".into(),
    }
}

#[cfg(feature = "database-sqlite")]
pub async fn sqlite_ledger() -> Arc<crate::db::DbPool> {
    use crate::{
        config::LedgerSettings,
        db::{
            DbPool,
            tests::harness::{create_sqlite_pool, run_sqlite_migrations},
        },
    };

    let pool = create_sqlite_pool().await;
    run_sqlite_migrations(&pool).await;
    Arc::new(DbPool::from_sqlite(pool, LedgerSettings::default()))
}

/// Cost source returning canned figures and recording what was asked.
#[derive(Default)]
pub struct FakeCostSource {
    pub daily: Vec<DailyCost>,
    pub today_total: Decimal,
    pub fail: bool,
    pub daily_calls: Mutex<Vec<(CostScope, DateRange)>>,
    pub total_calls: Mutex<Vec<DateRange>>,
}

impl FakeCostSource {
    pub fn with_daily(daily: Vec<DailyCost>) -> Self {
        Self {
            daily,
            ..Default::default()
        }
    }

    pub fn with_total(today_total: Decimal) -> Self {
        Self {
            today_total,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn check(&self) -> AnalyticsResult<()> {
        if self.fail {
            return Err(AnalyticsError::Api {
                status: 500,
                message: "cost source unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CostSource for FakeCostSource {
    async fn daily_costs(
        &self,
        _session: &DelegatedSession,
        scope: &CostScope,
        range: DateRange,
    ) -> AnalyticsResult<Vec<DailyCost>> {
        self.daily_calls
            .lock()
            .unwrap()
            .push((scope.clone(), range));
        self.check()?;
        Ok(self
            .daily
            .iter()
            .filter(|cost| cost.date >= range.start && cost.date < range.end)
            .cloned()
            .collect())
    }

    async fn total_spend(
        &self,
        _session: &DelegatedSession,
        range: DateRange,
    ) -> AnalyticsResult<Decimal> {
        self.total_calls.lock().unwrap().push(range);
        self.check()?;
        Ok(self.today_total)
    }
}
