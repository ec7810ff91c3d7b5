//! Storage representations of ledger rows.
//!
//! Amounts are stored as integer microcents (1/1,000,000 of a currency unit)
//! so aggregate increments stay exact and commutative. Every raw row carries
//! a `schema_version` and a `version` token used for optimistic concurrency.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};

use super::{DbError, DbResult};
use crate::{
    config::LedgerSettings,
    models::{LeaseUsageAggregate, PrincipalBudgetAggregate, UsageEvent, UsageOrigin},
};

/// Layout version written with every raw usage row.
pub const SCHEMA_VERSION: i32 = 1;

const MICROCENTS_PER_UNIT: i64 = 1_000_000;

/// Convert a currency amount to microcents, rounding beyond six decimals.
pub fn to_microcents(amount: Decimal) -> DbResult<i64> {
    amount
        .checked_mul(Decimal::from(MICROCENTS_PER_UNIT))
        .map(|v| v.round())
        .and_then(|v| v.to_i64())
        .ok_or_else(|| DbError::Validation(format!("cost amount {amount} is out of range")))
}

pub fn from_microcents(microcents: i64) -> Decimal {
    Decimal::new(microcents, 6).normalize()
}

/// A raw usage row as read back from storage.
#[derive(Debug, Clone)]
pub struct UsageEventRecord {
    pub principal_id: String,
    pub lease_id: String,
    pub account_id: String,
    pub usage_date: NaiveDate,
    pub cost_microcents: i64,
    pub cost_currency: String,
    pub origin: String,
    pub version: i64,
    pub schema_version: i32,
}

impl UsageEventRecord {
    pub fn origin(&self) -> UsageOrigin {
        UsageOrigin::from_stored(&self.origin)
    }

    /// Microcents this row has contributed to the aggregates.
    pub fn applied_microcents(&self) -> i64 {
        match self.origin() {
            UsageOrigin::Ingested => self.cost_microcents,
            UsageOrigin::Estimate => 0,
        }
    }

    pub fn into_event(self) -> DbResult<UsageEvent> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(DbError::Internal(format!(
                "usage row ({}, {}) has schema version {}, newest understood is {}",
                self.lease_id, self.usage_date, self.schema_version, SCHEMA_VERSION
            )));
        }
        let origin = self.origin();
        Ok(UsageEvent {
            principal_id: self.principal_id,
            lease_id: self.lease_id,
            account_id: self.account_id,
            date: self.usage_date,
            cost_amount: from_microcents(self.cost_microcents),
            cost_currency: self.cost_currency,
            origin,
        })
    }
}

/// Validated write of one usage event, with every derived value resolved.
#[derive(Debug, Clone)]
pub struct PreparedUsageWrite<'a> {
    pub event: &'a UsageEvent,
    pub cost_microcents: i64,
    pub period_start: NaiveDate,
    pub raw_expires_at: DateTime<Utc>,
    pub aggregate_expires_at: DateTime<Utc>,
}

impl<'a> PreparedUsageWrite<'a> {
    pub fn new(event: &'a UsageEvent, settings: &LedgerSettings) -> DbResult<Self> {
        if event.lease_id.is_empty() {
            return Err(DbError::Validation("usage event has no lease id".into()));
        }
        if event.principal_id.is_empty() {
            return Err(DbError::Validation(format!(
                "usage event for lease {} has no principal id",
                event.lease_id
            )));
        }
        if event.cost_currency.trim().is_empty() {
            return Err(DbError::Validation(format!(
                "usage event for lease {} on {} has no currency",
                event.lease_id, event.date
            )));
        }

        Ok(Self {
            event,
            cost_microcents: to_microcents(event.cost_amount)?,
            period_start: settings.budget_period.period_start(event.date),
            raw_expires_at: settings.raw_expiry(event.date),
            aggregate_expires_at: settings.aggregate_expiry(event.date),
        })
    }

    /// Amount to add to the aggregates given the row being replaced.
    pub fn delta_microcents(&self, previous: Option<&UsageEventRecord>) -> i64 {
        self.cost_microcents - previous.map_or(0, UsageEventRecord::applied_microcents)
    }
}

/// Aggregate row as read back from storage. Lease aggregates leave
/// `period_start` unset.
#[derive(Debug, Clone)]
pub struct AggregateRecord {
    pub key: String,
    pub principal_id: String,
    pub period_start: Option<NaiveDate>,
    pub cost_microcents: i64,
    pub cost_currency: String,
    pub last_usage_date: NaiveDate,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRecord {
    pub fn into_lease_aggregate(self) -> LeaseUsageAggregate {
        LeaseUsageAggregate {
            lease_id: self.key,
            principal_id: self.principal_id,
            cost_amount: from_microcents(self.cost_microcents),
            cost_currency: self.cost_currency,
            last_usage_date: self.last_usage_date,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn into_principal_aggregate(self) -> DbResult<PrincipalBudgetAggregate> {
        let period_start = self.period_start.ok_or_else(|| {
            DbError::Internal(format!(
                "principal aggregate for {} has no period start",
                self.principal_id
            ))
        })?;
        Ok(PrincipalBudgetAggregate {
            principal_id: self.principal_id,
            period_start,
            cost_amount: from_microcents(self.cost_microcents),
            cost_currency: self.cost_currency,
            last_usage_date: self.last_usage_date,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
