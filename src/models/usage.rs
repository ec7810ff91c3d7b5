use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a raw usage row came from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsageOrigin {
    /// Reported by the analytics source during ingestion. The amount has been
    /// applied to the lease and principal aggregates.
    #[default]
    Ingested,
    /// Live figure cached by a spend calculation. Never applied to aggregates
    /// and replaced by the ingested figure once the day resolves.
    Estimate,
}

impl UsageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageOrigin::Ingested => "ingested",
            UsageOrigin::Estimate => "estimate",
        }
    }

    /// Parse the stored representation; unknown values are treated as
    /// estimates so they never count towards an aggregate delta.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "ingested" => UsageOrigin::Ingested,
            _ => UsageOrigin::Estimate,
        }
    }
}

/// Authoritative cost for one lease on one calendar day, as last reported.
///
/// Keyed by `(lease_id, date)`. A re-ingestion of the same day replaces the
/// row wholesale; the amount is never accumulated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEvent {
    pub principal_id: String,
    pub lease_id: String,
    pub account_id: String,
    pub date: NaiveDate,
    pub cost_amount: Decimal,
    pub cost_currency: String,
    #[serde(default)]
    pub origin: UsageOrigin,
}

impl UsageEvent {
    /// Amount this row has contributed to the aggregates.
    pub fn applied_amount(&self) -> Decimal {
        match self.origin {
            UsageOrigin::Ingested => self.cost_amount,
            UsageOrigin::Estimate => Decimal::ZERO,
        }
    }

    pub fn belongs_to(&self, principal_id: &str, account_id: &str) -> bool {
        self.principal_id == principal_id && self.account_id == account_id
    }
}

/// Running total of all ingested days for a single lease.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeaseUsageAggregate {
    pub lease_id: String,
    pub principal_id: String,
    pub cost_amount: Decimal,
    pub cost_currency: String,
    /// Date of the usage event that last touched this row
    pub last_usage_date: NaiveDate,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Running total of a principal's spend within one budget period, across
/// all of their leases.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrincipalBudgetAggregate {
    pub principal_id: String,
    pub period_start: NaiveDate,
    pub cost_amount: Decimal,
    pub cost_currency: String,
    pub last_usage_date: NaiveDate,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One day of cost reported by the analytics source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub amount: Decimal,
}
