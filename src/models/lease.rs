use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lease lifecycle states. Owned by the lease subsystem; only `Active` and
/// `Inactive` change how usage is read here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LeaseStatus {
    Active,
    Inactive,
    ResetLock,
    ResetFinanceLock,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "Active",
            LeaseStatus::Inactive => "Inactive",
            LeaseStatus::ResetLock => "ResetLock",
            LeaseStatus::ResetFinanceLock => "ResetFinanceLock",
        }
    }
}

/// A principal's time-boxed, budget-capped use of a cloud account.
///
/// Read-only to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub id: String,
    pub principal_id: String,
    pub account_id: String,
    pub status: LeaseStatus,
    pub created_on: DateTime<Utc>,
    pub status_modified_on: DateTime<Utc>,
    /// Last transition into `Active`; the budget window starts here.
    pub lease_status_modified_on: DateTime<Utc>,
    pub budget_amount: Decimal,
    pub budget_currency: String,
}

impl Lease {
    pub fn is_inactive(&self) -> bool {
        self.status == LeaseStatus::Inactive
    }

    pub fn created_date(&self) -> NaiveDate {
        self.created_on.date_naive()
    }

    pub fn budget_start_date(&self) -> NaiveDate {
        self.lease_status_modified_on.date_naive()
    }
}

/// Cloud account backing a lease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    /// Role assumed to read cost data from inside the account.
    pub admin_role_arn: String,
}
