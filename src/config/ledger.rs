//! Ledger and ingestion settings.
//!
//! ```toml
//! [ledger]
//! budget_period = "weekly"
//! raw_retention_days = 30
//! aggregate_retention_months = 1
//! max_write_attempts = 5
//! write_retry_delay_ms = 20
//! write_retry_max_delay_ms = 500
//!
//! [ingestion]
//! lookback_days = 2
//! continuation_hours = 30
//! ```

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{ConfigError, RetryConfig};
use crate::models::{BudgetPeriod, start_of_day};

/// Settings shared by every ledger backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerSettings {
    /// Period used to bucket principal aggregates.
    #[serde(default)]
    pub budget_period: BudgetPeriod,

    /// Days a raw usage row is kept after its usage date.
    /// Default: 30
    #[serde(default = "default_raw_retention_days")]
    pub raw_retention_days: u32,

    /// Months an aggregate is kept after the start of the budget period of
    /// the last usage that touched it.
    /// Default: 1
    #[serde(default = "default_aggregate_retention_months")]
    pub aggregate_retention_months: u32,

    /// Attempts at the version-guarded raw write before giving up with a
    /// conflict error.
    /// Default: 5
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    /// Base pause before retrying a write that lost a race. Doubles on each
    /// retry, with jitter so contending writers spread out.
    /// Default: 20
    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,

    /// Upper bound on the pause between write retries.
    /// Default: 500
    #[serde(default = "default_write_retry_max_delay_ms")]
    pub write_retry_max_delay_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            budget_period: BudgetPeriod::default(),
            raw_retention_days: default_raw_retention_days(),
            aggregate_retention_months: default_aggregate_retention_months(),
            max_write_attempts: default_max_write_attempts(),
            write_retry_delay_ms: default_write_retry_delay_ms(),
            write_retry_max_delay_ms: default_write_retry_max_delay_ms(),
        }
    }
}

fn default_raw_retention_days() -> u32 {
    30
}

fn default_aggregate_retention_months() -> u32 {
    1
}

fn default_max_write_attempts() -> u32 {
    5
}

fn default_write_retry_delay_ms() -> u64 {
    20
}

fn default_write_retry_max_delay_ms() -> u64 {
    500
}

impl LedgerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.raw_retention_days == 0 {
            return Err(ConfigError::Validation(
                "ledger.raw_retention_days must be at least 1".into(),
            ));
        }
        if self.aggregate_retention_months == 0 {
            return Err(ConfigError::Validation(
                "ledger.aggregate_retention_months must be at least 1".into(),
            ));
        }
        if self.max_write_attempts == 0 {
            return Err(ConfigError::Validation(
                "ledger.max_write_attempts must be at least 1".into(),
            ));
        }
        if self.write_retry_max_delay_ms < self.write_retry_delay_ms {
            return Err(ConfigError::Validation(
                "ledger.write_retry_max_delay_ms must not be below write_retry_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Pause before retry number `retry` (0-indexed) of a contended write.
    pub fn write_retry_delay(&self, retry: u32) -> std::time::Duration {
        RetryConfig {
            initial_delay_ms: self.write_retry_delay_ms,
            max_delay_ms: self.write_retry_max_delay_ms,
            jitter: 0.5,
            retryable_status_codes: Vec::new(),
            ..RetryConfig::default()
        }
        .delay_for_attempt(retry)
    }

    /// Expiry of a raw usage row for `date`.
    pub fn raw_expiry(&self, date: NaiveDate) -> DateTime<Utc> {
        let expires = date
            .checked_add_days(Days::new(self.raw_retention_days as u64))
            .unwrap_or(NaiveDate::MAX);
        start_of_day(expires)
    }

    /// Expiry of the lease and principal aggregates touched by usage on `date`.
    pub fn aggregate_expiry(&self, date: NaiveDate) -> DateTime<Utc> {
        let expires = self
            .budget_period
            .period_start(date)
            .checked_add_months(Months::new(self.aggregate_retention_months))
            .unwrap_or(NaiveDate::MAX);
        start_of_day(expires)
    }
}

/// Usage ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionConfig {
    /// Days before today included in each ingestion window.
    /// Default: 2
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Hours after a lease goes inactive during which ingestion keeps
    /// re-reading its final days. The analytics source takes up to 24 hours
    /// to settle a day's figures.
    /// Default: 30
    #[serde(default = "default_continuation_hours")]
    pub continuation_hours: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            continuation_hours: default_continuation_hours(),
        }
    }
}

fn default_lookback_days() -> u32 {
    2
}

fn default_continuation_hours() -> u32 {
    30
}

impl IngestionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback_days == 0 {
            return Err(ConfigError::Validation(
                "ingestion.lookback_days must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn continuation(&self) -> chrono::Duration {
        chrono::Duration::hours(self.continuation_hours as i64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_raw_expiry_is_date_plus_window() {
        let settings = LedgerSettings::default();
        assert_eq!(
            settings.raw_expiry(d(2024, 3, 6)),
            Utc.with_ymd_and_hms(2024, 4, 5, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_aggregate_expiry_anchors_on_period_start() {
        let weekly = LedgerSettings::default();
        // Week of 2024-03-06 starts 2024-03-03
        assert_eq!(
            weekly.aggregate_expiry(d(2024, 3, 6)),
            Utc.with_ymd_and_hms(2024, 4, 3, 0, 0, 0).unwrap()
        );

        let monthly = LedgerSettings {
            budget_period: BudgetPeriod::Monthly,
            aggregate_retention_months: 2,
            ..Default::default()
        };
        assert_eq!(
            monthly.aggregate_expiry(d(2024, 1, 31)),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_zero_windows_rejected() {
        let settings = LedgerSettings {
            raw_retention_days: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = LedgerSettings {
            max_write_attempts: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = LedgerSettings {
            write_retry_delay_ms: 100,
            write_retry_max_delay_ms: 50,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let ingestion = IngestionConfig {
            lookback_days: 0,
            ..Default::default()
        };
        assert!(ingestion.validate().is_err());
    }

    #[test]
    fn test_write_retry_delay_grows_and_caps() {
        let settings = LedgerSettings::default();

        // 20ms base with +/-50% jitter
        let first = settings.write_retry_delay(0);
        assert!(first >= std::time::Duration::from_millis(10));
        assert!(first <= std::time::Duration::from_millis(30));

        // 20 * 2^3 = 160ms before jitter
        let fourth = settings.write_retry_delay(3);
        assert!(fourth >= std::time::Duration::from_millis(80));

        // Capped at 500ms, jitter can add at most half again
        let late = settings.write_retry_delay(20);
        assert!(late <= std::time::Duration::from_millis(750));

        let never_wait = LedgerSettings {
            write_retry_delay_ms: 0,
            write_retry_max_delay_ms: 0,
            ..Default::default()
        };
        assert_eq!(never_wait.write_retry_delay(4), std::time::Duration::ZERO);
    }
}
