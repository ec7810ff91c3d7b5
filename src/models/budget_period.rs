use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Recurring window over which a principal's cumulative spend is tracked.
///
/// Accepts both the snake_case names used in TOML (`"weekly"`) and the
/// upper-case names used by older deployments (`"WEEKLY"`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    /// Periods start on Sunday at 00:00 UTC.
    #[default]
    #[serde(alias = "WEEKLY", alias = "Weekly")]
    Weekly,
    /// Periods start on the first day of the month at 00:00 UTC.
    #[serde(alias = "MONTHLY", alias = "Monthly")]
    Monthly,
}

impl BudgetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetPeriod::Weekly => "weekly",
            BudgetPeriod::Monthly => "monthly",
        }
    }

    /// Returns the first day of the period containing `date`.
    ///
    /// The mapping is monotonic (`a <= b` implies
    /// `period_start(a) <= period_start(b)`) and idempotent
    /// (`period_start(period_start(d)) == period_start(d)`).
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            BudgetPeriod::Weekly => {
                let back = date.weekday().num_days_from_sunday() as u64;
                date.checked_sub_days(Days::new(back))
                    .unwrap_or(NaiveDate::MIN)
            }
            // day0() is never larger than the current day of month, so this
            // cannot leave the month
            BudgetPeriod::Monthly => date
                .checked_sub_days(Days::new(date.day0() as u64))
                .unwrap_or(date),
        }
    }

    /// Same as [`period_start`](Self::period_start) for a timestamp, returning
    /// the boundary at UTC midnight.
    pub fn period_start_at(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        start_of_day(self.period_start(at.date_naive()))
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weekly" => Ok(BudgetPeriod::Weekly),
            "monthly" => Ok(BudgetPeriod::Monthly),
            other => Err(format!("unknown budget period '{other}'")),
        }
    }
}

/// UTC midnight at the start of `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
