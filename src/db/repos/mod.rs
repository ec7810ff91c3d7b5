mod usage_ledger;

use chrono::NaiveDate;
pub use usage_ledger::*;

use super::{DbError, DbResult};

/// Date range for queries.
///
/// Whether `end` is inclusive depends on the consumer: ledger range reads
/// include it, analytics queries treat it as exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> DbResult<Self> {
        if start > end {
            return Err(DbError::Validation(format!(
                "date range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A range covering a single day.
    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// True when the range covers nothing under half-open semantics.
    pub fn is_empty_half_open(&self) -> bool {
        self.start >= self.end
    }
}
