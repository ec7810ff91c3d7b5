//! Per-lease units of work over the usage ledger.

mod accounts;
mod ingestion;
mod spend;
#[cfg(test)]
mod test_support;

pub use accounts::{AccountLookup, StaticAccountLookup};
pub use ingestion::{UsageIngestionService, ingestion_window};
pub use spend::{SpendCalculator, SpendReport};
