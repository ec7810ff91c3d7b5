//! Usage ledger and spend reconciliation for budget-capped cloud account
//! leases.
//!
//! Daily costs for each lease are pulled from a slow cost analytics source
//! into a ledger that keeps raw per-day rows alongside running totals per
//! lease and per principal budget period. Re-reading a day only applies the
//! difference from what was last seen, so ingestion can be repeated until the
//! source settles. Budget checks combine a live figure for today with the
//! ledger's history.

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod observability;
pub mod retention;
pub mod services;

pub use error::{LedgerError, LedgerResult};
