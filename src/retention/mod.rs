//! Purging of expired ledger rows.
//!
//! Every raw usage row and aggregate carries an `expires_at` timestamp.
//! SQL backends do not expire rows on their own, so a background worker
//! periodically deletes rows past their expiry, in batches, with an optional
//! dry-run mode that only counts them.
//!
//! Correctness never depends on prompt purging: readers do not filter on
//! `expires_at`.

mod worker;

pub use worker::{RetentionRunResult, run_retention, start_retention_worker};
