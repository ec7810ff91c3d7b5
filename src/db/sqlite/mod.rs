mod usage_ledger;

pub use usage_ledger::SqliteUsageLedgerRepo;
