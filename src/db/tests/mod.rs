//! Shared ledger repository test infrastructure
//!
//! The same test logic runs against both SQLite and PostgreSQL:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL)**: Slower tests using testcontainers, run with `cargo test -- --ignored`
//!
//! Shared test functions take `&dyn UsageLedgerRepo`; each backend module
//! instantiates them with a macro.
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```

mod usage_ledger;
