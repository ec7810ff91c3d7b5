//! Shared tests for UsageLedgerRepo implementations
//!
//! Tests are written as async functions that take the repo under test; the
//! backend modules at the bottom instantiate them.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::{Decimal, dec};

use crate::{
    db::{
        DbError,
        repos::{DateRange, LedgerTable, UsageLedgerRepo},
    },
    models::{BudgetPeriod, UsageEvent, UsageOrigin},
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn event(lease_id: &str, principal_id: &str, day: NaiveDate, amount: Decimal) -> UsageEvent {
    UsageEvent {
        principal_id: principal_id.to_string(),
        lease_id: lease_id.to_string(),
        account_id: "acct-1".to_string(),
        date: day,
        cost_amount: amount,
        cost_currency: "USD".to_string(),
        origin: UsageOrigin::Ingested,
    }
}

fn estimate(lease_id: &str, principal_id: &str, day: NaiveDate, amount: Decimal) -> UsageEvent {
    UsageEvent {
        origin: UsageOrigin::Estimate,
        ..event(lease_id, principal_id, day, amount)
    }
}

/// Wednesday; its week starts on Sunday 2024-03-03.
fn wednesday() -> NaiveDate {
    date(2024, 3, 6)
}

async fn lease_total(repo: &dyn UsageLedgerRepo, lease_id: &str) -> Option<Decimal> {
    repo.get_lease_aggregate(lease_id)
        .await
        .expect("Failed to read lease aggregate")
        .map(|agg| agg.cost_amount)
}

async fn principal_total(
    repo: &dyn UsageLedgerRepo,
    principal_id: &str,
    day: NaiveDate,
) -> Option<Decimal> {
    repo.get_principal_aggregate(principal_id, BudgetPeriod::Weekly.period_start(day))
        .await
        .expect("Failed to read principal aggregate")
        .map(|agg| agg.cost_amount)
}

// ============================================================================
// Raw upsert and delta application
// ============================================================================

pub async fn test_first_ingest_creates_aggregates(repo: &dyn UsageLedgerRepo) {
    let previous = repo
        .upsert_raw_event(&event("lease-1", "alice", wednesday(), dec!(10)))
        .await
        .expect("Failed to upsert");
    assert!(previous.is_none());

    let lease = repo
        .get_lease_aggregate("lease-1")
        .await
        .expect("Failed to read")
        .expect("Lease aggregate should exist");
    assert_eq!(lease.cost_amount, dec!(10));
    assert_eq!(lease.principal_id, "alice");
    assert_eq!(lease.cost_currency, "USD");
    assert_eq!(lease.last_usage_date, wednesday());

    let principal = repo
        .get_principal_aggregate("alice", date(2024, 3, 3))
        .await
        .expect("Failed to read")
        .expect("Principal aggregate should exist");
    assert_eq!(principal.cost_amount, dec!(10));
    assert_eq!(principal.period_start, date(2024, 3, 3));
}

pub async fn test_reingest_applies_only_delta(repo: &dyn UsageLedgerRepo) {
    repo.upsert_raw_event(&event("lease-1", "alice", wednesday(), dec!(10)))
        .await
        .expect("Failed to upsert");

    let previous = repo
        .upsert_raw_event(&event("lease-1", "alice", wednesday(), dec!(15)))
        .await
        .expect("Failed to upsert")
        .expect("Previous row should be returned");
    assert_eq!(previous.cost_amount, dec!(10));
    assert_eq!(previous.origin, UsageOrigin::Ingested);

    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(15)));
    assert_eq!(principal_total(repo, "alice", wednesday()).await, Some(dec!(15)));

    let raw = repo
        .query_range("alice", "acct-1", DateRange::single_day(wednesday()))
        .await
        .expect("Failed to query");
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].cost_amount, dec!(15));
}

pub async fn test_reingest_unchanged_is_noop(repo: &dyn UsageLedgerRepo) {
    for _ in 0..3 {
        repo.upsert_raw_event(&event("lease-1", "alice", wednesday(), dec!(10)))
            .await
            .expect("Failed to upsert");
    }

    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(10)));
    assert_eq!(principal_total(repo, "alice", wednesday()).await, Some(dec!(10)));
}

pub async fn test_revisions_converge_to_last_value(repo: &dyn UsageLedgerRepo) {
    // Figures may go down as well as up while the day settles
    for amount in [dec!(3), dec!(7.5), dec!(2), dec!(9.25)] {
        repo.upsert_raw_event(&event("lease-1", "alice", wednesday(), amount))
            .await
            .expect("Failed to upsert");
    }

    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(9.25)));
    assert_eq!(principal_total(repo, "alice", wednesday()).await, Some(dec!(9.25)));
}

pub async fn test_distinct_days_accumulate(repo: &dyn UsageLedgerRepo) {
    repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, 4), dec!(10)))
        .await
        .expect("Failed to upsert");
    repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, 5), dec!(5.5)))
        .await
        .expect("Failed to upsert");
    repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, 4), dec!(11)))
        .await
        .expect("Failed to upsert");

    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(16.5)));
    assert_eq!(principal_total(repo, "alice", wednesday()).await, Some(dec!(16.5)));
}

pub async fn test_created_at_kept_on_update(repo: &dyn UsageLedgerRepo) {
    repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, 4), dec!(1)))
        .await
        .expect("Failed to upsert");
    let first = repo
        .get_lease_aggregate("lease-1")
        .await
        .expect("Failed to read")
        .expect("Lease aggregate should exist");

    repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, 5), dec!(2)))
        .await
        .expect("Failed to upsert");
    let second = repo
        .get_lease_aggregate("lease-1")
        .await
        .expect("Failed to read")
        .expect("Lease aggregate should exist");

    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.last_usage_date, date(2024, 3, 5));
}

pub async fn test_principal_aggregate_sums_leases(repo: &dyn UsageLedgerRepo) {
    let first = event("lease-1", "alice", wednesday(), dec!(20));
    let second = event("lease-2", "alice", date(2024, 3, 7), dec!(30));

    let (a, b) = tokio::join!(
        repo.upsert_raw_event(&first),
        repo.upsert_raw_event(&second)
    );
    a.expect("Failed to upsert first lease");
    b.expect("Failed to upsert second lease");

    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(20)));
    assert_eq!(lease_total(repo, "lease-2").await, Some(dec!(30)));
    assert_eq!(principal_total(repo, "alice", wednesday()).await, Some(dec!(50)));
}

pub async fn test_concurrent_writers_commute(repo: &dyn UsageLedgerRepo) {
    let events: Vec<UsageEvent> = (1..=10)
        .map(|i| event(&format!("lease-{i}"), "alice", wednesday(), Decimal::from(i)))
        .collect();

    let results = futures::future::join_all(events.iter().map(|e| repo.upsert_raw_event(e))).await;
    for result in results {
        result.expect("Concurrent upsert failed");
    }

    assert_eq!(principal_total(repo, "alice", wednesday()).await, Some(dec!(55)));
}

/// Writers on distinct leases of one principal run as separate tasks over a
/// multi-connection pool. None of them may be reported as a conflict.
pub async fn test_spawned_leases_all_apply(repo: Arc<dyn UsageLedgerRepo>) {
    let handles: Vec<_> = (1..=20)
        .map(|i| {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move {
                let ev = event(&format!("lease-{i}"), "alice", wednesday(), Decimal::from(i));
                repo.upsert_raw_event(&ev).await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.expect("Writer task panicked");
        assert!(matches!(result, Ok(None)), "lease-{} failed: {result:?}", i + 1);
    }

    for i in 1..=20 {
        assert_eq!(
            lease_total(repo.as_ref(), &format!("lease-{i}")).await,
            Some(Decimal::from(i))
        );
    }
    assert_eq!(principal_total(repo.as_ref(), "alice", wednesday()).await, Some(dec!(210)));
}

/// Writers race on one `(lease_id, date)` row. Whichever commits last wins,
/// every write sees the row its predecessor left, and the aggregates end at
/// the surviving raw value.
pub async fn test_same_row_race_keeps_aggregates_consistent(repo: Arc<dyn UsageLedgerRepo>) {
    let handles: Vec<_> = (1..=10)
        .map(|i| {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move {
                let ev = event("lease-1", "alice", wednesday(), Decimal::from(i));
                repo.upsert_raw_event(&ev).await
            })
        })
        .collect();

    let mut replaced = Vec::new();
    for handle in handles {
        let previous = handle
            .await
            .expect("Writer task panicked")
            .expect("Racing upsert failed");
        replaced.push(previous);
    }

    let rows = repo
        .query_range("alice", "acct-1", DateRange::single_day(wednesday()))
        .await
        .expect("Failed to query range");
    assert_eq!(rows.len(), 1);
    let surviving = rows[0].cost_amount;

    assert_eq!(lease_total(repo.as_ref(), "lease-1").await, Some(surviving));
    assert_eq!(principal_total(repo.as_ref(), "alice", wednesday()).await, Some(surviving));

    // Writes form one chain: a single first insert, and each other amount
    // was replaced exactly once except the survivor.
    assert_eq!(replaced.iter().filter(|p| p.is_none()).count(), 1);
    let mut amounts: Vec<Decimal> = replaced
        .iter()
        .flatten()
        .map(|ev| ev.cost_amount)
        .chain(std::iter::once(surviving))
        .collect();
    amounts.sort();
    assert_eq!(amounts, (1..=10).map(Decimal::from).collect::<Vec<_>>());
}

pub async fn test_principal_aggregate_split_by_period(repo: &dyn UsageLedgerRepo) {
    // Saturday closes one week, Sunday opens the next
    repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, 9), dec!(4)))
        .await
        .expect("Failed to upsert");
    repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, 10), dec!(6)))
        .await
        .expect("Failed to upsert");

    assert_eq!(principal_total(repo, "alice", date(2024, 3, 9)).await, Some(dec!(4)));
    assert_eq!(principal_total(repo, "alice", date(2024, 3, 10)).await, Some(dec!(6)));
    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(10)));
}

pub async fn test_empty_currency_rejected(repo: &dyn UsageLedgerRepo) {
    let mut ev = event("lease-1", "alice", wednesday(), dec!(1));
    ev.cost_currency = String::new();

    let err = repo.upsert_raw_event(&ev).await.unwrap_err();
    assert!(matches!(err, DbError::Validation(_)), "{err:?}");
    assert_eq!(lease_total(repo, "lease-1").await, None);
}

// ============================================================================
// Write-through
// ============================================================================

pub async fn test_write_through_skips_aggregates(repo: &dyn UsageLedgerRepo) {
    repo.write_through(&estimate("lease-1", "alice", wednesday(), dec!(12)))
        .await
        .expect("Failed to write through");

    assert_eq!(lease_total(repo, "lease-1").await, None);
    assert_eq!(principal_total(repo, "alice", wednesday()).await, None);

    let raw = repo
        .query_range("alice", "acct-1", DateRange::single_day(wednesday()))
        .await
        .expect("Failed to query");
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].cost_amount, dec!(12));
    assert_eq!(raw[0].origin, UsageOrigin::Estimate);
}

pub async fn test_write_through_refreshes_estimate(repo: &dyn UsageLedgerRepo) {
    repo.write_through(&estimate("lease-1", "alice", wednesday(), dec!(12)))
        .await
        .expect("Failed to write through");
    repo.write_through(&estimate("lease-1", "alice", wednesday(), dec!(14)))
        .await
        .expect("Failed to write through");

    let raw = repo
        .query_range("alice", "acct-1", DateRange::single_day(wednesday()))
        .await
        .expect("Failed to query");
    assert_eq!(raw[0].cost_amount, dec!(14));
}

pub async fn test_ingest_over_estimate_applies_full_amount(repo: &dyn UsageLedgerRepo) {
    repo.write_through(&estimate("lease-1", "alice", wednesday(), dec!(12)))
        .await
        .expect("Failed to write through");

    let previous = repo
        .upsert_raw_event(&event("lease-1", "alice", wednesday(), dec!(15)))
        .await
        .expect("Failed to upsert")
        .expect("Estimate row should be returned");
    assert_eq!(previous.origin, UsageOrigin::Estimate);

    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(15)));
    assert_eq!(principal_total(repo, "alice", wednesday()).await, Some(dec!(15)));
}

pub async fn test_write_through_keeps_ingested_row(repo: &dyn UsageLedgerRepo) {
    repo.upsert_raw_event(&event("lease-1", "alice", wednesday(), dec!(15)))
        .await
        .expect("Failed to upsert");
    repo.write_through(&estimate("lease-1", "alice", wednesday(), dec!(99)))
        .await
        .expect("Failed to write through");

    let raw = repo
        .query_range("alice", "acct-1", DateRange::single_day(wednesday()))
        .await
        .expect("Failed to query");
    assert_eq!(raw[0].cost_amount, dec!(15));
    assert_eq!(raw[0].origin, UsageOrigin::Ingested);

    // A later re-ingest still sees 15 as the applied amount
    repo.upsert_raw_event(&event("lease-1", "alice", wednesday(), dec!(16)))
        .await
        .expect("Failed to upsert");
    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(16)));
}

// ============================================================================
// Range queries
// ============================================================================

pub async fn test_query_range_is_inclusive_and_filtered(repo: &dyn UsageLedgerRepo) {
    for day in 1..=5 {
        repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, day), Decimal::from(day)))
            .await
            .expect("Failed to upsert");
    }
    repo.upsert_raw_event(&event("lease-2", "bob", date(2024, 3, 3), dec!(100)))
        .await
        .expect("Failed to upsert");
    let mut other_account = event("lease-3", "alice", date(2024, 3, 3), dec!(200));
    other_account.account_id = "acct-2".to_string();
    repo.upsert_raw_event(&other_account)
        .await
        .expect("Failed to upsert");

    let range = DateRange::new(date(2024, 3, 2), date(2024, 3, 4)).unwrap();
    let rows = repo
        .query_range("alice", "acct-1", range)
        .await
        .expect("Failed to query");

    let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![date(2024, 3, 2), date(2024, 3, 3), date(2024, 3, 4)]);
    assert!(rows.iter().all(|r| r.belongs_to("alice", "acct-1")));
    let total: Decimal = rows.iter().map(|r| r.cost_amount).sum();
    assert_eq!(total, dec!(9));
}

pub async fn test_query_range_empty(repo: &dyn UsageLedgerRepo) {
    let rows = repo
        .query_range("nobody", "acct-1", DateRange::single_day(wednesday()))
        .await
        .expect("Failed to query");
    assert!(rows.is_empty());
}

// ============================================================================
// Expiry
// ============================================================================

pub async fn test_delete_expired_before(repo: &dyn UsageLedgerRepo) {
    for day in 1..=3 {
        repo.upsert_raw_event(&event("lease-1", "alice", date(2024, 3, day), dec!(1)))
            .await
            .expect("Failed to upsert");
    }

    let long_ago = Utc::now() - Duration::days(365 * 50);
    for table in LedgerTable::ALL {
        let count = repo
            .count_expired_before(table, long_ago)
            .await
            .expect("Failed to count");
        assert_eq!(count, 0, "{}", table.as_str());
    }

    let cutoff = Utc::now();
    assert_eq!(
        repo.count_expired_before(LedgerTable::UsageEvents, cutoff)
            .await
            .expect("Failed to count"),
        3
    );

    // Capped by max_deletes across several batches
    let deleted = repo
        .delete_expired_before(LedgerTable::UsageEvents, cutoff, 1, 2)
        .await
        .expect("Failed to delete");
    assert_eq!(deleted, 2);

    let deleted = repo
        .delete_expired_before(LedgerTable::UsageEvents, cutoff, 100, u64::MAX)
        .await
        .expect("Failed to delete");
    assert_eq!(deleted, 1);

    let deleted = repo
        .delete_expired_before(LedgerTable::LeaseAggregates, cutoff, 100, u64::MAX)
        .await
        .expect("Failed to delete");
    assert_eq!(deleted, 1);
    assert_eq!(lease_total(repo, "lease-1").await, None);

    // March 1-2 fall in the week of Feb 25, March 3 opens the next one
    let deleted = repo
        .delete_expired_before(LedgerTable::PrincipalAggregates, cutoff, 100, u64::MAX)
        .await
        .expect("Failed to delete");
    assert_eq!(deleted, 2);
}

pub async fn test_delete_keeps_unexpired_rows(repo: &dyn UsageLedgerRepo) {
    let today = Utc::now().date_naive();
    repo.upsert_raw_event(&event("lease-1", "alice", today, dec!(1)))
        .await
        .expect("Failed to upsert");

    for table in LedgerTable::ALL {
        let deleted = repo
            .delete_expired_before(table, Utc::now(), 100, u64::MAX)
            .await
            .expect("Failed to delete");
        assert_eq!(deleted, 0, "{}", table.as_str());
    }
    assert_eq!(lease_total(repo, "lease-1").await, Some(dec!(1)));
}

// ============================================================================
// SQLite Tests
// ============================================================================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use std::sync::Arc;

    use rust_decimal::dec;

    use super::{event, lease_total, wednesday};
    use crate::{
        config::LedgerSettings,
        db::{
            DbError, UsageLedgerRepo,
            sqlite::SqliteUsageLedgerRepo,
            tests::harness::{create_sqlite_file_pool, create_sqlite_pool, run_sqlite_migrations},
        },
    };

    async fn create_repo() -> SqliteUsageLedgerRepo {
        let pool = create_sqlite_pool().await;
        run_sqlite_migrations(&pool).await;
        SqliteUsageLedgerRepo::new(pool, LedgerSettings::default())
    }

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let repo = create_repo().await;
                super::$name(&repo).await;
            }
        };
    }

    sqlite_test!(test_first_ingest_creates_aggregates);
    sqlite_test!(test_reingest_applies_only_delta);
    sqlite_test!(test_reingest_unchanged_is_noop);
    sqlite_test!(test_revisions_converge_to_last_value);
    sqlite_test!(test_distinct_days_accumulate);
    sqlite_test!(test_created_at_kept_on_update);
    sqlite_test!(test_principal_aggregate_sums_leases);
    sqlite_test!(test_concurrent_writers_commute);
    sqlite_test!(test_principal_aggregate_split_by_period);
    sqlite_test!(test_empty_currency_rejected);

    sqlite_test!(test_write_through_skips_aggregates);
    sqlite_test!(test_write_through_refreshes_estimate);
    sqlite_test!(test_ingest_over_estimate_applies_full_amount);
    sqlite_test!(test_write_through_keeps_ingested_row);

    sqlite_test!(test_query_range_is_inclusive_and_filtered);
    sqlite_test!(test_query_range_empty);

    sqlite_test!(test_delete_expired_before);
    sqlite_test!(test_delete_keeps_unexpired_rows);

    /// Runs a shared test against a WAL file with five connections and the
    /// default 5s busy timeout, so writers contend for the write lock.
    macro_rules! sqlite_file_test {
        ($name:ident, $test_fn:ident) => {
            #[tokio::test]
            async fn $name() {
                let (_dir, pool) = create_sqlite_file_pool(5, 5000).await;
                run_sqlite_migrations(&pool).await;
                let repo: Arc<dyn UsageLedgerRepo> =
                    Arc::new(SqliteUsageLedgerRepo::new(pool, LedgerSettings::default()));
                super::$test_fn(repo).await;
            }
        };
    }

    sqlite_file_test!(test_file_spawned_leases_all_apply, test_spawned_leases_all_apply);
    sqlite_file_test!(
        test_file_same_row_race_keeps_aggregates_consistent,
        test_same_row_race_keeps_aggregates_consistent
    );

    #[tokio::test]
    async fn test_file_concurrent_writers_commute() {
        let (_dir, pool) = create_sqlite_file_pool(5, 5000).await;
        run_sqlite_migrations(&pool).await;
        let repo = SqliteUsageLedgerRepo::new(pool, LedgerSettings::default());
        super::test_concurrent_writers_commute(&repo).await;
    }

    #[tokio::test]
    async fn test_held_write_lock_exhausts_attempts() {
        let (_dir, pool) = create_sqlite_file_pool(2, 0).await;
        run_sqlite_migrations(&pool).await;
        let settings = LedgerSettings {
            max_write_attempts: 3,
            write_retry_delay_ms: 0,
            write_retry_max_delay_ms: 0,
            ..Default::default()
        };
        let repo = SqliteUsageLedgerRepo::new(pool.clone(), settings);

        let mut holder = pool.acquire().await.expect("Failed to acquire connection");
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *holder)
            .await
            .expect("Failed to take write lock");

        let ev = event("lease-1", "alice", wednesday(), dec!(7));
        let err = repo.upsert_raw_event(&ev).await.unwrap_err();
        match err {
            DbError::Conflict {
                lease_id,
                date,
                attempts,
            } => {
                assert_eq!(lease_id, "lease-1");
                assert_eq!(date, wednesday());
                assert_eq!(attempts, 3);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        sqlx::query("ROLLBACK")
            .execute(&mut *holder)
            .await
            .expect("Failed to release write lock");
        drop(holder);

        assert_eq!(lease_total(&repo, "lease-1").await, None);
        repo.upsert_raw_event(&ev)
            .await
            .expect("Upsert failed after lock was released");
        assert_eq!(lease_total(&repo, "lease-1").await, Some(dec!(7)));
    }
}

// ============================================================================
// PostgreSQL Tests
// ============================================================================

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use std::sync::Arc;

    use crate::{
        config::LedgerSettings,
        db::{
            UsageLedgerRepo,
            postgres::PostgresUsageLedgerRepo,
            tests::harness::postgres::{create_isolated_postgres_pool, run_postgres_migrations},
        },
    };

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let pool = create_isolated_postgres_pool().await;
                run_postgres_migrations(&pool).await;
                let settings = LedgerSettings {
                    max_write_attempts: 20,
                    ..Default::default()
                };
                let repo = PostgresUsageLedgerRepo::new(pool, None, settings);
                super::$name(&repo).await;
            }
        };
    }

    postgres_test!(test_first_ingest_creates_aggregates);
    postgres_test!(test_reingest_applies_only_delta);
    postgres_test!(test_reingest_unchanged_is_noop);
    postgres_test!(test_revisions_converge_to_last_value);
    postgres_test!(test_distinct_days_accumulate);
    postgres_test!(test_created_at_kept_on_update);
    postgres_test!(test_principal_aggregate_sums_leases);
    postgres_test!(test_concurrent_writers_commute);
    postgres_test!(test_principal_aggregate_split_by_period);
    postgres_test!(test_empty_currency_rejected);

    postgres_test!(test_write_through_skips_aggregates);
    postgres_test!(test_write_through_refreshes_estimate);
    postgres_test!(test_ingest_over_estimate_applies_full_amount);
    postgres_test!(test_write_through_keeps_ingested_row);

    postgres_test!(test_query_range_is_inclusive_and_filtered);
    postgres_test!(test_query_range_empty);

    postgres_test!(test_delete_expired_before);
    postgres_test!(test_delete_keeps_unexpired_rows);

    macro_rules! postgres_spawned_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let pool = create_isolated_postgres_pool().await;
                run_postgres_migrations(&pool).await;
                let settings = LedgerSettings {
                    max_write_attempts: 20,
                    ..Default::default()
                };
                let repo: Arc<dyn UsageLedgerRepo> =
                    Arc::new(PostgresUsageLedgerRepo::new(pool, None, settings));
                super::$name(repo).await;
            }
        };
    }

    postgres_spawned_test!(test_spawned_leases_all_apply);
    postgres_spawned_test!(test_same_row_race_keeps_aggregates_consistent);
}
