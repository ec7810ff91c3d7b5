use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    config::LedgerSettings,
    db::{
        error::{DbError, DbResult},
        records::{AggregateRecord, PreparedUsageWrite, SCHEMA_VERSION, UsageEventRecord},
        repos::{DateRange, LedgerTable, UsageLedgerRepo},
    },
    models::{LeaseUsageAggregate, PrincipalBudgetAggregate, UsageEvent},
    observability::metrics,
};

const EVENT_COLUMNS: &str = "principal_id, lease_id, account_id, usage_date, cost_microcents, \
    cost_currency, origin, version, schema_version";

pub struct SqliteUsageLedgerRepo {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl SqliteUsageLedgerRepo {
    pub fn new(pool: SqlitePool, settings: LedgerSettings) -> Self {
        Self { pool, settings }
    }

    fn event_record(row: &SqliteRow) -> DbResult<UsageEventRecord> {
        Ok(UsageEventRecord {
            principal_id: row.try_get("principal_id")?,
            lease_id: row.try_get("lease_id")?,
            account_id: row.try_get("account_id")?,
            usage_date: row.try_get("usage_date")?,
            cost_microcents: row.try_get("cost_microcents")?,
            cost_currency: row.try_get("cost_currency")?,
            origin: row.try_get("origin")?,
            version: row.try_get("version")?,
            schema_version: row.try_get("schema_version")?,
        })
    }

    fn aggregate_record(
        row: &SqliteRow,
        key_column: &str,
        period_start: Option<NaiveDate>,
    ) -> DbResult<AggregateRecord> {
        Ok(AggregateRecord {
            key: row.try_get(key_column)?,
            principal_id: row.try_get("principal_id")?,
            period_start,
            cost_microcents: row.try_get("cost_microcents")?,
            cost_currency: row.try_get("cost_currency")?,
            last_usage_date: row.try_get("last_usage_date")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// One attempt at the raw write plus aggregate deltas.
    ///
    /// Returns the replaced row. The transaction takes the write lock before
    /// reading, so concurrent writers queue on `busy_timeout` instead of
    /// failing a deferred lock upgrade with `SQLITE_BUSY_SNAPSHOT`. A writer
    /// that still loses surfaces as a stale version or a busy/unique error,
    /// all of which the caller retries.
    async fn try_upsert(&self, write: &PreparedUsageWrite<'_>) -> DbResult<Option<UsageEvent>> {
        let event = write.event;
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let current = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM usage_events WHERE lease_id = ? AND usage_date = ?"
        ))
        .bind(&event.lease_id)
        .bind(event.date)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| Self::event_record(&row))
        .transpose()?;

        let previous = current.clone().map(UsageEventRecord::into_event).transpose()?;
        let now = Utc::now();

        let rows_affected = match &current {
            None => sqlx::query(
                r#"
                INSERT INTO usage_events (
                    lease_id, usage_date, principal_id, account_id, cost_microcents,
                    cost_currency, origin, version, schema_version, expires_at,
                    created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, 'ingested', 1, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.lease_id)
            .bind(event.date)
            .bind(&event.principal_id)
            .bind(&event.account_id)
            .bind(write.cost_microcents)
            .bind(&event.cost_currency)
            .bind(SCHEMA_VERSION)
            .bind(write.raw_expires_at)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            Some(existing) => sqlx::query(
                r#"
                UPDATE usage_events
                SET principal_id = ?, account_id = ?, cost_microcents = ?, cost_currency = ?,
                    origin = 'ingested', version = version + 1, schema_version = ?,
                    expires_at = ?, updated_at = ?
                WHERE lease_id = ? AND usage_date = ? AND version = ?
                "#,
            )
            .bind(&event.principal_id)
            .bind(&event.account_id)
            .bind(write.cost_microcents)
            .bind(&event.cost_currency)
            .bind(SCHEMA_VERSION)
            .bind(write.raw_expires_at)
            .bind(now)
            .bind(&event.lease_id)
            .bind(event.date)
            .bind(existing.version)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if rows_affected != 1 {
            return Err(DbError::StaleVersion {
                lease_id: event.lease_id.clone(),
                date: event.date,
            });
        }

        let delta = write.delta_microcents(current.as_ref());

        sqlx::query(
            r#"
            INSERT INTO lease_usage_aggregates (
                lease_id, principal_id, cost_microcents, cost_currency, last_usage_date,
                expires_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (lease_id) DO UPDATE SET
                cost_microcents = lease_usage_aggregates.cost_microcents + excluded.cost_microcents,
                principal_id = excluded.principal_id,
                cost_currency = excluded.cost_currency,
                last_usage_date = excluded.last_usage_date,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&event.lease_id)
        .bind(&event.principal_id)
        .bind(delta)
        .bind(&event.cost_currency)
        .bind(event.date)
        .bind(write.aggregate_expires_at)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO principal_budget_aggregates (
                principal_id, period_start, cost_microcents, cost_currency, last_usage_date,
                expires_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (principal_id, period_start) DO UPDATE SET
                cost_microcents = principal_budget_aggregates.cost_microcents + excluded.cost_microcents,
                cost_currency = excluded.cost_currency,
                last_usage_date = excluded.last_usage_date,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&event.principal_id)
        .bind(write.period_start)
        .bind(delta)
        .bind(&event.cost_currency)
        .bind(event.date)
        .bind(write.aggregate_expires_at)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            lease_id = %event.lease_id,
            principal_id = %event.principal_id,
            date = %event.date,
            delta_microcents = delta,
            "Applied usage delta"
        );

        Ok(previous)
    }
}

/// Lost races show up as a failed version guard, a duplicate insert, or a
/// busy/locked database while upgrading to a write lock.
fn is_write_conflict(err: &DbError) -> bool {
    match err {
        DbError::StaleVersion { .. } => true,
        DbError::Sqlx(sqlx::Error::Database(db)) => {
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
            db.is_unique_violation() || matches!(db.code().as_deref(), Some("5" | "6" | "517"))
        }
        _ => false,
    }
}

#[async_trait]
impl UsageLedgerRepo for SqliteUsageLedgerRepo {
    async fn upsert_raw_event(&self, event: &UsageEvent) -> DbResult<Option<UsageEvent>> {
        let write = PreparedUsageWrite::new(event, &self.settings)?;
        let attempts = self.settings.max_write_attempts.max(1);
        let started = Instant::now();

        for attempt in 1..=attempts {
            match self.try_upsert(&write).await {
                Ok(previous) => {
                    metrics::record_ledger_write(
                        "ingest",
                        "applied",
                        started.elapsed().as_secs_f64(),
                    );
                    return Ok(previous);
                }
                Err(e) if is_write_conflict(&e) => {
                    metrics::record_write_retry();
                    tracing::debug!(
                        lease_id = %event.lease_id,
                        date = %event.date,
                        attempt,
                        error = %e,
                        "Usage write lost a race, retrying"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.write_retry_delay(attempt - 1)).await;
                    }
                }
                Err(e) => {
                    metrics::record_ledger_write(
                        "ingest",
                        "error",
                        started.elapsed().as_secs_f64(),
                    );
                    return Err(e);
                }
            }
        }

        metrics::record_ledger_write("ingest", "conflict", started.elapsed().as_secs_f64());
        Err(DbError::Conflict {
            lease_id: event.lease_id.clone(),
            date: event.date,
            attempts,
        })
    }

    async fn write_through(&self, event: &UsageEvent) -> DbResult<()> {
        let write = PreparedUsageWrite::new(event, &self.settings)?;
        let now = Utc::now();
        let started = Instant::now();

        // The WHERE clause leaves ingested rows untouched
        sqlx::query(
            r#"
            INSERT INTO usage_events (
                lease_id, usage_date, principal_id, account_id, cost_microcents,
                cost_currency, origin, version, schema_version, expires_at,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 'estimate', 1, ?, ?, ?, ?)
            ON CONFLICT (lease_id, usage_date) DO UPDATE SET
                principal_id = excluded.principal_id,
                account_id = excluded.account_id,
                cost_microcents = excluded.cost_microcents,
                cost_currency = excluded.cost_currency,
                version = usage_events.version + 1,
                schema_version = excluded.schema_version,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            WHERE usage_events.origin = 'estimate'
            "#,
        )
        .bind(&event.lease_id)
        .bind(event.date)
        .bind(&event.principal_id)
        .bind(&event.account_id)
        .bind(write.cost_microcents)
        .bind(&event.cost_currency)
        .bind(SCHEMA_VERSION)
        .bind(write.raw_expires_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        metrics::record_ledger_write("write_through", "applied", started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn query_range(
        &self,
        principal_id: &str,
        account_id: &str,
        range: DateRange,
    ) -> DbResult<Vec<UsageEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM usage_events
            WHERE principal_id = ? AND account_id = ?
                AND usage_date >= ? AND usage_date <= ?
            ORDER BY usage_date ASC, lease_id ASC
            "#
        ))
        .bind(principal_id)
        .bind(account_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::event_record(row).and_then(UsageEventRecord::into_event))
            .collect()
    }

    async fn get_lease_aggregate(&self, lease_id: &str) -> DbResult<Option<LeaseUsageAggregate>> {
        let row = sqlx::query(
            r#"
            SELECT lease_id, principal_id, cost_microcents, cost_currency, last_usage_date,
                expires_at, created_at, updated_at
            FROM lease_usage_aggregates
            WHERE lease_id = ?
            "#,
        )
        .bind(lease_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Self::aggregate_record(&row, "lease_id", None).map(AggregateRecord::into_lease_aggregate)
        })
        .transpose()
    }

    async fn get_principal_aggregate(
        &self,
        principal_id: &str,
        period_start: NaiveDate,
    ) -> DbResult<Option<PrincipalBudgetAggregate>> {
        let row = sqlx::query(
            r#"
            SELECT principal_id, cost_microcents, cost_currency, last_usage_date,
                expires_at, created_at, updated_at
            FROM principal_budget_aggregates
            WHERE principal_id = ? AND period_start = ?
            "#,
        )
        .bind(principal_id)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Self::aggregate_record(&row, "principal_id", Some(period_start))
                .and_then(AggregateRecord::into_principal_aggregate)
        })
        .transpose()
    }

    async fn count_expired_before(
        &self,
        table: LedgerTable,
        cutoff: DateTime<Utc>,
    ) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE expires_at < ?",
            table.as_str()
        ))
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn delete_expired_before(
        &self,
        table: LedgerTable,
        cutoff: DateTime<Utc>,
        batch_size: u32,
        max_deletes: u64,
    ) -> DbResult<u64> {
        let mut total_deleted: u64 = 0;
        let table = table.as_str();

        loop {
            if total_deleted >= max_deletes {
                break;
            }

            let remaining = max_deletes - total_deleted;
            let limit = std::cmp::min(batch_size as u64, remaining) as i64;

            // SQLite has no LIMIT on DELETE, so select the batch by rowid
            let result = sqlx::query(&format!(
                r#"
                DELETE FROM {table}
                WHERE rowid IN (
                    SELECT rowid FROM {table}
                    WHERE expires_at < ?
                    LIMIT ?
                )
                "#
            ))
            .bind(cutoff)
            .bind(limit)
            .execute(&self.pool)
            .await?;

            let rows_deleted = result.rows_affected();
            total_deleted += rows_deleted;

            if rows_deleted < limit as u64 {
                break;
            }
        }

        Ok(total_deleted)
    }
}
