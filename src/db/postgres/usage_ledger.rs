use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

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

pub struct PostgresUsageLedgerRepo {
    write_pool: PgPool,
    read_pool: PgPool,
    settings: LedgerSettings,
}

impl PostgresUsageLedgerRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>, settings: LedgerSettings) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
            settings,
        }
    }

    fn event_record(row: &PgRow) -> DbResult<UsageEventRecord> {
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
        row: &PgRow,
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

    async fn try_upsert(&self, write: &PreparedUsageWrite<'_>) -> DbResult<Option<UsageEvent>> {
        let event = write.event;
        let mut tx = self.write_pool.begin().await?;

        let current = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM usage_events WHERE lease_id = $1 AND usage_date = $2"
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
                VALUES ($1, $2, $3, $4, $5, $6, 'ingested', 1, $7, $8, $9, $9)
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
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            Some(existing) => sqlx::query(
                r#"
                UPDATE usage_events
                SET principal_id = $1, account_id = $2, cost_microcents = $3, cost_currency = $4,
                    origin = 'ingested', version = version + 1, schema_version = $5,
                    expires_at = $6, updated_at = $7
                WHERE lease_id = $8 AND usage_date = $9 AND version = $10
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (lease_id) DO UPDATE SET
                cost_microcents = lease_usage_aggregates.cost_microcents + EXCLUDED.cost_microcents,
                principal_id = EXCLUDED.principal_id,
                cost_currency = EXCLUDED.cost_currency,
                last_usage_date = EXCLUDED.last_usage_date,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&event.lease_id)
        .bind(&event.principal_id)
        .bind(delta)
        .bind(&event.cost_currency)
        .bind(event.date)
        .bind(write.aggregate_expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO principal_budget_aggregates (
                principal_id, period_start, cost_microcents, cost_currency, last_usage_date,
                expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (principal_id, period_start) DO UPDATE SET
                cost_microcents = principal_budget_aggregates.cost_microcents + EXCLUDED.cost_microcents,
                cost_currency = EXCLUDED.cost_currency,
                last_usage_date = EXCLUDED.last_usage_date,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&event.principal_id)
        .bind(write.period_start)
        .bind(delta)
        .bind(&event.cost_currency)
        .bind(event.date)
        .bind(write.aggregate_expires_at)
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
/// serialization failure.
fn is_write_conflict(err: &DbError) -> bool {
    match err {
        DbError::StaleVersion { .. } => true,
        DbError::Sqlx(sqlx::Error::Database(db)) => {
            // 40001 serialization_failure, 40P01 deadlock_detected
            db.is_unique_violation() || matches!(db.code().as_deref(), Some("40001" | "40P01"))
        }
        _ => false,
    }
}

#[async_trait]
impl UsageLedgerRepo for PostgresUsageLedgerRepo {
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
        let started = Instant::now();

        sqlx::query(
            r#"
            INSERT INTO usage_events (
                lease_id, usage_date, principal_id, account_id, cost_microcents,
                cost_currency, origin, version, schema_version, expires_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'estimate', 1, $7, $8, $9, $9)
            ON CONFLICT (lease_id, usage_date) DO UPDATE SET
                principal_id = EXCLUDED.principal_id,
                account_id = EXCLUDED.account_id,
                cost_microcents = EXCLUDED.cost_microcents,
                cost_currency = EXCLUDED.cost_currency,
                version = usage_events.version + 1,
                schema_version = EXCLUDED.schema_version,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
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
        .bind(Utc::now())
        .execute(&self.write_pool)
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
            WHERE principal_id = $1 AND account_id = $2
                AND usage_date >= $3 AND usage_date <= $4
            ORDER BY usage_date ASC, lease_id ASC
            "#
        ))
        .bind(principal_id)
        .bind(account_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.read_pool)
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
            WHERE lease_id = $1
            "#,
        )
        .bind(lease_id)
        .fetch_optional(&self.read_pool)
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
            WHERE principal_id = $1 AND period_start = $2
            "#,
        )
        .bind(principal_id)
        .bind(period_start)
        .fetch_optional(&self.read_pool)
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
            "SELECT COUNT(*) FROM {} WHERE expires_at < $1",
            table.as_str()
        ))
        .bind(cutoff)
        .fetch_one(&self.read_pool)
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

            let result = sqlx::query(&format!(
                r#"
                DELETE FROM {table}
                WHERE ctid IN (
                    SELECT ctid FROM {table}
                    WHERE expires_at < $1
                    LIMIT $2
                )
                "#
            ))
            .bind(cutoff)
            .bind(limit)
            .execute(&self.write_pool)
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
