//! Networked job store on PostgreSQL, accessed through SeaORM.
//!
//! Workers are plain threads, so the store owns a small tokio runtime and
//! blocks on it for every round-trip. Claims use `FOR UPDATE SKIP LOCKED`
//! so concurrent claimers, in this process or any other, never receive the
//! same row.

use chrono::{DateTime, SubsecRound, Utc};
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, Statement, TransactionTrait, Value,
};
use tokio::runtime::Runtime;

use super::entities::job;
use super::StoreError;
use crate::models::{
    Charge, ClaimQuery, JobRecord, JobStatus, QuotaScope, ReportRow, RequeueSummary,
};
use crate::store::{validate_advance, validate_new, CounterStore, JobStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        seq BIGSERIAL NOT NULL UNIQUE,
        status TEXT NOT NULL DEFAULT 'NEW'
            CHECK (status IN ('NEW', 'FETCHING', 'FETCHED', 'DELETING')),
        from_addr TEXT NOT NULL DEFAULT '',
        to_addr TEXT NOT NULL DEFAULT '',
        created TIMESTAMPTZ
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_seq ON jobs (status, seq)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_from ON jobs (status, from_addr, seq)",
    "CREATE TABLE IF NOT EXISTS quota_counters (
        scope TEXT NOT NULL CHECK (scope IN ('GLOBAL', 'CALLER')),
        bucket_start TIMESTAMPTZ NOT NULL,
        used BIGINT NOT NULL DEFAULT 0,
        PRIMARY KEY (scope, bucket_start)
    )",
];

const RETURNING_RECORD: &str = "RETURNING id, seq, status, from_addr, to_addr, created";

#[derive(Debug, FromQueryResult)]
struct SenderCount {
    from_addr: String,
    total: i64,
}

#[derive(Debug, FromQueryResult)]
struct CounterRow {
    used: i64,
}

fn statement<I>(sql: &str, values: I) -> Statement
where
    I: IntoIterator<Item = Value>,
{
    Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl TryFrom<job::Model> for JobRecord {
    type Error = StoreError;

    fn try_from(model: job::Model) -> Result<Self, Self::Error> {
        let status = model
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(JobRecord {
            id: model.id,
            status,
            from: model.from_addr,
            to: model.to_addr,
            created: model.created,
        })
    }
}

/// Job and counter store backed by a PostgreSQL server.
pub struct PostgresStore {
    conn: DatabaseConnection,
    runtime: Runtime,
}

impl PostgresStore {
    /// Connects to `url`, creating the tables when they do not exist yet.
    pub fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mailsweep-pg")
            .enable_all()
            .build()
            .map_err(StoreError::Runtime)?;

        let mut options = ConnectOptions::new(url.to_owned());
        options.max_connections(max_connections).sqlx_logging(false);

        let conn = runtime.block_on(async {
            let conn = sea_orm::Database::connect(options).await?;
            for ddl in SCHEMA {
                conn.execute_unprepared(ddl).await?;
            }
            Ok::<_, StoreError>(conn)
        })?;

        log::info!("Connected to PostgreSQL job store");

        Ok(Self { conn, runtime })
    }

    /// Drops every job and counter. Used to isolate test runs.
    pub fn truncate_all(&self) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            self.conn
                .execute_unprepared("TRUNCATE jobs, quota_counters RESTART IDENTITY")
                .await?;
            Ok(())
        })
    }
}

impl JobStore for PostgresStore {
    fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        validate_new(record)?;
        self.runtime.block_on(async {
            let result = self
                .conn
                .execute(statement(
                    "INSERT INTO jobs (id, status) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
                    [record.id.as_str().into(), JobStatus::New.as_str().into()],
                ))
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Duplicate(record.id.clone()));
            }
            Ok(())
        })
    }

    fn claim_one(
        &self,
        query: &ClaimQuery,
        target: JobStatus,
    ) -> Result<Option<JobRecord>, StoreError> {
        let stmt = match query {
            ClaimQuery::Any(source) => statement(
                &format!(
                    "UPDATE jobs SET status = $1
                     WHERE status = $2 AND id = (
                         SELECT id FROM jobs WHERE status = $2
                         ORDER BY seq LIMIT 1 FOR UPDATE SKIP LOCKED)
                     {RETURNING_RECORD}"
                ),
                [target.as_str().into(), source.as_str().into()],
            ),
            ClaimQuery::BySender { source, sender } => statement(
                &format!(
                    "UPDATE jobs SET status = $1
                     WHERE status = $2 AND id = (
                         SELECT id FROM jobs WHERE status = $2 AND from_addr = $3
                         ORDER BY seq LIMIT 1 FOR UPDATE SKIP LOCKED)
                     {RETURNING_RECORD}"
                ),
                [
                    target.as_str().into(),
                    source.as_str().into(),
                    sender.as_str().into(),
                ],
            ),
        };

        self.runtime.block_on(async {
            let claimed = job::Entity::find()
                .from_raw_sql(stmt)
                .one(&self.conn)
                .await?;
            claimed.map(JobRecord::try_from).transpose()
        })
    }

    fn advance(&self, record: &JobRecord) -> Result<bool, StoreError> {
        let predecessor = validate_advance(record)?;
        self.runtime.block_on(async {
            let result = self
                .conn
                .execute(statement(
                    "UPDATE jobs SET status = $2, from_addr = $3, to_addr = $4, created = $5
                     WHERE id = $1 AND status = $6",
                    [
                        record.id.as_str().into(),
                        record.status.as_str().into(),
                        record.from.as_str().into(),
                        record.to.as_str().into(),
                        record.created.into(),
                        predecessor.as_str().into(),
                    ],
                ))
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            self.conn
                .execute(statement(
                    "DELETE FROM jobs WHERE id = $1 AND status IN ($2, $3)",
                    [
                        id.into(),
                        JobStatus::Fetched.as_str().into(),
                        JobStatus::Deleting.as_str().into(),
                    ],
                ))
                .await?;
            Ok(())
        })
    }

    fn summarize(&self, limit: usize) -> Result<Vec<ReportRow>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.runtime.block_on(async {
            // COLLATE "C" gives the same byte-wise tie order as SQLite.
            let rows = SenderCount::find_by_statement(statement(
                r#"SELECT from_addr, COUNT(*) AS total FROM jobs WHERE status = $1
                   GROUP BY from_addr ORDER BY total DESC, from_addr COLLATE "C" ASC
                   LIMIT $2"#,
                [JobStatus::Fetched.as_str().into(), limit.into()],
            ))
            .all(&self.conn)
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| ReportRow::new(row.from_addr, to_count(row.total)))
                .collect())
        })
    }

    fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        self.runtime.block_on(async {
            let count = job::Entity::find()
                .filter(job::Column::Status.eq(status.as_str()))
                .count(&self.conn)
                .await?;
            Ok(count)
        })
    }

    fn find(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        self.runtime.block_on(async {
            let found = job::Entity::find_by_id(id.to_owned())
                .one(&self.conn)
                .await?;
            found.map(JobRecord::try_from).transpose()
        })
    }

    fn requeue_stale(&self) -> Result<RequeueSummary, StoreError> {
        self.runtime.block_on(async {
            let txn = self.conn.begin().await?;
            let fetching = txn
                .execute(statement(
                    "UPDATE jobs SET status = $1, from_addr = '', to_addr = '', created = NULL
                     WHERE status = $2",
                    [
                        JobStatus::New.as_str().into(),
                        JobStatus::Fetching.as_str().into(),
                    ],
                ))
                .await?
                .rows_affected();
            let deleting = txn
                .execute(statement(
                    "UPDATE jobs SET status = $1 WHERE status = $2",
                    [
                        JobStatus::Fetched.as_str().into(),
                        JobStatus::Deleting.as_str().into(),
                    ],
                ))
                .await?
                .rows_affected();
            txn.commit().await?;
            Ok(RequeueSummary { fetching, deleting })
        })
    }
}

impl CounterStore for PostgresStore {
    fn try_charge(&self, charges: &[Charge]) -> Result<bool, StoreError> {
        if charges.iter().any(|c| c.cost > c.ceiling) {
            return Ok(false);
        }

        self.runtime.block_on(async {
            let txn = self.conn.begin().await?;
            for charge in charges {
                let applied = txn
                    .execute(statement(
                        "INSERT INTO quota_counters (scope, bucket_start, used) VALUES ($1, $2, $3)
                         ON CONFLICT (scope, bucket_start) DO UPDATE
                         SET used = quota_counters.used + EXCLUDED.used
                         WHERE quota_counters.used + EXCLUDED.used <= $4",
                        [
                            charge.scope.as_str().into(),
                            charge.bucket_start.into(),
                            to_sql_int(charge.cost).into(),
                            to_sql_int(charge.ceiling).into(),
                        ],
                    ))
                    .await?
                    .rows_affected();
                if applied == 0 {
                    txn.rollback().await?;
                    return Ok(false);
                }
            }
            txn.commit().await?;
            Ok(true)
        })
    }

    fn counter(&self, scope: QuotaScope, bucket_start: DateTime<Utc>) -> Result<u64, StoreError> {
        self.runtime.block_on(async {
            let row = CounterRow::find_by_statement(statement(
                "SELECT used FROM quota_counters WHERE scope = $1 AND bucket_start = $2",
                [scope.as_str().into(), bucket_start.into()],
            ))
            .one(&self.conn)
            .await?;
            Ok(row.map(|r| to_count(r.used)).unwrap_or(0))
        })
    }

    fn prune(&self, scope: QuotaScope, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.runtime.block_on(async {
            let result = self
                .conn
                .execute(statement(
                    "DELETE FROM quota_counters WHERE scope = $1 AND bucket_start < $2",
                    [scope.as_str().into(), before.trunc_subsecs(0).into()],
                ))
                .await?;
            Ok(result.rows_affected())
        })
    }
}
