//! Database module for persistent storage.
//!
//! The embedded backend uses rusqlite (SQLite) with a thread-safe
//! `Database` handle. Access to the single connection is serialized
//! through a `Mutex<Connection>`; atomicity of claims and quota charges
//! comes from SQLite itself (single-statement `UPDATE ... RETURNING` and
//! `BEGIN IMMEDIATE` transactions), so several processes may share the
//! file. The networked backend lives in [`postgres`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub mod counter_repo;
pub mod entities;
pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod postgres;

pub use error::StoreError;

use crate::models::{Charge, ClaimQuery, JobRecord, JobStatus, QuotaScope, ReportRow, RequeueSummary};
use crate::store::{CounterStore, JobStore};

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled so readers in other
/// processes are not blocked by the writer.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }
}

/// Returns the canonical database path: `~/.mailsweep/data/mailsweep.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mailsweep").join("data").join("mailsweep.db"))
}

/// Encodes a timestamp the way every table stores it.
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

impl JobStore for Database {
    fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        job_repo::insert(self, record)
    }

    fn claim_one(
        &self,
        query: &ClaimQuery,
        target: JobStatus,
    ) -> Result<Option<JobRecord>, StoreError> {
        job_repo::claim_one(self, query, target)
    }

    fn advance(&self, record: &JobRecord) -> Result<bool, StoreError> {
        job_repo::advance(self, record)
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        job_repo::remove(self, id)
    }

    fn summarize(&self, limit: usize) -> Result<Vec<ReportRow>, StoreError> {
        job_repo::summarize(self, limit)
    }

    fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        job_repo::count_by_status(self, status)
    }

    fn find(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        job_repo::find_by_id(self, id)
    }

    fn requeue_stale(&self) -> Result<RequeueSummary, StoreError> {
        job_repo::requeue_stale(self)
    }
}

impl CounterStore for Database {
    fn try_charge(&self, charges: &[Charge]) -> Result<bool, StoreError> {
        counter_repo::try_charge(self, charges)
    }

    fn counter(&self, scope: QuotaScope, bucket_start: DateTime<Utc>) -> Result<u64, StoreError> {
        counter_repo::find_count(self, scope, &bucket_start)
    }

    fn prune(&self, scope: QuotaScope, before: DateTime<Utc>) -> Result<u64, StoreError> {
        counter_repo::delete_before(self, scope, &before)
    }
}
