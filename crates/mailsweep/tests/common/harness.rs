//! Test harness for isolated test execution.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use mailsweep::db::postgres::PostgresStore;
use mailsweep::models::{ClaimQuery, JobRecord, JobStatus};
use mailsweep::store::{self, Backend};
use mailsweep::{Config, Engine, MemoryMailbox, StoreConfig};

/// Environment variable holding the PostgreSQL URL for backend tests.
pub const POSTGRES_URL_ENV: &str = "MAILSWEEP_TEST_DATABASE_URL";

pub fn postgres_url() -> Option<String> {
    std::env::var(POSTGRES_URL_ENV).ok().filter(|u| !u.is_empty())
}

/// A store plus an in-memory mailbox, torn down on drop.
pub struct TestHarness {
    /// Holds the SQLite file; `None` for PostgreSQL.
    temp_dir: Option<TempDir>,
    pub store_config: StoreConfig,
    pub backend: Backend,
    pub mailbox: Arc<MemoryMailbox>,
}

impl TestHarness {
    /// A fresh SQLite store in a temporary directory.
    pub fn sqlite() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("data").join("mailsweep.db");
        let store_config = StoreConfig::Sqlite { path };
        let backend = store::open(&store_config).expect("Failed to open SQLite store");
        Self {
            temp_dir: Some(temp_dir),
            store_config,
            backend,
            mailbox: Arc::new(MemoryMailbox::new(3)),
        }
    }

    /// An emptied PostgreSQL store, or `None` when no server is configured.
    pub fn postgres() -> Option<Self> {
        let url = postgres_url()?;
        let pg = PostgresStore::connect(&url, 8).expect("Failed to connect to PostgreSQL");
        pg.truncate_all().expect("Failed to truncate tables");
        Some(Self {
            temp_dir: None,
            store_config: StoreConfig::Postgres {
                url,
                max_connections: 8,
            },
            backend: Backend::from_shared(Arc::new(pg)),
            mailbox: Arc::new(MemoryMailbox::new(3)),
        })
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        match &self.store_config {
            StoreConfig::Sqlite { path } => Some(path.clone()),
            StoreConfig::Postgres { .. } => None,
        }
    }

    /// Opens a second, independent handle on the same store.
    pub fn reopen(&self) -> Backend {
        store::open(&self.store_config).expect("Failed to reopen store")
    }

    pub fn config(&self, workers: usize) -> Config {
        let mut config = Config {
            store: self.store_config.clone(),
            workers,
            ..Config::default()
        };
        config.quota.backoff_ms = 5;
        config
    }

    pub fn engine(&self, workers: usize) -> Engine {
        Engine::new(&self.backend, self.mailbox.clone(), self.config(workers))
    }

    /// Puts an item into the mailbox and a matching `NEW` record into the store.
    pub fn seed_new(&self, id: &str, from: &str) {
        self.mailbox.insert(id, from, "me@example.com", created_at(id));
        self.backend
            .jobs
            .create(&JobRecord::new(id))
            .expect("Failed to create record");
    }

    /// Stores a `FETCHED` record directly, bypassing the mailbox.
    pub fn seed_fetched(&self, id: &str, from: &str) {
        let jobs = &self.backend.jobs;
        jobs.create(&JobRecord::new(id)).expect("Failed to create record");
        let claimed = jobs
            .claim_one(&ClaimQuery::Any(JobStatus::New), JobStatus::Fetching)
            .expect("Failed to claim")
            .expect("Nothing to claim");
        assert_eq!(claimed.id, id, "seed_fetched needs an otherwise empty NEW partition");
        let record = claimed.into_fetched(from.to_string(), "me@example.com".to_string(), created_at(id));
        assert!(jobs.advance(&record).expect("Failed to advance"));
    }

    pub fn status_of(&self, id: &str) -> Option<JobStatus> {
        self.backend
            .jobs
            .find(id)
            .expect("Failed to find record")
            .map(|r| r.status)
    }

    pub fn count(&self, status: JobStatus) -> u64 {
        self.backend
            .jobs
            .count_by_status(status)
            .expect("Failed to count")
    }
}

/// A stable creation time derived from the id.
pub fn created_at(id: &str) -> DateTime<Utc> {
    let offset: i64 = id.bytes().map(i64::from).sum();
    Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap() + chrono::TimeDelta::seconds(offset)
}
