//! Storage contract shared by the embedded and the networked backend.
//!
//! Both backends guarantee the same observable semantics: ids are unique
//! across all partitions, `claim_one` hands every record to at most one
//! caller, and `try_charge` applies all of its charges or none. Those
//! guarantees come from the backend's own transactions, so they also hold
//! when several processes share one store.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::db::postgres::PostgresStore;
use crate::db::{Database, StoreError};
use crate::models::{
    Charge, ClaimQuery, JobRecord, JobStatus, QuotaScope, ReportRow, RequeueSummary,
};

/// Persistent queue of job records partitioned by status.
pub trait JobStore: Send + Sync {
    /// Inserts a pristine `NEW` record. Fails with [`StoreError::Duplicate`]
    /// if the id exists in any partition.
    fn create(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Atomically moves one record matching `query` into `target` and
    /// returns it. `Ok(None)` means the source partition has nothing left
    /// that matches.
    fn claim_one(
        &self,
        query: &ClaimQuery,
        target: JobStatus,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Writes the record's fields into the partition named by its status,
    /// provided it still sits in that status's in-progress predecessor.
    /// Returns `false` when the record was no longer there.
    fn advance(&self, record: &JobRecord) -> Result<bool, StoreError>;

    /// Deletes the record from `FETCHED`/`DELETING`. Idempotent.
    fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// Sender counts over `FETCHED`, most frequent first, ties by sender.
    fn summarize(&self, limit: usize) -> Result<Vec<ReportRow>, StoreError>;

    fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError>;

    fn find(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Moves records stranded in an in-progress partition back to their
    /// source partition. Only safe while no worker is running.
    fn requeue_stale(&self) -> Result<RequeueSummary, StoreError>;
}

/// Atomic counter storage used by the quota limiter.
pub trait CounterStore: Send + Sync {
    /// Adds every charge to its counter if, for all of them,
    /// `count + cost <= ceiling`. Otherwise nothing is written and
    /// `Ok(false)` is returned.
    fn try_charge(&self, charges: &[Charge]) -> Result<bool, StoreError>;

    /// Current count of a counter, zero when it does not exist.
    fn counter(&self, scope: QuotaScope, bucket_start: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Deletes counters of `scope` whose bucket started before `before`.
    fn prune(&self, scope: QuotaScope, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// The two views of one opened backend.
#[derive(Clone)]
pub struct Backend {
    pub jobs: Arc<dyn JobStore>,
    pub counters: Arc<dyn CounterStore>,
}

impl Backend {
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: JobStore + CounterStore + 'static,
    {
        Self {
            jobs: store.clone(),
            counters: store,
        }
    }
}

/// Opens the backend selected by configuration.
pub fn open(config: &StoreConfig) -> Result<Backend, StoreError> {
    match config {
        StoreConfig::Sqlite { path } => {
            let db = Database::open(path)?;
            Ok(Backend::from_shared(Arc::new(db)))
        }
        StoreConfig::Postgres {
            url,
            max_connections,
        } => {
            let store = PostgresStore::connect(url, *max_connections)?;
            Ok(Backend::from_shared(Arc::new(store)))
        }
    }
}

/// Checks that `record` may be inserted by `create`.
pub(crate) fn validate_new(record: &JobRecord) -> Result<(), StoreError> {
    if record.id.is_empty() {
        return Err(StoreError::invalid(&record.id, "empty id"));
    }
    if record.status != JobStatus::New || !record.is_pristine() {
        return Err(StoreError::invalid(
            &record.id,
            "only pristine NEW records can be created",
        ));
    }
    Ok(())
}

/// Checks that `record` may be written by `advance` and returns the
/// partition it must currently occupy.
pub(crate) fn validate_advance(record: &JobRecord) -> Result<JobStatus, StoreError> {
    let predecessor = record.status.in_progress_predecessor().ok_or_else(|| {
        StoreError::invalid(
            &record.id,
            format!("cannot advance into {}", record.status),
        )
    })?;
    if record.status == JobStatus::Fetched && !record.is_populated() {
        return Err(StoreError::invalid(
            &record.id,
            "FETCHED records need from, to and created",
        ));
    }
    Ok(predecessor)
}
