//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from job store and counter store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record with this id already exists in some partition.
    /// Expected during listing; callers treat it as success.
    #[error("Job '{0}' already exists")]
    Duplicate(String),

    /// The record handed to the store violates the partition invariants.
    #[error("Invalid record '{id}': {reason}")]
    InvalidRecord { id: String, reason: String },

    /// A persisted value could not be decoded.
    #[error("Corrupt row: {0}")]
    Decode(String),

    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error from SeaORM.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sea_orm::DbErr),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The runtime driving the PostgreSQL pool could not be started.
    #[error("Failed to start database runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }

    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidRecord {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
