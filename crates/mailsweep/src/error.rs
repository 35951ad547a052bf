use std::path::PathBuf;
use thiserror::Error;

use crate::db::StoreError;
use crate::mailbox::MailboxError;
use crate::quota::QuotaError;

#[derive(Error, Debug)]
pub enum MailsweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Listing error: {0}")]
    Lister(#[from] ListerError),

    #[error("Failed to write report: {0}")]
    Report(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Quota {name} of {cost} exceeds the smallest ceiling {ceiling}")]
    CostAboveCeiling {
        name: String,
        cost: u64,
        ceiling: u64,
    },
}

/// A fatal failure of one fetch or delete worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Quota reservation failed: {0}")]
    Quota(#[from] QuotaError),

    #[error("Mailbox call for '{id}' failed: {source}")]
    Mailbox {
        id: String,
        #[source]
        source: MailboxError,
    },

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker {0} panicked")]
    Panicked(usize),
}

/// A fatal failure while enumerating the mailbox.
#[derive(Error, Debug)]
pub enum ListerError {
    #[error("Job store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Quota reservation failed: {0}")]
    Quota(#[from] QuotaError),

    #[error("Listing page failed: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Failed to spawn inserter: {0}")]
    SpawnFailed(String),

    #[error("Inserter channel closed unexpectedly")]
    ChannelClosed,

    #[error("Inserter thread panicked")]
    Panicked,
}

pub type Result<T> = std::result::Result<T, MailsweepError>;
