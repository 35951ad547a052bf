pub mod config;
pub mod db;
pub mod error;
pub mod lister;
pub mod mailbox;
pub mod models;
pub mod quota;
pub mod report;
pub mod runner;
pub mod secrets;
pub mod store;
pub mod worker;

pub use config::{load_config, Config, StoreConfig};
pub use db::{Database, StoreError};
pub use error::{ConfigError, ListerError, MailsweepError, Result, WorkerError};
pub use lister::{ListSummary, Lister};
pub use mailbox::{GmailClient, Mailbox, MailboxError, MemoryMailbox};
pub use models::{ClaimQuery, JobRecord, JobStatus, ReportRow};
pub use quota::{QuotaError, QuotaLimiter};
pub use runner::{CatalogSummary, Engine};
pub use secrets::{resolve_secret, SecretError};
pub use store::{Backend, CounterStore, JobStore};
pub use worker::{ErrorPolicy, PoolReport, WorkerPool};
