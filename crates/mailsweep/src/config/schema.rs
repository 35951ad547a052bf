use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::worker::ErrorPolicy;

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const DEFAULT_TOKEN_ENV_VAR: &str = "GMAIL_ACCESS_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_report_limit")]
    pub report_limit: usize,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub requeue_stale: bool,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

fn default_workers() -> usize {
    1
}

fn default_report_limit() -> usize {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            workers: default_workers(),
            report_limit: default_report_limit(),
            error_policy: ErrorPolicy::default(),
            requeue_stale: false,
            quota: QuotaConfig::default(),
            mailbox: MailboxConfig::default(),
        }
    }
}

/// Which backend holds jobs and quota counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

pub fn default_sqlite_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("mailsweep.db"))
}

pub fn default_max_connections() -> u32 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

/// Ceilings of the two quota windows and the cost of each remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_daily_ceiling")]
    pub daily_ceiling: u64,
    #[serde(default = "default_per_second_ceiling")]
    pub per_second_ceiling: u64,
    #[serde(default = "default_cost")]
    pub list_cost: u64,
    #[serde(default = "default_cost")]
    pub fetch_cost: u64,
    #[serde(default = "default_cost")]
    pub delete_cost: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_daily_ceiling() -> u64 {
    1_000_000_000
}

fn default_per_second_ceiling() -> u64 {
    150
}

fn default_cost() -> u64 {
    10
}

fn default_backoff_ms() -> u64 {
    1_000
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_ceiling: default_daily_ceiling(),
            per_second_ceiling: default_per_second_ceiling(),
            list_cost: default_cost(),
            fetch_cost: default_cost(),
            delete_cost: default_cost(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default = "default_token_env_var")]
    pub token_env_var: Option<String>,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_user() -> String {
    "me".to_string()
}

fn default_token_env_var() -> Option<String> {
    Some(DEFAULT_TOKEN_ENV_VAR.to_string())
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            user: default_user(),
            token: None,
            token_file: None,
            token_env_var: default_token_env_var(),
        }
    }
}
