//! Job records, quota scopes and report rows shared by every backend.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Address stored when a fetched item carries no usable `From`/`To` header.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Lifecycle state of a job record. Each status is one partition of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,
    Fetching,
    Fetched,
    Deleting,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::New,
        JobStatus::Fetching,
        JobStatus::Fetched,
        JobStatus::Deleting,
    ];

    /// Persisted name of the partition.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::Fetching => "FETCHING",
            JobStatus::Fetched => "FETCHED",
            JobStatus::Deleting => "DELETING",
        }
    }

    /// The in-progress partition a record must still occupy for `advance`
    /// into `self` to apply.
    pub fn in_progress_predecessor(self) -> Option<JobStatus> {
        match self {
            JobStatus::Fetched => Some(JobStatus::Fetching),
            _ => None,
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(self, JobStatus::Fetching | JobStatus::Deleting)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a persisted status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(JobStatus::New),
            "FETCHING" => Ok(JobStatus::Fetching),
            "FETCHED" => Ok(JobStatus::Fetched),
            "DELETING" => Ok(JobStatus::Deleting),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One remote mailbox item and its processing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Remote item identifier.
    pub id: String,
    pub status: JobStatus,
    /// Normalized sender address; empty until fetched.
    pub from: String,
    /// Normalized recipient address; empty until fetched.
    pub to: String,
    /// Original creation time of the item; `None` until fetched.
    pub created: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a pristine `NEW` record for a freshly listed item.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::New,
            from: String::new(),
            to: String::new(),
            created: None,
        }
    }

    /// Populates the write-once fields and moves the record to `FETCHED`.
    ///
    /// Empty addresses are replaced by [`UNKNOWN_ADDRESS`].
    pub fn into_fetched(mut self, from: String, to: String, created: DateTime<Utc>) -> Self {
        self.from = non_empty_or_unknown(from);
        self.to = non_empty_or_unknown(to);
        self.created = Some(created);
        self.status = JobStatus::Fetched;
        self
    }

    /// True when the record has none of the fetched fields set.
    pub fn is_pristine(&self) -> bool {
        self.from.is_empty() && self.to.is_empty() && self.created.is_none()
    }

    /// True when every fetched field is set.
    pub fn is_populated(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty() && self.created.is_some()
    }
}

fn non_empty_or_unknown(address: String) -> String {
    if address.is_empty() {
        UNKNOWN_ADDRESS.to_string()
    } else {
        address
    }
}

/// Which record a claim should pick from its source partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimQuery {
    /// Any record in the source partition.
    Any(JobStatus),
    /// A record in the source partition whose `from` equals `sender`.
    BySender { source: JobStatus, sender: String },
}

impl ClaimQuery {
    pub fn source(&self) -> JobStatus {
        match self {
            ClaimQuery::Any(source) => *source,
            ClaimQuery::BySender { source, .. } => *source,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            ClaimQuery::Any(_) => None,
            ClaimQuery::BySender { sender, .. } => Some(sender),
        }
    }
}

/// Window a quota counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaScope {
    /// Daily ceiling shared by every caller.
    Global,
    /// Per-second ceiling of this caller.
    Caller,
}

impl QuotaScope {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaScope::Global => "GLOBAL",
            QuotaScope::Caller => "CALLER",
        }
    }
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conditional increment of one quota counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub scope: QuotaScope,
    pub bucket_start: DateTime<Utc>,
    pub cost: u64,
    pub ceiling: u64,
}

/// Sender and number of fetched items, as shown in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub from: String,
    pub count: u64,
}

impl ReportRow {
    pub fn new(from: impl Into<String>, count: u64) -> Self {
        Self {
            from: from.into(),
            count,
        }
    }
}

/// Number of records moved back by a stale-record reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequeueSummary {
    /// `FETCHING` records returned to `NEW`.
    pub fetching: u64,
    /// `DELETING` records returned to `FETCHED`.
    pub deleting: u64,
}
