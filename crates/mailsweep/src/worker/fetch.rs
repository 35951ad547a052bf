use std::sync::Arc;

use log::{debug, warn};

use super::{Step, Task};
use crate::error::WorkerError;
use crate::mailbox::{normalize_address, MailItem, Mailbox};
use crate::models::{ClaimQuery, JobRecord, JobStatus};
use crate::quota::QuotaLimiter;
use crate::store::JobStore;

/// Moves records `NEW -> FETCHING -> FETCHED`, filling in sender,
/// recipient and creation time from the item's metadata.
pub struct FetchTask {
    jobs: Arc<dyn JobStore>,
    mailbox: Arc<dyn Mailbox>,
    limiter: QuotaLimiter,
    cost: u64,
}

impl FetchTask {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        mailbox: Arc<dyn Mailbox>,
        limiter: QuotaLimiter,
        cost: u64,
    ) -> Self {
        Self {
            jobs,
            mailbox,
            limiter,
            cost,
        }
    }
}

/// Builds the `FETCHED` form of a claimed record.
pub fn populate(record: JobRecord, item: &MailItem) -> JobRecord {
    let from = item.header("From").map(normalize_address).unwrap_or_default();
    let to = item.header("To").map(normalize_address).unwrap_or_default();
    record.into_fetched(from, to, item.internal_date)
}

impl Task for FetchTask {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn step(&self) -> Result<Step, WorkerError> {
        self.limiter.wait_for_reservation(self.cost)?;

        let query = ClaimQuery::Any(JobStatus::New);
        let Some(record) = self.jobs.claim_one(&query, JobStatus::Fetching)? else {
            return Ok(Step::Drained);
        };

        let item = self
            .mailbox
            .get_item(&record.id)
            .map_err(|source| WorkerError::Mailbox {
                id: record.id.clone(),
                source,
            })?;

        let fetched = populate(record, &item);
        if self.jobs.advance(&fetched)? {
            debug!("Fetched {} from {}", fetched.id, fetched.from);
        } else {
            warn!("Record {} left FETCHING before it was advanced", fetched.id);
        }
        Ok(Step::Processed)
    }
}
