use std::sync::Arc;

use log::{debug, info};

use super::{Step, Task};
use crate::error::WorkerError;
use crate::mailbox::{Mailbox, RemoveOutcome};
use crate::models::{ClaimQuery, JobStatus};
use crate::quota::QuotaLimiter;
use crate::store::JobStore;

/// Removes every fetched item of one sender from the mailbox, then from
/// the store (`FETCHED -> DELETING -> removed`).
pub struct DeleteTask {
    jobs: Arc<dyn JobStore>,
    mailbox: Arc<dyn Mailbox>,
    limiter: QuotaLimiter,
    cost: u64,
    query: ClaimQuery,
}

impl DeleteTask {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        mailbox: Arc<dyn Mailbox>,
        limiter: QuotaLimiter,
        cost: u64,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            mailbox,
            limiter,
            cost,
            query: ClaimQuery::BySender {
                source: JobStatus::Fetched,
                sender: sender.into(),
            },
        }
    }
}

impl Task for DeleteTask {
    fn name(&self) -> &'static str {
        "delete"
    }

    fn step(&self) -> Result<Step, WorkerError> {
        self.limiter.wait_for_reservation(self.cost)?;

        let Some(record) = self.jobs.claim_one(&self.query, JobStatus::Deleting)? else {
            return Ok(Step::Drained);
        };

        let outcome = self
            .mailbox
            .remove_item(&record.id)
            .map_err(|source| WorkerError::Mailbox {
                id: record.id.clone(),
                source,
            })?;

        match outcome {
            RemoveOutcome::Removed => debug!("Removed {} from the mailbox", record.id),
            RemoveOutcome::NotFound => info!("{} was already gone from the mailbox", record.id),
        }

        self.jobs.remove(&record.id)?;
        Ok(Step::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaConfig;
    use crate::db::Database;
    use crate::mailbox::MemoryMailbox;
    use crate::models::JobRecord;
    use chrono::Utc;

    fn fetched(db: &Database, id: &str, from: &str) {
        db.create(&JobRecord::new(id)).unwrap();
        db.claim_one(&ClaimQuery::Any(JobStatus::New), JobStatus::Fetching)
            .unwrap()
            .unwrap();
        let record = JobRecord::new(id).into_fetched(from.into(), "me@x.com".into(), Utc::now());
        assert!(db.advance(&record).unwrap());
    }

    fn task(db: &Arc<Database>, mailbox: &Arc<MemoryMailbox>, sender: &str) -> DeleteTask {
        let config = QuotaConfig {
            backoff_ms: 1,
            ..QuotaConfig::default()
        };
        DeleteTask::new(
            db.clone(),
            mailbox.clone(),
            QuotaLimiter::new(db.clone(), &config),
            10,
            sender,
        )
    }

    #[test]
    fn test_deletes_only_matching_sender() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mailbox = Arc::new(MemoryMailbox::new(10));
        for (id, from) in [("t1", "a@x.com"), ("t2", "b@x.com"), ("t3", "a@x.com")] {
            mailbox.insert(id, from, "me@x.com", Utc::now());
            fetched(&db, id, from);
        }

        let task = task(&db, &mailbox, "a@x.com");
        while task.step().unwrap() == Step::Processed {}

        assert_eq!(mailbox.removed(), vec!["t1", "t3"]);
        assert!(db.find("t1").unwrap().is_none());
        assert!(db.find("t3").unwrap().is_none());
        assert_eq!(db.find("t2").unwrap().unwrap().status, JobStatus::Fetched);
    }

    #[test]
    fn test_item_already_gone_counts_as_done() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mailbox = Arc::new(MemoryMailbox::new(10));
        fetched(&db, "t1", "a@x.com");

        let task = task(&db, &mailbox, "a@x.com");
        assert_eq!(task.step().unwrap(), Step::Processed);
        assert!(db.find("t1").unwrap().is_none());
    }

    #[test]
    fn test_remove_failure_leaves_record_deleting() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mailbox = Arc::new(MemoryMailbox::new(10));
        mailbox.insert("t1", "a@x.com", "me@x.com", Utc::now());
        mailbox.fail_remove("t1");
        fetched(&db, "t1", "a@x.com");

        let task = task(&db, &mailbox, "a@x.com");
        assert!(task.step().is_err());
        assert_eq!(db.find("t1").unwrap().unwrap().status, JobStatus::Deleting);
    }
}
