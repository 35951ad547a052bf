//! The three run modes: catalog, report and delete.

use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::error::{MailsweepError, Result};
use crate::lister::{ListSummary, Lister};
use crate::mailbox::{normalize_address, Mailbox};
use crate::models::{JobStatus, RequeueSummary};
use crate::quota::QuotaLimiter;
use crate::report::{summarize, write_report};
use crate::store::{Backend, JobStore};
use crate::worker::{DeleteTask, FetchTask, PoolReport, WorkerPool};

/// Result of a catalog run.
#[derive(Debug)]
pub struct CatalogSummary {
    pub listing: ListSummary,
    pub fetch: PoolReport,
}

/// Wires the store, quota limiter and mailbox together for the modes that
/// talk to the remote service.
pub struct Engine {
    jobs: Arc<dyn JobStore>,
    limiter: QuotaLimiter,
    mailbox: Arc<dyn Mailbox>,
    config: Config,
}

impl Engine {
    pub fn new(backend: &Backend, mailbox: Arc<dyn Mailbox>, config: Config) -> Self {
        let limiter = QuotaLimiter::new(Arc::clone(&backend.counters), &config.quota);
        Self {
            jobs: Arc::clone(&backend.jobs),
            limiter,
            mailbox,
            config,
        }
    }

    /// Lists the mailbox into `NEW`, then fetches metadata for every `NEW`
    /// record with the configured number of workers.
    pub fn catalog(&self) -> Result<CatalogSummary> {
        let _span = info_span!("catalog", workers = self.config.workers).entered();
        self.limiter.prune_expired(Utc::now())?;

        let listing = Lister::new(
            Arc::clone(&self.jobs),
            Arc::clone(&self.mailbox),
            self.limiter.clone(),
            self.config.quota.list_cost,
        )
        .run()?;

        let task = FetchTask::new(
            Arc::clone(&self.jobs),
            Arc::clone(&self.mailbox),
            self.limiter.clone(),
            self.config.quota.fetch_cost,
        );
        let fetch =
            WorkerPool::spawn(Arc::new(task), self.config.workers, self.config.error_policy)?
                .wait()?;

        info!(
            "Catalog finished: {} listed, {} fetched, {} still NEW",
            listing.discovered,
            fetch.total(),
            self.jobs.count_by_status(JobStatus::New)?
        );
        Ok(CatalogSummary { listing, fetch })
    }

    /// Removes every fetched item whose sender matches `sender`.
    pub fn delete_from(&self, sender: &str) -> Result<PoolReport> {
        let sender = normalize_address(sender);
        if sender.is_empty() {
            return Err(MailsweepError::Config(
                crate::error::ConfigError::Validation {
                    message: "sender address to delete must not be empty".to_string(),
                },
            ));
        }
        let _span = info_span!("delete", sender = %sender, workers = self.config.workers).entered();
        self.limiter.prune_expired(Utc::now())?;

        let task = DeleteTask::new(
            Arc::clone(&self.jobs),
            Arc::clone(&self.mailbox),
            self.limiter.clone(),
            self.config.quota.delete_cost,
            sender.clone(),
        );
        let report =
            WorkerPool::spawn(Arc::new(task), self.config.workers, self.config.error_policy)?
                .wait()?;

        info!("Deleted {} items from {}", report.total(), sender);
        Ok(report)
    }
}

/// Writes the sender report of the `limit` most frequent senders to `out`
/// and returns the number of rows.
pub fn report<W: Write>(jobs: &dyn JobStore, limit: usize, out: &mut W) -> Result<usize> {
    let rows = summarize(jobs, limit)?;
    write_report(out, &rows).map_err(MailsweepError::Report)?;
    Ok(rows.len())
}

/// Moves records stranded by an interrupted run back to their source
/// partition. Must not run while another process works the same store.
pub fn requeue_stale(jobs: &dyn JobStore) -> Result<RequeueSummary> {
    let summary = jobs.requeue_stale()?;
    if summary.fetching + summary.deleting > 0 {
        warn!(
            "Requeued {} FETCHING and {} DELETING records",
            summary.fetching, summary.deleting
        );
    } else {
        info!("No stranded records");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::mailbox::MemoryMailbox;
    use crate::models::{ClaimQuery, JobRecord};

    fn engine(mailbox: Arc<MemoryMailbox>, workers: usize) -> (Engine, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let backend = Backend::from_shared(db.clone());
        let mut config = Config {
            workers,
            ..Config::default()
        };
        config.quota.backoff_ms = 1;
        (Engine::new(&backend, mailbox, config), db)
    }

    #[test]
    fn test_catalog_then_report_then_delete() {
        let mailbox = Arc::new(MemoryMailbox::new(2));
        for (id, from) in [
            ("t1", "A <a@x.com>"),
            ("t2", "b@x.com"),
            ("t3", "a@x.com"),
            ("t4", "a@x.com"),
        ] {
            mailbox.insert(id, from, "me@x.com", Utc::now());
        }
        let (engine, db) = engine(mailbox.clone(), 2);

        let summary = engine.catalog().unwrap();
        assert_eq!(summary.listing.inserted, 4);
        assert_eq!(summary.fetch.total(), 4);

        let mut out = Vec::new();
        assert_eq!(report(db.as_ref(), 10, &mut out).unwrap(), 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "From,Count\na@x.com,3\nb@x.com,1\n"
        );

        let deleted = engine.delete_from("A@X.com").unwrap();
        assert_eq!(deleted.total(), 3);
        assert_eq!(mailbox.len(), 1);
        assert_eq!(db.count_by_status(JobStatus::Fetched).unwrap(), 1);
    }

    #[test]
    fn test_empty_sender_rejected() {
        let (engine, _db) = engine(Arc::new(MemoryMailbox::new(2)), 1);
        assert!(matches!(
            engine.delete_from("  "),
            Err(MailsweepError::Config(_))
        ));
    }

    #[test]
    fn test_requeue_stale() {
        let db = Database::open_in_memory().unwrap();
        db.create(&JobRecord::new("t1")).unwrap();
        db.claim_one(&ClaimQuery::Any(JobStatus::New), JobStatus::Fetching)
            .unwrap();
        let summary = requeue_stale(&db).unwrap();
        assert_eq!(summary.fetching, 1);
        assert_eq!(db.count_by_status(JobStatus::New).unwrap(), 1);
    }
}
