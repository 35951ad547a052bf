//! Enumerates the mailbox into `NEW` job records.
//!
//! Pages are fetched on the calling thread, one quota reservation per
//! page. Identifiers are handed over a bounded channel to a few inserter
//! threads so that store round-trips overlap with the next page request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, info_span};

use crate::error::ListerError;
use crate::mailbox::Mailbox;
use crate::models::JobRecord;
use crate::quota::QuotaLimiter;
use crate::store::JobStore;

/// Default number of inserter threads.
pub const DEFAULT_INSERTERS: usize = 4;

const CHANNEL_CAPACITY: usize = 1_024;

/// Totals of one listing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListSummary {
    pub pages: u64,
    pub discovered: u64,
    pub inserted: u64,
    pub duplicates: u64,
}

#[derive(Default)]
struct Counters {
    inserted: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicBool,
}

pub struct Lister {
    jobs: Arc<dyn JobStore>,
    mailbox: Arc<dyn Mailbox>,
    limiter: QuotaLimiter,
    cost: u64,
    inserters: usize,
}

impl Lister {
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
            inserters: DEFAULT_INSERTERS,
        }
    }

    pub fn with_inserters(mut self, inserters: usize) -> Self {
        self.inserters = inserters.max(1);
        self
    }

    /// Walks every page and returns once all inserts have completed.
    pub fn run(&self) -> Result<ListSummary, ListerError> {
        let _span = info_span!("lister", inserters = self.inserters).entered();
        let counters = Counters::default();
        let (tx, rx) = bounded::<String>(CHANNEL_CAPACITY);

        let (walked, inserter_error) = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.inserters);
            let mut spawn_error = None;

            for inserter_id in 0..self.inserters {
                let rx = rx.clone();
                let counters = &counters;
                let spawned = thread::Builder::new()
                    .name(format!("inserter-{inserter_id}"))
                    .spawn_scoped(scope, move || self.insert_all(rx, counters));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        spawn_error = Some(ListerError::SpawnFailed(e.to_string()));
                        break;
                    }
                }
            }
            drop(rx);

            let walked = match spawn_error {
                Some(e) => Err(e),
                None => self.walk_pages(&tx, &counters),
            };
            // Closing the channel lets the inserters finish the backlog and exit.
            drop(tx);

            let mut inserter_error = None;
            for handle in handles {
                let result = handle.join().unwrap_or(Err(ListerError::Panicked));
                if let Err(e) = result {
                    inserter_error.get_or_insert(e);
                }
            }
            (walked, inserter_error)
        });

        if let Some(e) = inserter_error {
            return Err(e);
        }
        let mut summary = walked?;
        summary.inserted = counters.inserted.load(Ordering::SeqCst);
        summary.duplicates = counters.duplicates.load(Ordering::SeqCst);

        info!(
            "Listing finished: {} pages, {} discovered, {} new, {} already known",
            summary.pages, summary.discovered, summary.inserted, summary.duplicates
        );
        Ok(summary)
    }

    fn walk_pages(
        &self,
        tx: &Sender<String>,
        counters: &Counters,
    ) -> Result<ListSummary, ListerError> {
        let mut summary = ListSummary::default();
        let mut page_token: Option<String> = None;

        loop {
            if counters.failed.load(Ordering::SeqCst) {
                // The inserter's own error is reported by the caller.
                break;
            }

            self.limiter.wait_for_reservation(self.cost)?;
            let page = self.mailbox.list_identifiers(page_token.as_deref())?;
            summary.pages += 1;
            summary.discovered += page.ids.len() as u64;
            debug!("Page {} carried {} ids", summary.pages, page.ids.len());

            for id in page.ids {
                if tx.send(id).is_err() {
                    if counters.failed.load(Ordering::SeqCst) {
                        return Ok(summary);
                    }
                    return Err(ListerError::ChannelClosed);
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(summary)
    }

    fn insert_all(&self, rx: Receiver<String>, counters: &Counters) -> Result<(), ListerError> {
        for id in rx.iter() {
            match self.jobs.create(&JobRecord::new(id)) {
                Ok(()) => {
                    counters.inserted.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) if e.is_duplicate() => {
                    counters.duplicates.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    counters.failed.store(true, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}
