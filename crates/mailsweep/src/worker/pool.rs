use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use super::{Step, Task};
use crate::error::WorkerError;

/// What the pool does when one worker fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop every worker before its next claim and return the first error.
    #[default]
    Abort,
    /// Stop only the failing worker; the others run until drained.
    Continue,
}

/// A worker that stopped with an error.
#[derive(Debug)]
pub struct WorkerFailure {
    pub worker_id: usize,
    pub error: WorkerError,
}

/// Outcome of a finished pool.
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Records handled by each worker, indexed by worker id.
    pub processed: Vec<u64>,
    /// Workers that stopped early. Always empty under [`ErrorPolicy::Abort`].
    pub failures: Vec<WorkerFailure>,
}

impl PoolReport {
    pub fn total(&self) -> u64 {
        self.processed.iter().sum()
    }
}

struct WorkerOutcome {
    processed: u64,
    error: Option<WorkerError>,
}

/// Runs one [`Task`] on a fixed number of threads until each of them has
/// seen the queue drained.
pub struct WorkerPool {
    name: &'static str,
    workers: Vec<JoinHandle<WorkerOutcome>>,
    abort: Arc<AtomicBool>,
    policy: ErrorPolicy,
}

impl WorkerPool {
    /// Starts `worker_count` threads running `task`.
    pub fn spawn(
        task: Arc<dyn Task>,
        worker_count: usize,
        policy: ErrorPolicy,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let name = task.name();
        let abort = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let task = Arc::clone(&task);
            let abort_flag = Arc::clone(&abort);

            let spawned = thread::Builder::new()
                .name(format!("{name}-worker-{worker_id}"))
                .spawn(move || run_worker(worker_id, task, abort_flag, policy));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Let the threads already running stop at their next claim.
                    abort.store(true, Ordering::SeqCst);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} {} workers", worker_count, name);

        Ok(Self {
            name,
            workers,
            abort,
            policy,
        })
    }

    /// Asks every worker to stop before its next claim.
    pub fn shutdown(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Joins every worker.
    ///
    /// Under [`ErrorPolicy::Abort`] the first failure is returned as the
    /// error, otherwise failures are collected in the report.
    pub fn wait(self) -> Result<PoolReport, WorkerError> {
        let mut report = PoolReport::default();

        for (worker_id, handle) in self.workers.into_iter().enumerate() {
            let outcome = handle.join().unwrap_or_else(|_| {
                error!("Worker {} panicked", worker_id);
                self.abort.store(true, Ordering::SeqCst);
                WorkerOutcome {
                    processed: 0,
                    error: Some(WorkerError::Panicked(worker_id)),
                }
            });
            report.processed.push(outcome.processed);
            if let Some(error) = outcome.error {
                report.failures.push(WorkerFailure { worker_id, error });
            }
        }

        info!(
            "{} workers finished: {} processed, {} failed",
            self.name,
            report.total(),
            report.failures.len()
        );

        if self.policy == ErrorPolicy::Abort && !report.failures.is_empty() {
            let first = report.failures.remove(0);
            return Err(first.error);
        }
        Ok(report)
    }
}

fn run_worker(
    worker_id: usize,
    task: Arc<dyn Task>,
    abort: Arc<AtomicBool>,
    policy: ErrorPolicy,
) -> WorkerOutcome {
    let _span = info_span!("worker", task = task.name(), id = worker_id).entered();
    debug!("Worker {} started", worker_id);

    let mut processed = 0;
    loop {
        if abort.load(Ordering::SeqCst) {
            debug!("Worker {} received abort signal", worker_id);
            break;
        }

        match task.step() {
            Ok(Step::Processed) => processed += 1,
            Ok(Step::Drained) => {
                debug!("Worker {} found the queue drained", worker_id);
                break;
            }
            Err(e) => {
                error!("Worker {} failed: {}", worker_id, e);
                if policy == ErrorPolicy::Abort {
                    abort.store(true, Ordering::SeqCst);
                } else {
                    warn!("Worker {} stopped, others continue", worker_id);
                }
                return WorkerOutcome {
                    processed,
                    error: Some(e),
                };
            }
        }
    }

    debug!("Worker {} stopped after {} records", worker_id, processed);
    WorkerOutcome {
        processed,
        error: None,
    }
}
