//! Bounded, origin-paced execution of preprocessing jobs.
//!
//! Every job is spawned as a task that first claims one of the worker
//! permits, then the gate for its origin. Holding the gate makes the job
//! the origin's only in-flight request; before dispatching it sleeps off
//! whatever remains of the minimum interval since the previous dispatch
//! to that origin finished. Jobs with no derivable origin share one gate.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use auxmark_model::{Job, OriginKey};
use futures::future::join_all;
use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, warn};

use crate::contract::Detector;

/// Pacing state for one origin. The mutex guard is the single-flight
/// primitive; the timestamp inside is when the previous dispatch to this
/// origin returned.
#[derive(Debug, Default)]
struct OriginGate {
    last_dispatch: Mutex<Option<Instant>>,
}

/// Identity kept outside the spawned task so a failure can name its job
/// even when the task panicked.
#[derive(Debug)]
struct JobContext {
    document: PathBuf,
    line_index: usize,
    detector: String,
}

/// Outcome tally of one scheduler drain.
#[derive(Debug, Default)]
pub struct SchedulerReport {
    pub succeeded: usize,
    pub failed: usize,
    /// One human-readable report per failed job.
    pub failures: Vec<String>,
}

/// Runs preprocessing jobs on a bounded worker pool while keeping
/// same-origin jobs mutually exclusive and paced.
///
/// [`finish`](Scheduler::finish) consumes the scheduler, so submitting
/// after shutdown is unrepresentable.
#[derive(Debug)]
pub struct Scheduler {
    permits: Arc<Semaphore>,
    origins: Arc<Mutex<HashMap<OriginKey, Arc<OriginGate>>>>,
    min_interval: Duration,
    handles: Vec<(JobContext, JoinHandle<bool>)>,
}

impl Scheduler {
    pub fn new(workers: usize, min_interval: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            origins: Arc::new(Mutex::new(HashMap::new())),
            min_interval,
            handles: Vec::new(),
        }
    }

    /// Submit one job for execution on `detector`.
    ///
    /// The spawned task claims a worker permit, then the origin gate,
    /// sleeps off the rest of the pacing interval, runs `preprocess`, and
    /// stamps the gate after it returns. A worker may therefore sit
    /// blocked on a busy origin while holding its permit; that mirrors
    /// the pool semantics the pacing guarantees are defined against.
    pub fn submit(&mut self, job: Job, detector: Arc<dyn Detector>) {
        let context = JobContext {
            document: job.document.clone(),
            line_index: job.line_index,
            detector: job.detector.clone(),
        };
        let origin = OriginKey::from_metadata(&job.metadata);
        let permits = Arc::clone(&self.permits);
        let origins = Arc::clone(&self.origins);
        let min_interval = self.min_interval;

        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                // Semaphore closed out from under us; count the job as
                // failed rather than panicking inside the pool.
                return false;
            };

            let gate = {
                let mut origins = origins.lock().await;
                Arc::clone(origins.entry(origin.clone()).or_default())
            };

            let mut last_dispatch = gate.last_dispatch.lock().await;
            if let Some(previous) = *last_dispatch {
                let since = previous.elapsed();
                if since < min_interval {
                    let wait = min_interval - since;
                    debug!(
                        target: "auxmark::schedule",
                        origin = %origin,
                        wait_ms = wait.as_millis() as u64,
                        "pacing wait before dispatch"
                    );
                    sleep(wait).await;
                }
            }

            debug!(
                target: "auxmark::schedule",
                origin = %origin,
                document = %job.document.display(),
                line = job.line_index + 1,
                detector = %job.detector,
                "dispatching job"
            );
            let ok = detector.preprocess(&job).await;
            *last_dispatch = Some(Instant::now());
            ok
        });

        self.handles.push((context, handle));
    }

    /// Number of jobs submitted so far.
    pub fn submitted(&self) -> usize {
        self.handles.len()
    }

    /// Await every submitted job and fold outcomes into a report.
    pub async fn finish(self) -> SchedulerReport {
        let (contexts, handles): (Vec<_>, Vec<_>) =
            self.handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut report = SchedulerReport::default();
        for (context, result) in contexts.into_iter().zip(results) {
            match result {
                Ok(true) => report.succeeded += 1,
                Ok(false) => {
                    report.failed += 1;
                    report.failures.push(format!(
                        "{} failed for {} line {}",
                        context.detector,
                        context.document.display(),
                        context.line_index + 1
                    ));
                }
                Err(err) => {
                    report.failed += 1;
                    let reason = if err.is_panic() {
                        "panicked"
                    } else {
                        "was cancelled"
                    };
                    warn!(
                        target: "auxmark::schedule",
                        document = %context.document.display(),
                        line = context.line_index + 1,
                        detector = %context.detector,
                        "preprocess task {reason}"
                    );
                    report.failures.push(format!(
                        "{} {reason} for {} line {}",
                        context.detector,
                        context.document.display(),
                        context.line_index + 1
                    ));
                }
            }
        }
        report
    }
}
