//! Fixed-size worker pool over a shared job queue.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        BatchScheduler                         │
//! │                                                               │
//! │   jobs ──► TaskQueue ──claim()──┬──► worker 0 ──┐             │
//! │                                 ├──► worker 1 ──┤             │
//! │                                 └──► worker N ──┤             │
//! │                                                 ▼             │
//! │        spawn_blocking(job.run) under timeout, retry on        │
//! │        transient errors, panics caught as join errors         │
//! │                                                 │             │
//! │                                                 ▼             │
//! │                                           BatchReport         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every job is queued before any worker starts. A worker loops until the
//! queue is drained; a failing job is logged and recorded, never propagated,
//! so it cannot take down the pool or a sibling job.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::JobFailure;
use crate::extract::ExtractionSummary;

use super::job::BatchJob;
use super::queue::TaskQueue;

/// Default initial retry delay.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Default retry delay cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Worker count when none is configured: the machine's available parallelism.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// =============================================================================
// Configuration
// =============================================================================

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first (0 = never retry)
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_backoff: DEFAULT_RETRY_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of concurrent workers (at least 1)
    pub workers: usize,

    /// Deadline for a single attempt; `None` waits indefinitely
    pub job_timeout: Option<Duration>,

    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            job_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub name: String,
    pub outcome: Result<ExtractionSummary, JobFailure>,
    /// Attempts made, including the first
    pub attempts: u32,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Outcome of a whole batch, in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| !j.is_success())
    }

    /// Patches saved across all successful jobs.
    pub fn total_saved(&self) -> u64 {
        self.jobs
            .iter()
            .filter_map(|j| j.outcome.as_ref().ok())
            .map(|s| s.saved)
            .sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

// =============================================================================
// Scheduler
// =============================================================================

type QueuedJob = (usize, Arc<dyn BatchJob>);

/// Runs a list of jobs on a fixed pool of workers.
///
/// # Example
///
/// ```ignore
/// use wsi_patcher::batch::{BatchScheduler, ExtractionJob, SchedulerConfig};
/// use wsi_patcher::extract::ExtractionParams;
///
/// let mut scheduler = BatchScheduler::new(SchedulerConfig::default());
/// scheduler.push(ExtractionJob::new("a.png", "out/a", ExtractionParams::new(256)));
/// scheduler.push(ExtractionJob::new("b.png", "out/b", ExtractionParams::new(256)));
///
/// let report = scheduler.run().await;
/// println!("{} ok, {} failed", report.succeeded(), report.failed());
/// ```
pub struct BatchScheduler {
    config: SchedulerConfig,
    jobs: Vec<Arc<dyn BatchJob>>,
}

impl BatchScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            jobs: Vec::new(),
        }
    }

    pub fn push(&mut self, job: impl BatchJob) {
        self.jobs.push(Arc::new(job));
    }

    pub fn push_shared(&mut self, job: Arc<dyn BatchJob>) {
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every job exactly once (plus retries) and wait for the pool to drain.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn run(self) -> BatchReport {
        let total = self.jobs.len();
        let workers = self.config.workers.max(1);
        let queue: Arc<TaskQueue<QueuedJob>> =
            Arc::new(self.jobs.into_iter().enumerate().collect());
        let config = Arc::new(self.config);

        info!(jobs = total, workers = workers, "Starting batch");

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let config = Arc::clone(&config);
            handles.push(tokio::spawn(async move {
                worker_loop(worker, queue, config).await
            }));
        }

        let mut slots: Vec<Option<JobReport>> = (0..total).map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok(reports) => {
                    for (index, report) in reports {
                        slots[index] = Some(report);
                    }
                }
                Err(e) => error!("Worker task aborted: {}", e),
            }
        }

        let report = BatchReport {
            jobs: slots.into_iter().flatten().collect(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            saved = report.total_saved(),
            "Batch finished"
        );
        report
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<TaskQueue<QueuedJob>>,
    config: Arc<SchedulerConfig>,
) -> Vec<(usize, JobReport)> {
    let mut done = Vec::new();

    while let Some((index, job)) = queue.claim().await {
        info!(worker = worker, job = job.name(), "Job started");
        let report = run_job(job, &config).await;

        match &report.outcome {
            Ok(summary) => info!(
                worker = worker,
                job = %report.name,
                saved = summary.saved,
                candidates = summary.candidates,
                "Job completed in {:.1?}",
                report.elapsed
            ),
            Err(failure) => error!(
                worker = worker,
                job = %report.name,
                attempts = report.attempts,
                "Job failed: {}",
                failure
            ),
        }
        done.push((index, report));
    }

    done
}

async fn run_job(job: Arc<dyn BatchJob>, config: &SchedulerConfig) -> JobReport {
    let started = Instant::now();
    let name = job.name().to_string();
    let mut attempts = 0u32;

    let outcome = loop {
        attempts += 1;
        match run_attempt(Arc::clone(&job), config.job_timeout).await {
            Ok(summary) => break Ok(summary),
            Err(JobFailure::Failed(e)) if e.is_retryable() => {
                if attempts > config.retry.max_retries {
                    break Err(if attempts > 1 {
                        JobFailure::RetriesExhausted { attempts, last: e }
                    } else {
                        JobFailure::Failed(e)
                    });
                }
                let delay = config.retry.backoff(attempts - 1);
                warn!(
                    job = %name,
                    attempt = attempts,
                    "Transient failure, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(failure) => break Err(failure),
        }
    };

    JobReport {
        name,
        outcome,
        attempts,
        elapsed: started.elapsed(),
    }
}

async fn run_attempt(
    job: Arc<dyn BatchJob>,
    deadline: Option<Duration>,
) -> Result<ExtractionSummary, JobFailure> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let handle = tokio::task::spawn_blocking(move || job.run(flag));

    let joined = match deadline {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // The blocking thread keeps running until its next tile boundary.
                cancel.store(true, Ordering::Relaxed);
                return Err(JobFailure::TimedOut { after: limit });
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result.map_err(JobFailure::Failed),
        Err(e) if e.is_panic() => Err(JobFailure::Panicked {
            message: panic_message(e.into_panic()),
        }),
        Err(e) => Err(JobFailure::Panicked {
            message: e.to_string(),
        }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
