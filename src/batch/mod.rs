//! Parallel batch extraction.
//!
//! [`BatchScheduler`] fans a list of [`BatchJob`]s out over a fixed pool of
//! workers sharing one [`TaskQueue`]. Extraction itself is synchronous, so
//! every attempt runs on Tokio's blocking pool; the async side only
//! coordinates claims, deadlines and retry delays.
//!
//! # Failure isolation
//!
//! A job that errors, times out or panics is recorded as a [`JobFailure`]
//! in the [`BatchReport`] and logged with its name. Workers keep draining
//! the queue, so `N` failures out of `M` jobs still leave `M - N` jobs with
//! their output written.
//!
//! [`JobFailure`]: crate::error::JobFailure

mod job;
mod queue;
mod scheduler;

pub use job::{BatchJob, ExtractionJob, MaskingOptions};
pub use queue::TaskQueue;
pub use scheduler::{
    default_workers, BatchReport, BatchScheduler, JobReport, RetryPolicy, SchedulerConfig,
    DEFAULT_MAX_BACKOFF, DEFAULT_RETRY_BACKOFF,
};
