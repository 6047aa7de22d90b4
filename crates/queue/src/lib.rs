//! Bounded-concurrency job queue.
//!
//! Runs at most `max_concurrent` jobs at once, admits the rest in
//! submission order, applies per-job timeouts and keeps every job's
//! failure local to that job.

#![warn(missing_docs)]

pub mod config;
pub mod executor;
pub mod manager;
pub mod observer;
pub mod slots;

pub use config::{ConfigError, QueueConfig};
pub use executor::JobExecutor;
pub use manager::QueueManager;
pub use observer::QueueObserver;
pub use slots::SlotPool;

pub use jobqueue_core::{
    JobError, JobFailure, JobHandle, JobId, JobOutcome, JobRecord, JobStatus, QueueError,
    QueueStats, ResponseEnvelope,
};
