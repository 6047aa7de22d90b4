//! Error types for job outcomes and queue operations.

use crate::id::JobId;
use crate::outcome::JobFailure;
use std::time::Duration;

/// Terminal failure of a single job.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    /// The executor produced a failure outcome
    #[error("executor failed: {0}")]
    ExecutorFailure(JobFailure),

    /// The job did not settle within its deadline
    #[error("job timed out after {after:?}")]
    Timeout {
        /// The timeout that expired
        after: Duration,
    },
}

/// Errors returned by queue operations.
///
/// None of these affect queue state or other jobs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The handle was not issued by this queue, or its result was already released
    #[error("unknown job handle: {0}")]
    UnknownHandle(JobId),

    /// The pending queue is at its configured depth
    #[error("queue full: {limit} jobs already pending")]
    QueueFull {
        /// Configured pending-depth bound
        limit: usize,
    },

    /// Another caller is already awaiting this job
    #[error("result of {0} is already being awaited")]
    ResultClaimed(JobId),

    /// The job task ended without reporting an outcome
    #[error("job {0} was abandoned before reporting an outcome")]
    Abandoned(JobId),
}

/// Result alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
