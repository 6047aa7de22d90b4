//! Job lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job status
///
/// ```text
/// Pending → Running → { Succeeded | Failed | TimedOut }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a free execution slot
    Pending,
    /// Holding a slot, executor in flight
    Running,
    /// Executor produced a value
    Succeeded,
    /// Executor produced a failure or panicked
    Failed,
    /// Deadline expired before the executor settled
    TimedOut,
}

impl JobStatus {
    /// Whether no further transition can happen from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut)
    }

    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::TimedOut => write!(f, "timed-out"),
        }
    }
}
