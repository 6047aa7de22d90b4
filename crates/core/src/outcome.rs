//! Job outcomes and failure descriptors.

use crate::error::JobError;
use crate::id::JobId;
use crate::status::JobStatus;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failure codes attached to [`JobFailure`].
pub mod failure_codes {
    /// Executor returned an error
    pub const EXECUTOR_FAILURE: i32 = -32000;
    /// Executor panicked
    pub const EXECUTOR_PANIC: i32 = -32001;
    /// Job did not settle before its deadline
    pub const JOB_TIMEOUT: i32 = -32003;
}

/// Failure descriptor produced by an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Whether submitting the same work again may succeed
    pub retryable: bool,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JobFailure {
    /// Create a non-retryable executor failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: failure_codes::EXECUTOR_FAILURE,
            message: message.into(),
            retryable: false,
            data: None,
        }
    }

    /// Failure recorded when the executor panicked.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            code: failure_codes::EXECUTOR_PANIC,
            message: message.into(),
            retryable: false,
            data: None,
        }
    }

    /// Set the error code.
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    /// Mark as retryable.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Attach extra data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<anyhow::Error> for JobFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

impl From<String> for JobFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    /// Executor produced a value
    Succeeded(T),
    /// Executor failed or panicked
    Failed(JobFailure),
    /// Deadline expired first
    TimedOut {
        /// The timeout that expired
        after: Duration,
    },
}

impl<T> JobOutcome<T> {
    /// Terminal status matching this outcome.
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Succeeded(_) => JobStatus::Succeeded,
            JobOutcome::Failed(_) => JobStatus::Failed,
            JobOutcome::TimedOut { .. } => JobStatus::TimedOut,
        }
    }

    /// Whether the executor produced a value in time.
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }

    /// Convert into a `Result`, separating executor failures from timeouts.
    pub fn into_result(self) -> Result<T, JobError> {
        match self {
            JobOutcome::Succeeded(value) => Ok(value),
            JobOutcome::Failed(failure) => Err(JobError::ExecutorFailure(failure)),
            JobOutcome::TimedOut { after } => Err(JobError::Timeout { after }),
        }
    }
}

impl<T> From<Result<T, JobFailure>> for JobOutcome<T> {
    fn from(result: Result<T, JobFailure>) -> Self {
        match result {
            Ok(value) => JobOutcome::Succeeded(value),
            Err(failure) => JobOutcome::Failed(failure),
        }
    }
}

/// Observable snapshot of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID
    pub id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Effective timeout (job override or queue default)
    pub timeout: Option<Duration>,
    /// Submission timestamp
    pub submitted_at: Time,
    /// Slot acquisition timestamp
    pub started_at: Option<Time>,
    /// Terminal state timestamp
    pub finished_at: Option<Time>,
}

impl JobRecord {
    /// Create a record for a freshly submitted job.
    pub fn new(id: JobId, timeout: Option<Duration>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            timeout,
            submitted_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Time spent holding a slot, if the job has finished.
    pub fn run_time(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status_mapping() {
        assert_eq!(JobOutcome::Succeeded(1).status(), JobStatus::Succeeded);
        assert_eq!(JobOutcome::<i32>::Failed(JobFailure::new("x")).status(), JobStatus::Failed);
        let timed_out = JobOutcome::<i32>::TimedOut { after: Duration::from_millis(5) };
        assert_eq!(timed_out.status(), JobStatus::TimedOut);
        assert!(!timed_out.is_success());
    }

    #[test]
    fn test_into_result_distinguishes_timeout() {
        let failed = JobOutcome::<()>::Failed(JobFailure::new("boom")).into_result();
        assert!(matches!(failed, Err(JobError::ExecutorFailure(f)) if f.message == "boom"));

        let timed_out = JobOutcome::<()>::TimedOut { after: Duration::from_secs(1) }.into_result();
        assert!(matches!(timed_out, Err(JobError::Timeout { after }) if after == Duration::from_secs(1)));

        assert_eq!(JobOutcome::Succeeded(7).into_result().unwrap(), 7);
    }

    #[test]
    fn test_failure_builders() {
        let failure = JobFailure::new("rate limited")
            .with_code(429)
            .retryable()
            .with_data(serde_json::json!({"retry_after": 3}));
        assert_eq!(failure.code, 429);
        assert!(failure.retryable);
        assert_eq!(failure.to_string(), "[429] rate limited");
    }

    #[test]
    fn test_failure_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("disk full").context("writing chunk");
        let failure = JobFailure::from(err);
        assert_eq!(failure.message, "writing chunk: disk full");
        assert_eq!(failure.code, failure_codes::EXECUTOR_FAILURE);
    }

    #[test]
    fn test_record_run_time() {
        let mut record = JobRecord::new(JobId::new(), None);
        assert!(record.run_time().is_none());
        let start = chrono::Utc::now();
        record.started_at = Some(start);
        record.finished_at = Some(start + chrono::Duration::milliseconds(15));
        assert_eq!(record.run_time(), Some(chrono::Duration::milliseconds(15)));
    }
}
