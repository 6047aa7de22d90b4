//! jobqueue core data models.
//!
//! Identifiers, lifecycle states, outcomes and error types shared by the
//! queue manager and its callers.

#![warn(missing_docs)]

mod id;
mod status;
mod outcome;
mod envelope;
mod error;
mod stats;

pub use id::{JobId, JobHandle};
pub use status::JobStatus;
pub use outcome::{failure_codes, JobFailure, JobOutcome, JobRecord};
pub use envelope::{EnvelopeError, ResponseEnvelope};
pub use error::{JobError, QueueError, Result};
pub use stats::QueueStats;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
