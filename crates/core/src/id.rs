//! Unique identifiers for queued jobs.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a Job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Ulid);

impl JobId {
    /// Generate a new JobId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job_{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("job_").unwrap_or(s);
        Ok(Self(raw.parse()?))
    }
}

/// Opaque reference to a submitted job.
///
/// Returned by the queue on submission and used to poll or await the
/// job's outcome. A handle is only meaningful to the queue that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    id: JobId,
}

impl JobHandle {
    /// Wrap a job ID.
    pub fn new(id: JobId) -> Self {
        Self { id }
    }

    /// ID of the referenced job.
    pub fn id(&self) -> JobId {
        self.id
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.id.fmt(f)
    }
}
