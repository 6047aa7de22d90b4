//! Executor abstraction.

use async_trait::async_trait;
use jobqueue_core::JobFailure;

/// Reusable unit of work that the queue can run with different arguments.
///
/// Closures cover one-off jobs; implement this when one executor is shared
/// across many submissions and fed per-job arguments.
#[async_trait]
pub trait JobExecutor<A: Send + 'static>: Send + Sync {
    /// Value produced on success.
    type Output: Send + 'static;

    /// Run the job.
    async fn execute(&self, args: A) -> Result<Self::Output, JobFailure>;
}
