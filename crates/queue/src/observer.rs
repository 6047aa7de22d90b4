//! Lifecycle hooks.

use jobqueue_core::{JobFailure, JobRecord, QueueStats};

/// Receives queue lifecycle notifications.
///
/// Every method defaults to a no-op. Hooks run on the task that completed
/// the job, outside the queue's critical section, so they may call back
/// into the queue; they should still return quickly.
pub trait QueueObserver: Send + Sync {
    /// A job's executor produced a value.
    fn on_succeeded(&self, _record: &JobRecord) {}

    /// A job's executor failed or panicked.
    fn on_failed(&self, _record: &JobRecord, _failure: &JobFailure) {}

    /// A job hit its deadline.
    fn on_timed_out(&self, _record: &JobRecord) {}

    /// A job reached any terminal state. Runs after the specific hook.
    fn on_completed(&self, _record: &JobRecord) {}

    /// The last pending or running job finished.
    fn on_idle(&self, _stats: &QueueStats) {}

    /// A timeout left more abandoned executors running than allowed.
    fn on_max_zombies_reached(&self, _stats: &QueueStats) {}
}
