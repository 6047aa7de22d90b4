//! Queue counters.

use serde::{Deserialize, Serialize};

/// Point-in-time counters for a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs accepted since creation
    pub submitted: u64,
    /// Jobs waiting for a slot
    pub pending: usize,
    /// Jobs holding a slot
    pub running: usize,
    /// Jobs that succeeded
    pub succeeded: u64,
    /// Jobs that failed
    pub failed: u64,
    /// Jobs that timed out
    pub timed_out: u64,
    /// Timed-out executors that have not settled yet
    pub zombies: usize,
}

impl QueueStats {
    /// Jobs that reached a terminal state.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }

    /// No job pending or running.
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "submitted={} pending={} running={} succeeded={} failed={} timed_out={} zombies={}",
            self.submitted,
            self.pending,
            self.running,
            self.succeeded,
            self.failed,
            self.timed_out,
            self.zombies
        )
    }
}
