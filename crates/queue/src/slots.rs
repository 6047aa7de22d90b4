//! Execution slot accounting.

use std::num::NonZeroUsize;

/// Fixed-size pool of concurrency permits.
///
/// Not synchronized on its own; the queue keeps it inside its critical
/// section together with the pending list.
#[derive(Debug)]
pub struct SlotPool {
    capacity: NonZeroUsize,
    in_use: usize,
}

impl SlotPool {
    /// Create a pool with `capacity` permits.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity, in_use: 0 }
    }

    /// Check if a job could start now.
    pub fn can_acquire(&self) -> bool {
        self.in_use < self.capacity.get()
    }

    /// Take a permit. Callers check [`can_acquire`](Self::can_acquire) first.
    pub fn acquire(&mut self) {
        debug_assert!(self.can_acquire(), "slot pool over capacity");
        self.in_use += 1;
    }

    /// Return a permit.
    pub fn release(&mut self) {
        self.in_use = self.in_use.saturating_sub(1);
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.capacity.get().saturating_sub(self.in_use)
    }

    /// Total permits.
    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}
