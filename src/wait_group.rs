//! Counted wait group with an observed zero-transition (spec §4.5).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Tracks a live count of outstanding children (workers plus sub-groups
/// holding a termination block) and reports the transition to zero.
pub struct CountedWait {
    count: AtomicI64,
    adds: AtomicU64,
    dones: AtomicU64,
}

impl CountedWait {
    pub fn new() -> Self {
        CountedWait {
            count: AtomicI64::new(0),
            adds: AtomicU64::new(0),
            dones: AtomicU64::new(0),
        }
    }

    /// Adjusts the count by `delta`. Returns `true` iff this call
    /// transitioned the count to exactly zero (from a positive value).
    /// `delta < 0` is used to implement the synthetic termination block
    /// (spec §4.10 `enable_termination`); the count must never go
    /// negative.
    pub fn add(&self, delta: i64) -> bool {
        if delta == 0 {
            return self.count.load(Ordering::Acquire) == 0;
        }
        if delta > 0 {
            self.adds.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            self.dones.fetch_add((-delta) as u64, Ordering::Relaxed);
        }
        let new = self.count.fetch_add(delta, Ordering::AcqRel) + delta;
        debug_assert!(new >= 0, "wait group count went negative");
        new == 0
    }

    /// Equivalent to `add(-1)`: `true` iff this call transitioned the
    /// count to zero.
    pub fn done(&self) -> bool {
        self.add(-1)
    }

    /// Monotone evidence of the current count; may be stale the instant
    /// it is read under concurrent `add`s.
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// `(total adds, total dones)` observed so far, for diagnostics.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.adds.load(Ordering::Relaxed),
            self.dones.load(Ordering::Relaxed),
        )
    }
}

impl Default for CountedWait {
    fn default() -> Self {
        CountedWait::new()
    }
}
