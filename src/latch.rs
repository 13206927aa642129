//! Awaitable, one-shot latch (spec §4.4) and its fanned-out wait channel.
//!
//! Shaped after the latch hierarchy `rayon-core/src/registry.rs` imports
//! (`CoreLatch` for a lock-free probe, `LockLatch` for a blocking wait) —
//! the concrete `latch.rs` module was not retrieved, so this reconstructs
//! the contract from those call sites: a cheap atomic `probe`, a
//! `Mutex`+`Condvar` slow path for blocking waiters, and `set`/`close`
//! idempotent under CAS.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

struct Inner {
    closed: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

/// A one-shot "closed" flag with a channel-like wait (spec §4.4).
#[derive(Clone)]
pub struct Latch(Arc<Inner>);

impl Latch {
    pub fn new() -> Self {
        Latch(Arc::new(Inner {
            closed: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }))
    }

    /// Closes the latch. Returns `true` if this call performed the close,
    /// `false` if the latch was already closed.
    pub fn close(&self) -> bool {
        if self
            .0
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Acquire the mutex so any waiter already parked in `wait()`
            // is guaranteed to observe the notification: this serializes
            // with the waiter's own lock-then-recheck-then-wait sequence.
            let _guard = self.0.mutex.lock().unwrap();
            self.0.condvar.notify_all();
            true
        } else {
            false
        }
    }

    /// Lock-free probe: `true` once `close` has happened.
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Blocks the calling thread until the latch closes.
    pub fn wait(&self) {
        if self.is_closed() {
            return;
        }
        let mut guard = self.0.mutex.lock().unwrap();
        while !self.0.closed.load(Ordering::Acquire) {
            guard = self.0.condvar.wait(guard).unwrap();
        }
    }

    /// A cloneable handle that can only observe the latch, not close it —
    /// the "fanned-out wait channel" of spec §9's design notes.
    pub fn wait_ch(&self) -> WaitCh {
        WaitCh(self.0.clone())
    }
}

impl Default for Latch {
    fn default() -> Self {
        Latch::new()
    }
}

/// A read-only view of a [`Latch`].
#[derive(Clone)]
pub struct WaitCh(Arc<Inner>);

impl WaitCh {
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    pub fn wait(&self) {
        if self.is_closed() {
            return;
        }
        let mut guard = self.0.mutex.lock().unwrap();
        while !self.0.closed.load(Ordering::Acquire) {
            guard = self.0.condvar.wait(guard).unwrap();
        }
    }
}
