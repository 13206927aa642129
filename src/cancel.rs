//! Cancellation context / `CancelScope` (spec §4.3).
//!
//! A tree of cancellable scopes sharing a single "done" signal per node,
//! built on the [`crate::latch::Latch`] above. Grounded on
//! `examples/other_examples/..._nearcore__...scope-mod.rs.rs`'s `ctx::Ctx`
//! usage (child scopes via `ctx.sub(...)`, cancellation propagating down
//! on the first error) translated to a thread-based latch instead of an
//! async `watch` channel, since this crate has no async runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::latch::{Latch, WaitCh};

/// The scope was cancelled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("scope was cancelled")]
pub struct CancelErr;

type Listener = Box<dyn FnOnce() + Send>;

struct Inner {
    latch: Latch,
    cancelling: AtomicBool,
    children: Mutex<Vec<Weak<Inner>>>,
    pre_cancel_listener: Mutex<Option<Listener>>,
}

/// A cancellable scope. Clones share the same underlying state.
#[derive(Clone)]
pub struct CancelScope(Arc<Inner>);

impl CancelScope {
    /// Creates a new, unparented root scope.
    pub fn new() -> Self {
        CancelScope(Arc::new(Inner {
            latch: Latch::new(),
            cancelling: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            pre_cancel_listener: Mutex::new(None),
        }))
    }

    /// Creates a child scope of `self`. If `self` is already cancelled,
    /// the child is created already-cancelled.
    pub fn child(&self) -> CancelScope {
        let child = CancelScope(Arc::new(Inner {
            latch: Latch::new(),
            cancelling: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            pre_cancel_listener: Mutex::new(None),
        }));
        if self.0.latch.is_closed() {
            child.cancel();
        } else {
            self.0.children.lock().unwrap().push(Arc::downgrade(&child.0));
        }
        child
    }

    /// Registers a callback invoked exactly once, immediately before this
    /// scope's effective cancel. Used by the debug thread-logger to start
    /// printing at the moment of first cancel. Registering after the
    /// scope has already started cancelling is a no-op: the listener
    /// will not run.
    pub fn on_pre_cancel(&self, listener: impl FnOnce() + Send + 'static) {
        *self.0.pre_cancel_listener.lock().unwrap() = Some(Box::new(listener));
    }

    /// Closes on cancel.
    pub fn done(&self) -> WaitCh {
        self.0.latch.wait_ch()
    }

    pub fn is_done(&self) -> bool {
        self.0.latch.is_closed()
    }

    pub fn err(&self) -> Option<CancelErr> {
        if self.0.latch.is_closed() {
            Some(CancelErr)
        } else {
            None
        }
    }

    /// Cancels this scope and all descendants. Idempotent: a second call
    /// (including a reentrant call from inside the `pre_cancel_listener`
    /// itself) observes "already cancelling" and returns immediately.
    pub fn cancel(&self) {
        if self
            .0
            .cancelling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Some(listener) = self.0.pre_cancel_listener.lock().unwrap().take() {
            listener();
        }

        self.0.latch.close();

        let children = std::mem::take(&mut *self.0.children.lock().unwrap());
        for child in children {
            if let Some(child) = child.upgrade() {
                CancelScope(child).cancel();
            }
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        CancelScope::new()
    }
}
