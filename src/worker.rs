//! Worker handle (spec §3 `ThreadInfo`/`Worker`, §4.9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::cancel::CancelScope;
use crate::error::{ErrorContext, GoError, WorkerError};
use crate::group::Group;
use crate::id::{next_id, EntityId, EntityKind};
use crate::latch::{Latch, WaitCh};
use crate::location::{capture_stack, Location};

/// Per-worker identity info, filled in at construction (`creator_*`) and
/// at `register` time (`os_thread_id`, `go_fn_loc`).
#[derive(Clone, Debug)]
pub struct ThreadInfo {
    pub os_thread_id: Option<u64>,
    pub creator_thread_id: u64,
    pub creator_loc: Location,
    pub go_fn_loc: Option<Location>,
    pub label: Option<String>,
}

/// A lightweight, cloneable snapshot identifying a worker, attached to
/// `GoError` events so consumers can report which worker produced them
/// without holding the live `Worker` handle (which is dropped after
/// `done` returns).
#[derive(Clone, Debug)]
pub struct WorkerRef {
    pub id: EntityId,
    pub info: ThreadInfo,
}

struct Inner {
    id: EntityId,
    parent: Group,
    info: Mutex<ThreadInfo>,
    end: Latch,
    done_called: AtomicBool,
}

/// A per-worker handle: identity, completion, and error ingress (spec §4.9).
pub struct Worker {
    inner: std::sync::Arc<Inner>,
}

impl Worker {
    pub(crate) fn new(parent: Group, creator_loc: Location) -> Worker {
        let id = next_id(EntityKind::Worker);
        let creator_thread_id = crate::location::os_thread_id();
        Worker {
            inner: std::sync::Arc::new(Inner {
                id,
                parent,
                info: Mutex::new(ThreadInfo {
                    os_thread_id: None,
                    creator_thread_id,
                    creator_loc,
                    go_fn_loc: None,
                    label: None,
                }),
                end: Latch::new(),
                done_called: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn info(&self) -> ThreadInfo {
        self.inner.info.lock().unwrap().clone()
    }

    pub fn as_ref(&self) -> WorkerRef {
        WorkerRef {
            id: self.inner.id,
            info: self.info(),
        }
    }

    /// Fills in the OS thread id and the spawned function's location, and
    /// propagates the updated `ThreadInfo` up the aggregating ancestor
    /// chain (spec §4.9).
    #[track_caller]
    pub fn register(&self, label: Option<String>) -> &Self {
        let go_fn_loc = Location::capture_here(0);
        let os_thread_id = Some(crate::location::os_thread_id());
        {
            let mut info = self.inner.info.lock().unwrap();
            info.os_thread_id = os_thread_id;
            info.go_fn_loc = Some(go_fn_loc);
            if label.is_some() {
                info.label = label;
            }
        }
        let info = self.info();
        self.inner.parent.note_worker_registered(self.inner.id, info);
        self
    }

    /// Non-fatal error ingress; forwarded as `GoError{NonFatal}`.
    pub fn add_error(&self, err: WorkerError) {
        let err = err.with_stack();
        self.inner
            .parent
            .consume_error(GoError::new(Some(err), ErrorContext::NonFatal, Some(self.as_ref())));
    }

    /// Completion. Idempotent-rejecting: a second call panics, naming the
    /// offending call site.
    #[track_caller]
    pub fn done(&self, err: Option<WorkerError>) {
        if self
            .inner
            .done_called
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let loc = std::panic::Location::caller();
            panic!(
                "taskgrove: Worker::done called twice for worker {} (second call at {}:{})",
                self.inner.id, loc.file(), loc.line()
            );
        }
        let err = err.map(WorkerError::with_stack);
        self.inner.parent.on_worker_done(self.as_ref(), err);
        self.inner.end.close();
    }

    pub fn context(&self) -> &CancelScope {
        self.inner.parent.ctx()
    }

    pub fn cancel(&self) {
        self.inner.parent.ctx().cancel();
    }

    pub fn wait(&self) {
        self.inner.end.wait();
    }

    pub fn wait_ch(&self) -> WaitCh {
        self.inner.end.wait_ch()
    }

    /// Spawns a sibling worker in the same group, recording this call
    /// site (not the group constructor's) as the new worker's creation
    /// location.
    #[track_caller]
    pub fn spawn_sibling(&self) -> Worker {
        let loc = Location::capture_here(0);
        self.inner.parent.spawn_from_worker(loc)
    }

    #[track_caller]
    pub fn spawn_subgroup(&self) -> Group {
        let loc = Location::capture_here(0);
        self.inner.parent.sub_no_errors_from_worker(loc)
    }

    #[track_caller]
    pub fn spawn_subgroup_with_errors(&self) -> Group {
        let loc = Location::capture_here(0);
        self.inner.parent.sub_with_errors_from_worker(loc)
    }

    /// Captures a stack trace attributed to this worker, for diagnostics.
    pub fn capture_stack(&self) -> crate::location::Stack {
        capture_stack(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelScope;

    #[test]
    fn register_fills_thread_info() {
        let root = Group::new_root(CancelScope::new());
        let w = root.spawn();
        w.register(Some("worker-a".into()));
        let info = w.info();
        assert!(info.os_thread_id.is_some());
        assert!(info.go_fn_loc.is_some());
        assert_eq!(info.label.as_deref(), Some("worker-a"));
        w.done(None);
    }

    #[test]
    #[should_panic(expected = "called twice")]
    fn done_twice_panics() {
        let root = Group::new_root(CancelScope::new());
        let w = root.spawn();
        w.done(None);
        w.done(None);
    }

    #[test]
    fn wait_unblocks_after_done() {
        let root = Group::new_root(CancelScope::new());
        let w = root.spawn();
        let ch = w.wait_ch();
        let handle = std::thread::spawn(move || ch.wait());
        std::thread::sleep(std::time::Duration::from_millis(10));
        w.done(None);
        handle.join().unwrap();
    }
}
