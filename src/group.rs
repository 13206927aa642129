//! Thread-group: the tree node (spec §3 `Group`, §4.10).
//!
//! Grounded on `rayon-core/src/registry.rs`'s `Registry`/`ThreadInfo` pair:
//! a parent object tracking child thread state in a map, a `terminate()`
//! that cascades exactly once, and `unwind::{AbortIfPanic, halt_unwinding}`
//! for the panic-catch-to-error conversion around `on_first_fatal`. The
//! parent/child wiring here deliberately uses a strong `Group` handle from
//! child to parent (not the `Weak` spec §9 suggests) because, unlike a
//! typical cyclic graph, nothing here holds a reciprocal strong edge from
//! parent back to a child `Group`: a parent only stores plain `ThreadInfo`
//! data in its `workers` map, never another `Group`/`Arc<GroupInner>`. A
//! one-directional strong chain cannot cycle, so this is sound and avoids
//! `Weak::upgrade` boilerplate at every call site (see DESIGN.md).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cancel::CancelScope;
use crate::debug_logger::DebugLogger;
use crate::error::{ErrorContext, GoError, WorkerError};
use crate::id::{next_id, EntityId, EntityKind};
use crate::event_stream::EventStream;
use crate::latch::{Latch, WaitCh};
use crate::location::Location;
use crate::unwind::halt_unwinding;
use crate::wait_group::CountedWait;
use crate::worker::{ThreadInfo, Worker, WorkerRef};

/// Controls error routing for a group (spec §3 `Group.kind`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GroupKind {
    Root,
    SubWithErrors,
    SubNoErrors,
}

/// Debug tracing level (spec §6 `debug` option).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum DebugMode {
    #[default]
    None,
    /// Implies `Aggregate`; every state-changing op also logs via the sink.
    Print,
    /// Maintain the `workers` map (and propagate it up) without printing.
    Aggregate,
}

/// The callback invoked once on a group's first fatal worker exit.
pub type FirstFatalCallback = Box<dyn Fn(&Group) + Send + Sync>;

/// A raw `printf`-style sink for the debug thread-logger (spec §6).
pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Builder-style configuration, mirroring `rayon-core`'s `ThreadPoolBuilder`
/// (SPEC_FULL.md AMBIENT / Configuration).
#[derive(Default)]
pub struct GroupOptions {
    debug: DebugMode,
    termination_blocked: bool,
    on_first_fatal: Option<FirstFatalCallback>,
    debug_sink: Option<DebugSink>,
}

impl GroupOptions {
    pub fn with_debug(mut self, mode: DebugMode) -> Self {
        self.debug = mode;
        self
    }

    pub fn with_termination_blocked(mut self, blocked: bool) -> Self {
        self.termination_blocked = blocked;
        self
    }

    pub fn with_on_first_fatal(mut self, f: impl Fn(&Group) + Send + Sync + 'static) -> Self {
        self.on_first_fatal = Some(Box::new(f));
        self
    }

    pub fn with_debug_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.debug_sink = Some(Arc::new(sink));
        self
    }
}

/// A single-shot observer for a group's first fatal worker exit (spec
/// §4.10 `first_fatal()`).
#[derive(Clone)]
pub struct FirstFatal {
    ch: WaitCh,
    error: Arc<Mutex<Option<GoError>>>,
}

impl FirstFatal {
    /// Blocks until the first fatal exit, then returns the error that
    /// triggered it (or `None` if called on an already-terminal group
    /// that never saw a fatal exit).
    pub fn wait(&self) -> Option<GoError> {
        self.ch.wait();
        self.error.lock().unwrap().clone()
    }

    pub fn wait_ch(&self) -> WaitCh {
        self.ch.clone()
    }
}

struct GroupInner {
    id: EntityId,
    kind: GroupKind,
    parent: Option<Group>,
    ctx: CancelScope,
    wg: CountedWait,
    events: Option<EventStream<GoError>>,
    end: Latch,
    workers: Mutex<HashMap<EntityId, ThreadInfo>>,
    had_fatal: AtomicBool,
    first_fatal_latch: Latch,
    first_fatal_error: Arc<Mutex<Option<GoError>>>,
    on_first_fatal: Option<FirstFatalCallback>,
    termination_blocked: AtomicBool,
    debug_print: AtomicBool,
    debug_aggregate: AtomicBool,
    debug_sink: Mutex<Option<DebugSink>>,
    done_lock: Mutex<()>,
    creation_loc: Location,
    logger: Mutex<Option<DebugLogger>>,
}

/// A node in the hierarchical thread-group tree (spec §4.10).
#[derive(Clone)]
pub struct Group(Arc<GroupInner>);

impl Group {
    fn new_raw(
        kind: GroupKind,
        parent: Option<Group>,
        ctx: CancelScope,
        opts: GroupOptions,
        creation_loc: Location,
    ) -> Group {
        let events = match kind {
            GroupKind::Root | GroupKind::SubWithErrors => Some(EventStream::new()),
            GroupKind::SubNoErrors => None,
        };
        let print = matches!(opts.debug, DebugMode::Print);
        let aggregate = print || matches!(opts.debug, DebugMode::Aggregate);
        let group = Group(Arc::new(GroupInner {
            id: next_id(EntityKind::Group),
            kind,
            parent,
            ctx,
            wg: CountedWait::new(),
            events,
            end: Latch::new(),
            workers: Mutex::new(HashMap::new()),
            had_fatal: AtomicBool::new(false),
            first_fatal_latch: Latch::new(),
            first_fatal_error: Arc::new(Mutex::new(None)),
            on_first_fatal: opts.on_first_fatal,
            termination_blocked: AtomicBool::new(false),
            debug_print: AtomicBool::new(print),
            debug_aggregate: AtomicBool::new(aggregate),
            debug_sink: Mutex::new(opts.debug_sink),
            done_lock: Mutex::new(()),
            creation_loc,
            logger: Mutex::new(None),
        }));
        if opts.termination_blocked {
            group.enable_termination(false);
        }
        group
    }

    /// Creates a new root group, a child scope of `ctx`.
    #[track_caller]
    pub fn new_root(ctx: CancelScope) -> Group {
        Self::new_root_with_options(ctx, GroupOptions::default())
    }

    #[track_caller]
    pub fn new_root_with_options(ctx: CancelScope, opts: GroupOptions) -> Group {
        let loc = Location::capture_here(0);
        Self::new_raw(GroupKind::Root, None, ctx.child(), opts, loc)
    }

    /// A sub-group that keeps no event stream of its own: errors flow to
    /// the parent.
    #[track_caller]
    pub fn sub_no_errors(&self) -> Group {
        let loc = Location::capture_here(0);
        self.sub_no_errors_from_worker(loc)
    }

    #[track_caller]
    pub fn sub_with_errors(&self) -> Group {
        let loc = Location::capture_here(0);
        self.sub_with_errors_from_worker(loc)
    }

    pub(crate) fn sub_no_errors_from_worker(&self, creation_loc: Location) -> Group {
        Self::new_raw(
            GroupKind::SubNoErrors,
            Some(self.clone()),
            self.0.ctx.child(),
            GroupOptions::default(),
            creation_loc,
        )
    }

    pub(crate) fn sub_with_errors_from_worker(&self, creation_loc: Location) -> Group {
        Self::new_raw(
            GroupKind::SubWithErrors,
            Some(self.clone()),
            self.0.ctx.child(),
            GroupOptions::default(),
            creation_loc,
        )
    }

    pub fn id(&self) -> EntityId {
        self.0.id
    }

    pub fn kind(&self) -> GroupKind {
        self.0.kind
    }

    pub fn ctx(&self) -> &CancelScope {
        &self.0.ctx
    }

    pub fn end(&self) -> WaitCh {
        self.0.end.wait_ch()
    }

    pub fn wait(&self) {
        self.0.end.wait();
    }

    pub fn had_fatal(&self) -> bool {
        self.0.had_fatal.load(Ordering::Acquire)
    }

    /// A single-shot observer for this group's first fatal worker exit.
    pub fn first_fatal(&self) -> FirstFatal {
        FirstFatal {
            ch: self.0.first_fatal_latch.wait_ch(),
            error: Arc::clone(&self.0.first_fatal_error),
        }
    }

    /// Spawns a worker owned by this group. Panics if the group's `end`
    /// has already closed.
    #[track_caller]
    pub fn spawn(&self) -> Worker {
        let loc = Location::capture_here(0);
        self.spawn_from_worker(loc)
    }

    pub(crate) fn spawn_from_worker(&self, creation_loc: Location) -> Worker {
        if self.0.end.is_closed() {
            panic!(
                "taskgrove: spawn on a terminated group {} (group created at {})",
                self.0.id, self.0.creation_loc
            );
        }
        self.propagate_wg_add(1);
        Worker::new(self.clone(), creation_loc)
    }

    /// Spawns a worker and runs `body` for it on a fresh OS thread under a
    /// panic guard: a panic in `body` is caught and delivered through
    /// `done` as a fatal error instead of killing the thread silently
    /// (spec §5, "every spawned worker body runs under a panic guard that
    /// converts a panic into a fatal error delivered through `done`"),
    /// mirroring `rayon-core`'s `unwind::halt_unwinding` around its own
    /// worker main loop.
    #[track_caller]
    pub fn spawn_with<F>(&self, label: Option<String>, body: F) -> std::thread::JoinHandle<()>
    where
        F: FnOnce(&Worker) -> Option<WorkerError> + Send + 'static,
    {
        let loc = Location::capture_here(0);
        let worker = self.spawn_from_worker(loc);
        let mut builder = std::thread::Builder::new();
        if let Some(name) = &label {
            builder = builder.name(name.clone());
        }
        builder
            .spawn(move || {
                worker.register(label);
                let outcome = halt_unwinding(|| body(&worker));
                let err = outcome.unwrap_or_else(|panic| {
                    Some(WorkerError::new(format!(
                        "worker panicked: {}",
                        panic_message(&panic)
                    )))
                });
                worker.done(err);
            })
            .expect("failed to spawn taskgrove worker thread")
    }

    /// Adds `delta` to this group's `wg` and every ancestor's, in the same
    /// top-down direction `note_worker_registered`/`remove_worker` already
    /// walk the tree (spec §4.10: spawn "increments `wg` on this group and
    /// every ancestor").
    fn propagate_wg_add(&self, delta: i64) {
        self.0.wg.add(delta);
        if let Some(parent) = &self.0.parent {
            parent.propagate_wg_add(delta);
        }
    }

    /// Releases `delta` (negative) from this group's `wg` and every
    /// ancestor's, terminating any ancestor that reaches zero as a result.
    fn propagate_wg_release(&self, delta: i64) {
        let became_zero = self.0.wg.add(delta);
        if became_zero {
            self.try_terminate_now();
        }
        if let Some(parent) = &self.0.parent {
            parent.propagate_wg_release(delta);
        }
    }

    /// Called by `Worker::register` once the worker has an OS thread id
    /// and a go-function location; propagates aggregation up the tree.
    pub(crate) fn note_worker_registered(&self, id: EntityId, info: ThreadInfo) {
        if self.0.debug_aggregate.load(Ordering::Acquire) {
            self.0.workers.lock().unwrap().insert(id, info.clone());
            if self.0.debug_print.load(Ordering::Acquire) {
                self.log_line(&format!(
                    "worker {} registered: {}",
                    id,
                    info.label.as_deref().unwrap_or("<unlabeled>")
                ));
            }
        }
        if let Some(parent) = &self.0.parent {
            parent.note_worker_registered(id, info);
        }
    }

    fn remove_worker(&self, id: EntityId) {
        if self.0.debug_aggregate.load(Ordering::Acquire) {
            self.0.workers.lock().unwrap().remove(&id);
        }
        if let Some(parent) = &self.0.parent {
            parent.remove_worker(id);
        }
    }

    /// Live workers known to this group (populated only when aggregation
    /// is enabled).
    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.0.workers.lock().unwrap().values().cloned().collect()
    }

    pub fn named_threads(&self) -> HashMap<EntityId, ThreadInfo> {
        self.0.workers.lock().unwrap().clone()
    }

    /// Enables tree-wide debug printing and/or `workers` map aggregation.
    pub fn set_debug(&self, mode: DebugMode, sink: Option<DebugSink>) {
        let print = matches!(mode, DebugMode::Print);
        let aggregate = print || matches!(mode, DebugMode::Aggregate);
        self.0.debug_print.store(print, Ordering::Release);
        self.0.debug_aggregate.store(aggregate, Ordering::Release);
        if sink.is_some() {
            *self.0.debug_sink.lock().unwrap() = sink;
        }
    }

    pub(crate) fn log_line(&self, line: &str) {
        tracing::debug!(group = %self.0.id, "{}", line);
        if let Some(sink) = self.0.debug_sink.lock().unwrap().as_ref() {
            sink(line);
        }
    }

    /// Attaches a debug thread-logger to this group (spec §4.11). Turns on
    /// `workers` map aggregation for this group; since
    /// `note_worker_registered`/`remove_worker` already walk up to every
    /// ancestor unconditionally, this alone is enough for the whole
    /// subtree below this group to be reflected in its `threads()`.
    pub fn attach_debug_logger(&self) -> crate::debug_logger::DebugLoggerHandle {
        self.0.debug_aggregate.store(true, Ordering::Release);
        let logger = DebugLogger::attach(self.clone());
        let handle = logger.handle();
        *self.0.logger.lock().unwrap() = Some(logger);
        handle
    }

    /// Non-fatal error ingestion. Must be `NonFatal` or `LocalChan`.
    pub fn consume_error(&self, e: GoError) {
        debug_assert!(
            matches!(e.ctx, ErrorContext::NonFatal | ErrorContext::LocalChan),
            "consume_error only accepts NonFatal or LocalChan events"
        );
        if self.0.end.is_closed() {
            panic!(
                "taskgrove: consume_error on a terminated group {} (group created at {})",
                self.0.id, self.0.creation_loc
            );
        }
        if let Some(events) = &self.0.events {
            events.send(e);
        } else if let Some(parent) = &self.0.parent {
            parent.consume_error(e);
        } else {
            unreachable!("a group without events and without a parent cannot exist");
        }
    }

    /// Worker completion dispatch (spec §4.10).
    pub(crate) fn on_worker_done(&self, worker: WorkerRef, err: Option<WorkerError>) {
        let _guard = self.0.done_lock.lock().unwrap();

        if self.0.end.is_closed() {
            panic!(
                "taskgrove: Worker::done after group {} already terminated (worker {}, created at {})",
                self.0.id, worker.id, worker.info.creator_loc
            );
        }

        if err.is_some()
            && self
                .0
                .had_fatal
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            *self.0.first_fatal_error.lock().unwrap() = Some(GoError::new(
                err.clone(),
                ErrorContext::Exit,
                Some(worker.clone()),
            ));
            self.0.first_fatal_latch.close();
            if let Some(callback) = &self.0.on_first_fatal {
                let group = self.clone();
                if let Err(panic) = halt_unwinding(|| callback(&group)) {
                    let message = panic_message(&panic);
                    self.route_non_fatal(GoError::new(
                        Some(WorkerError::new(format!(
                            "on_first_fatal callback panicked: {message}"
                        ))),
                        ErrorContext::NonFatal,
                        Some(worker.clone()),
                    ));
                }
            }
        }

        let is_terminal = self.0.wg.done();
        self.remove_worker(worker.id);

        match self.0.kind {
            GroupKind::Root => {
                self.emit_local(worker.clone(), err, is_terminal);
            }
            GroupKind::SubWithErrors => {
                self.emit_local(worker.clone(), err.clone(), is_terminal);
                if let Some(parent) = self.0.parent.clone() {
                    if let Some(err) = err {
                        parent.consume_error(GoError::new(
                            Some(err),
                            ErrorContext::LocalChan,
                            Some(worker.clone()),
                        ));
                    }
                    // Every worker under this group also holds a `wg` unit
                    // on every ancestor (spec §4.10 spawn); forward a
                    // synthetic clean exit unconditionally so the parent's
                    // chain-wide `wg` balances even when no fatal error
                    // needs to cross (errors that do cross were already
                    // reported above as `LocalChan`, not as this Exit).
                    parent.on_worker_done(worker, None);
                }
            }
            GroupKind::SubNoErrors => {
                if let Some(parent) = self.0.parent.clone() {
                    parent.on_worker_done(worker, err);
                }
            }
        }

        if is_terminal {
            self.terminate_locked();
        }
    }

    fn emit_local(&self, worker: WorkerRef, err: Option<WorkerError>, is_terminal: bool) {
        if let Some(events) = &self.0.events {
            let ctx = if is_terminal {
                ErrorContext::Exit
            } else {
                ErrorContext::PreDoneExit
            };
            events.send(GoError::new(err, ctx, Some(worker)));
        }
    }

    fn route_non_fatal(&self, e: GoError) {
        if let Some(events) = &self.0.events {
            events.send(e);
        } else if let Some(parent) = &self.0.parent {
            parent.route_non_fatal(e);
        }
    }

    /// Closes events/end and cancels the scope. Must be called with
    /// `done_lock` held (from `on_worker_done`) or as the direct effect
    /// of `cancel`/`enable_termination` on an empty group.
    fn terminate_locked(&self) {
        if self.0.end.close() {
            if let Some(events) = &self.0.events {
                events.close();
            }
            self.0.ctx.cancel();
            tracing::info!(group = %self.0.id, "group terminated");
        }
    }

    /// Same as `terminate_locked` but acquires `done_lock` itself; used
    /// by `cancel`/`enable_termination`, which are not already holding it.
    fn try_terminate_now(&self) {
        let _guard = self.0.done_lock.lock().unwrap();
        if self.0.wg.count() == 0 {
            self.terminate_locked();
        }
    }

    /// Cancels this group's scope. If the group is already terminal, has
    /// outstanding work, or termination is blocked, this only cancels the
    /// scope (workers observe it and finish normally); otherwise the
    /// (empty) group terminates immediately.
    pub fn cancel(&self) {
        self.0.ctx.cancel();
        if self.0.end.is_closed()
            || self.0.wg.count() > 0
            || self.0.termination_blocked.load(Ordering::Acquire)
        {
            return;
        }
        self.try_terminate_now();
    }

    /// Toggles the synthetic termination block (spec §4.10). Returns
    /// `true` iff this call caused the group to terminate right now (see
    /// DESIGN.md, Open Question 2).
    pub fn enable_termination(&self, allow: bool) -> bool {
        if !allow {
            if self
                .0
                .termination_blocked
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            self.propagate_wg_add(1);
            false
        } else {
            if self
                .0
                .termination_blocked
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            let became_zero = self.0.wg.add(-1);
            if became_zero {
                self.try_terminate_now();
            }
            if let Some(parent) = &self.0.parent {
                parent.propagate_wg_release(-1);
            }
            became_zero
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;

    fn drain_all(events: &EventStream<GoError>) -> Vec<GoError> {
        let mut out = Vec::new();
        while let Some(e) = events.next() {
            out.push(e);
        }
        out
    }

    /// S1: root + one worker, clean exit.
    #[test]
    fn s1_root_one_worker_clean_exit() {
        let root = Group::new_root(CancelScope::new());
        let w = root.spawn();
        w.done(None);

        let events = root.0.events.as_ref().unwrap();
        let got = drain_all(events);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ctx, ErrorContext::Exit);
        assert!(got[0].err.is_none());
        assert!(events.is_closed());
        assert!(root.end().is_closed());
        assert!(root.ctx().is_done());
    }

    /// S2: root + two workers, one fatal.
    #[test]
    fn s2_root_two_workers_one_fatal() {
        let root = Group::new_root(CancelScope::new());
        let w1 = root.spawn();
        let w2 = root.spawn();

        w1.done(Some(WorkerError::new("boom")));
        assert!(root.had_fatal());

        w2.done(None);

        let events = root.0.events.as_ref().unwrap();
        let got = drain_all(events);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].ctx, ErrorContext::PreDoneExit);
        assert!(got[0].err.is_some());
        assert_eq!(got[1].ctx, ErrorContext::Exit);
        assert!(got[1].err.is_none());
        assert!(events.is_closed());
    }

    /// S3: SubWithErrors hides a fatal exit from the root.
    #[test]
    fn s3_sub_with_errors_hides_fatal_from_root() {
        let root = Group::new_root(CancelScope::new());
        let s = root.sub_with_errors();

        let w = s.spawn();
        w.done(Some(WorkerError::new("boom")));

        let s_events = s.0.events.as_ref().unwrap();
        let s_got = drain_all(s_events);
        assert_eq!(s_got.len(), 1);
        assert_eq!(s_got[0].ctx, ErrorContext::Exit);
        assert!(s_got[0].err.is_some());
        assert!(s_events.is_closed());

        let root_events = root.0.events.as_ref().unwrap();
        let r_got = drain_all(root_events);
        assert_eq!(r_got.len(), 2);
        assert_eq!(r_got[0].ctx, ErrorContext::LocalChan);
        assert!(r_got[0].err.is_some());
        assert_eq!(r_got[1].ctx, ErrorContext::Exit);
        assert!(r_got[1].err.is_none());
        assert!(root_events.is_closed());
        assert!(root.end().is_closed());
    }

    /// S6: enable_termination(Prevent)/Allow cascade.
    #[test]
    fn s6_enable_termination_cascade() {
        let root = Group::new_root(CancelScope::new());
        let s = root.sub_no_errors();

        s.enable_termination(false); // Prevent

        let w = root.spawn();
        w.done(None);
        assert!(!root.end().is_closed(), "root must not close while S is prevented");

        s.enable_termination(true); // Allow
        assert!(root.end().is_closed(), "root must close once S allows termination");
    }

    #[test]
    fn spawn_after_termination_panics() {
        let root = Group::new_root(CancelScope::new());
        let w = root.spawn();
        w.done(None);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| root.spawn()));
        assert!(result.is_err());
    }

    #[test]
    fn empty_group_enable_termination_allow_terminates_immediately() {
        let root = Group::new_root(CancelScope::new());
        let s = root.sub_no_errors();
        s.enable_termination(false);
        let transitioned = s.enable_termination(true);
        assert!(transitioned);
        assert!(s.end().is_closed());
    }

    #[test]
    fn first_fatal_fires_once() {
        let root = Group::new_root(CancelScope::new());
        let observer = root.first_fatal();
        let w1 = root.spawn();
        let w2 = root.spawn();
        w1.done(Some(WorkerError::new("first")));
        let got = observer.wait();
        assert!(got.is_some());
        w2.done(Some(WorkerError::new("second")));
        // first_fatal only ever reflects the first fatal error.
        assert!(got.unwrap().err.is_some());
    }

    /// A sub-group's `cancel()` must not cancel its parent's scope: each
    /// sub-group gets its own `ctx.child()`, not an alias of the parent's.
    #[test]
    fn sub_group_cancel_does_not_cancel_parent() {
        let root = Group::new_root(CancelScope::new());
        let s = root.sub_no_errors();

        s.ctx().cancel();

        assert!(s.ctx().is_done());
        assert!(!root.ctx().is_done(), "cancelling a sub-group must not cancel its parent");
    }

    /// Three levels deep (Root -> A -> B), a worker spawned on B must
    /// increment every ancestor's `wg`, and completing it must balance
    /// every ancestor back to zero so each one can still terminate.
    #[test]
    fn spawn_increments_wg_on_every_ancestor_three_levels_deep() {
        let root = Group::new_root(CancelScope::new());
        let a = root.sub_no_errors();
        let b = a.sub_no_errors();

        let w = b.spawn();
        w.done(None);

        assert!(b.end().is_closed());
        assert!(a.end().is_closed());
        assert!(root.end().is_closed());
    }

    /// Same three-level shape, but with `SubWithErrors` groups: a clean
    /// exit on the deepest group must still balance every ancestor's `wg`,
    /// not just the immediate parent's.
    #[test]
    fn sub_with_errors_clean_exit_balances_wg_three_levels_deep() {
        let root = Group::new_root(CancelScope::new());
        let a = root.sub_with_errors();
        let b = a.sub_with_errors();

        let w = b.spawn();
        w.done(None);

        assert!(b.end().is_closed());
        assert!(a.end().is_closed());
        assert!(root.end().is_closed());
    }

    /// A fatal exit three levels deep through nested `SubWithErrors`
    /// groups must still balance every ancestor's `wg` (the synthetic
    /// clean-exit forward must itself keep forwarding, not stop at the
    /// first ancestor).
    #[test]
    fn sub_with_errors_fatal_exit_balances_wg_three_levels_deep() {
        let root = Group::new_root(CancelScope::new());
        let a = root.sub_with_errors();
        let b = a.sub_with_errors();

        let w = b.spawn();
        w.done(Some(WorkerError::new("boom")));

        assert!(b.end().is_closed());
        assert!(a.end().is_closed());
        assert!(root.end().is_closed());

        // B's fatal stays local to B, visible to A only as a LocalChan
        // notification plus A's own synthetic clean completion.
        let a_events = a.0.events.as_ref().unwrap();
        let a_got = drain_all(a_events);
        assert_eq!(a_got.len(), 2);
        assert_eq!(a_got[0].ctx, ErrorContext::LocalChan);
        assert!(a_got[0].err.is_some());
        assert_eq!(a_got[1].ctx, ErrorContext::Exit);
        assert!(a_got[1].err.is_none());

        // Root only ever sees A's own (synthetic, clean) completion: the
        // LocalChan notification travels one hop only, to A.
        let root_events = root.0.events.as_ref().unwrap();
        let r_got = drain_all(root_events);
        assert_eq!(r_got.len(), 1);
        assert_eq!(r_got[0].ctx, ErrorContext::Exit);
        assert!(r_got[0].err.is_none());
    }

    /// A worker body that panics must still call `done`, with the panic
    /// converted into a fatal error, rather than leaking a `wg` unit.
    #[test]
    fn spawn_with_converts_a_panicking_body_into_a_fatal_done() {
        let root = Group::new_root(CancelScope::new());
        let handle = root.spawn_with(Some("panicky".into()), |_worker| {
            panic!("worker body exploded");
        });
        handle.join().unwrap();

        let events = root.0.events.as_ref().unwrap();
        let got = drain_all(events);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ctx, ErrorContext::Exit);
        assert!(got[0].err.is_some());
        assert!(root.end().is_closed());
    }

    /// A worker body that runs to completion cleanly reports no error.
    #[test]
    fn spawn_with_runs_a_clean_body_to_completion() {
        let root = Group::new_root(CancelScope::new());
        let handle = root.spawn_with(None, |_worker| None);
        handle.join().unwrap();

        let events = root.0.events.as_ref().unwrap();
        let got = drain_all(events);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ctx, ErrorContext::Exit);
        assert!(got[0].err.is_none());
    }
}
