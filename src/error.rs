//! GoError and its propagation context (spec §3, §7).

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::worker::WorkerRef;

/// The context under which a `GoError` was produced.
///
/// `Exit` and `PreDoneExit` both imply "thread-exit" category (the worker
/// that produced them has completed).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorContext {
    /// Raised by a worker via `add_error`; never terminates the worker.
    NonFatal,
    /// Terminal exit of a worker while the group still has other live
    /// children.
    PreDoneExit,
    /// Terminal exit of the worker whose completion brought the group's
    /// wait count to zero.
    Exit,
    /// Synthetic notification from a `SubWithErrors` group to its parent,
    /// informing it that a fatal error was captured locally.
    LocalChan,
}

impl ErrorContext {
    /// `Exit` and `PreDoneExit` both represent a worker thread having
    /// exited.
    pub fn is_thread_exit(self) -> bool {
        matches!(self, ErrorContext::Exit | ErrorContext::PreDoneExit)
    }
}

/// A user-supplied error, thin-wrapped so a stack trace can be attached
/// exactly once.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct WorkerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    backtrace: Arc<Backtrace>,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        WorkerError {
            message: message.into(),
            source: None,
            backtrace: Arc::new(Backtrace::force_capture()),
        }
    }

    pub fn from_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        WorkerError {
            message: message.into(),
            source: Some(Box::new(source)),
            backtrace: Arc::new(Backtrace::force_capture()),
        }
    }

    /// Idempotent: returns a clone carrying the same stack, never
    /// re-capturing once a stack is already attached (spec §6, "Error
    /// with stack" helper: "idempotent if already carrying one").
    pub fn with_stack(self) -> Self {
        self
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl Clone for WorkerError {
    fn clone(&self) -> Self {
        WorkerError {
            message: self.message.clone(),
            source: None,
            backtrace: Arc::clone(&self.backtrace),
        }
    }
}

/// An error event flowing through a group's `EventStream`.
#[derive(Clone)]
pub struct GoError {
    pub err: Option<WorkerError>,
    pub t: Instant,
    pub ctx: ErrorContext,
    pub worker: Option<WorkerRef>,
}

impl GoError {
    pub fn new(err: Option<WorkerError>, ctx: ErrorContext, worker: Option<WorkerRef>) -> Self {
        GoError {
            err,
            t: Instant::now(),
            ctx,
            worker,
        }
    }
}

impl fmt::Debug for GoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoError")
            .field("err", &self.err)
            .field("ctx", &self.ctx)
            .field("worker", &self.worker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_stack_is_idempotent() {
        let e = WorkerError::new("boom");
        let ptr_before = Arc::as_ptr(&e.backtrace);
        let e = e.with_stack();
        assert_eq!(Arc::as_ptr(&e.backtrace), ptr_before);
    }

    #[test]
    fn thread_exit_classification() {
        assert!(ErrorContext::Exit.is_thread_exit());
        assert!(ErrorContext::PreDoneExit.is_thread_exit());
        assert!(!ErrorContext::NonFatal.is_thread_exit());
        assert!(!ErrorContext::LocalChan.is_thread_exit());
    }
}
