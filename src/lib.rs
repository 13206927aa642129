//! Hierarchical, cancellable, observable thread-groups.
//!
//! A [`Group`] is a node in a tree of cooperating threads: spawn workers
//! with [`Group::spawn`], nest a sub-group with [`Group::sub_no_errors`]
//! or [`Group::sub_with_errors`], and observe completion via
//! [`Group::end`] or the group's error [`EventStream`]. See `DESIGN.md`
//! for the grounding of each module and the resolved design questions.

pub mod access;
pub mod cancel;
pub mod counter;
pub mod debug_logger;
pub mod error;
pub mod event_stream;
pub mod group;
pub mod id;
pub mod latch;
pub mod location;
pub mod unwind;
pub mod wait_group;
pub mod worker;

pub use access::{AccessManager, Ticket};
pub use cancel::{CancelErr, CancelScope};
pub use counter::{Counter, Datapoint, RateCounter};
pub use debug_logger::DebugLoggerHandle;
pub use error::{ErrorContext, GoError, WorkerError};
pub use event_stream::EventStream;
pub use group::{DebugMode, DebugSink, FirstFatal, Group, GroupKind, GroupOptions};
pub use id::{EntityId, EntityKind};
pub use latch::{Latch, WaitCh};
pub use location::{Location, Stack};
pub use wait_group::CountedWait;
pub use worker::{ThreadInfo, Worker, WorkerRef};
