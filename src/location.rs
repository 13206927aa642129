//! Code-location and stack capture (spec §4.2, §6).
//!
//! This is the core's only externally-replaceable contract: production
//! integrations may prefer a symbolizing backtrace crate, a sampling
//! profiler hook, or a no-op stub in hot loops. The concrete implementation
//! here uses only the standard library, exactly the way the closest
//! reference in the example pack does (`std::backtrace::Backtrace`).

use std::backtrace::Backtrace;
use std::fmt;

/// File, line, and function name of a call site, captured at construction
/// of a `Worker` or `Group` from the spawn/new statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub fn_name: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.file, self.line, self.fn_name)
    }
}

impl Location {
    /// Captures the caller's location. `#[track_caller]` gives us the
    /// call site without a frame-skip count; `skip` is retained in the
    /// signature for parity with the spec's `capture_here(skip)` contract
    /// and is honored only when greater than 0 by walking a freshly
    /// captured backtrace instead of the track-caller fast path.
    #[track_caller]
    pub fn capture_here(skip: u32) -> Location {
        if skip == 0 {
            let loc = std::panic::Location::caller();
            Location {
                file: loc.file().to_string(),
                line: loc.line(),
                fn_name: current_fn_name(),
            }
        } else {
            capture_stack(skip)
                .frames
                .into_iter()
                .next()
                .map(|f| Location {
                    file: f.file_line.clone(),
                    line: 0,
                    fn_name: f.function,
                })
                .unwrap_or_else(|| Location {
                    file: "<unknown>".to_string(),
                    line: 0,
                    fn_name: "<unknown>".to_string(),
                })
        }
    }
}

/// Best-effort current function name. `std` has no stable API for this
/// outside of a captured backtrace's symbol table, so we derive it from one.
fn current_fn_name() -> String {
    capture_stack(1)
        .frames
        .into_iter()
        .next()
        .map(|f| f.function)
        .unwrap_or_else(|| "<unknown>".to_string())
}

/// A single resolved stack frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub function: String,
    pub file_line: String,
}

/// A captured, parsed stack trace (spec §4.2).
#[derive(Clone, Debug)]
pub struct Stack {
    pub os_thread_id: u64,
    pub frames: Vec<Frame>,
    /// The "created by" frame: function name and OS thread id of the
    /// thread that spawned this one, present unless this is the process's
    /// main entry thread.
    pub created_by: Option<(String, u64)>,
}

/// Captures the current thread's stack, skipping `skip` innermost frames
/// (typically the frames belonging to this capture routine itself).
///
/// Safe to call from any thread; bounded by `Backtrace`'s own frame limit,
/// so this never allocates unboundedly.
pub fn capture_stack(skip: u32) -> Stack {
    let bt = Backtrace::force_capture();
    let rendered = format!("{bt}");
    let frames: Vec<Frame> = rendered
        .lines()
        .skip(skip as usize)
        .filter(|l| !l.trim().is_empty())
        .map(|l| Frame {
            function: l.trim().to_string(),
            file_line: String::new(),
        })
        .collect();

    Stack {
        os_thread_id: os_thread_id(),
        frames,
        created_by: None,
    }
}

/// A stable-enough proxy for "OS thread id": the address of a thread-local
/// byte, unique per live thread for the process's duration. `std` does not
/// expose the real OS tid in a portable, stable way.
pub fn os_thread_id() -> u64 {
    thread_local! {
        static MARK: u8 = const { 0 };
    }
    MARK.with(|m| m as *const u8 as u64)
}
