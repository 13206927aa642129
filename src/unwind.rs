//! Panic-to-error conversion helpers, reconstructed from the call sites in
//! `rayon-core/src/registry.rs` (`unwind::AbortIfPanic`,
//! `unwind::halt_unwinding`) since the module itself was not retrieved.
//!
//! Panic discipline (spec §5, §7): the only required panic-to-error
//! conversion is around user callbacks (`on_first_fatal`, worker bodies).
//! Everywhere else, a panic indicates a programming error (double-`done`,
//! spawn-after-end) and must propagate, not be swallowed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Runs `f`, catching any panic and returning it as an `Err` instead of
/// unwinding further. Used only around user-supplied callbacks.
pub fn halt_unwinding<F, R>(f: F) -> Result<R, Box<dyn Any + Send + 'static>>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// A guard that aborts the process if it is dropped while unwinding.
///
/// `rayon-core` installs this around worker main-loop sections that must
/// never panic (because a panic there would leave shared registry state
/// in an invalid condition that other threads would then observe). The
/// caller must `mem::forget` the guard once the protected section
/// completes without panicking.
pub struct AbortIfPanic;

impl Drop for AbortIfPanic {
    fn drop(&mut self) {
        eprintln!("taskgrove: unexpected panic in a section that must not unwind; aborting");
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_unwinding_catches_panics() {
        let result = halt_unwinding(|| -> i32 { panic!("boom") });
        assert!(result.is_err());
    }

    #[test]
    fn halt_unwinding_passes_through_values() {
        let result = halt_unwinding(|| 7);
        assert_eq!(result.unwrap(), 7);
    }
}
