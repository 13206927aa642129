//! Debug thread-logger (spec §4.11).
//!
//! Arms on the owning group's cancellation via `on_pre_cancel`, then ticks
//! once a second printing live workers until the group's `end` latch
//! closes. Grounded on `rayon-core/src/registry.rs`'s own `LOG!` call
//! sites (a dedicated background thread, gated by a debug flag, printing
//! registry state) — here rebuilt around this crate's `Group::threads()`
//! and the `pre_cancel_listener` hook instead of rayon's static `LOG_ENV`.

use std::time::Duration;

use crate::group::Group;
use crate::latch::{Latch, WaitCh};

/// A handle to a running debug logger; dropping it does not stop the
/// logger (only the group's termination does) but lets a caller wait for
/// it to actually start printing.
#[derive(Clone)]
pub struct DebugLoggerHandle {
    armed: WaitCh,
}

impl DebugLoggerHandle {
    /// Blocks until the logger has armed (i.e. the group started
    /// cancelling and the first tick is imminent).
    pub fn wait_armed(&self) {
        self.armed.wait();
    }
}

pub(crate) struct DebugLogger {
    armed: Latch,
}

impl DebugLogger {
    pub(crate) fn attach(group: Group) -> DebugLogger {
        let armed = Latch::new();
        let armed_for_listener = armed.clone();
        let group_for_listener = group.clone();
        group.ctx().on_pre_cancel(move || {
            armed_for_listener.close();
            let end = group_for_listener.end();
            let group_for_thread = group_for_listener.clone();
            std::thread::Builder::new()
                .name("taskgrove-debug-logger".into())
                .spawn(move || loop {
                    let threads = group_for_thread.threads();
                    group_for_thread.log_line(&format!(
                        "group {} cancelling: {} live worker(s)",
                        group_for_thread.id(),
                        threads.len()
                    ));
                    for t in &threads {
                        group_for_thread.log_line(&format!(
                            "  worker created at {} ({})",
                            t.creator_loc,
                            t.label.as_deref().unwrap_or("<unlabeled>")
                        ));
                    }
                    if end.is_closed() {
                        break;
                    }
                    std::thread::sleep(Duration::from_secs(1));
                    if end.is_closed() {
                        break;
                    }
                })
                .expect("failed to spawn debug logger thread");
        });
        DebugLogger { armed }
    }

    pub(crate) fn handle(&self) -> DebugLoggerHandle {
        DebugLoggerHandle {
            armed: self.armed.wait_ch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cancel::CancelScope;
    use crate::group::Group;

    #[test]
    fn logger_arms_on_cancel_and_stops_at_end() {
        let root = Group::new_root(CancelScope::new());
        let handle = root.attach_debug_logger();

        let w = root.spawn();
        w.register(Some("watched-worker".into()));

        root.cancel();
        handle.wait_armed();

        w.done(None);
        root.wait();
    }
}
