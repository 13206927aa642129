//! Hybrid access manager (spec §4.7).
//!
//! Many concurrent lock-free writers update a counter triple; a reader can
//! request a consistent snapshot by temporarily forcing writers onto a
//! mutex, without starving either side. The bit-packed `state` word and
//! the writer/reader protocols below are transcribed directly from spec
//! §4.7 (rayon-core has no reader/writer hybrid lock of its own — only
//! plain atomic ref-counting — so the *protocol* is spec-original; the
//! CAS-loop style and `Ordering` choices follow `rayon-core/src/registry.rs`'s
//! `terminate_count` discipline). `crossbeam-utils::CachePadded` (a teacher
//! dependency) keeps `state` and `lockers` off each other's cache line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam_utils::CachePadded;

const LOCK_MODE_BIT: u64 = 1;
const TICKET_DELTA: u64 = 2;

/// A token returned by [`AccessManager::request_access`], naming the path
/// a writer actually took.
pub enum Ticket {
    Atomic,
    Exclusive,
}

/// A minimal exclusive lock with manual `acquire`/`release` (rather than a
/// RAII guard), so a [`Ticket::Exclusive`] can be handed back across
/// function boundaries without fighting the borrow checker over a guard's
/// lifetime.
struct RawLock {
    held: Mutex<bool>,
    cond: Condvar,
}

impl RawLock {
    fn new() -> Self {
        RawLock {
            held: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.cond.wait(held).unwrap();
        }
        *held = true;
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap();
        *held = false;
        drop(held);
        self.cond.notify_one();
    }
}

/// The hybrid reader/writer primitive guarding a counter triple.
pub struct AccessManager {
    access_lock: RawLock,
    lockers: CachePadded<AtomicU64>,
    control_lock: Mutex<()>,
    state: CachePadded<AtomicU64>,
}

impl AccessManager {
    pub fn new() -> Self {
        AccessManager {
            access_lock: RawLock::new(),
            lockers: CachePadded::new(AtomicU64::new(0)),
            control_lock: Mutex::new(()),
            state: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Writer protocol. Wait-free unless a reader has set lock-mode, in
    /// which case this queues on `access_lock` behind the reader (and any
    /// writers ahead of it).
    pub fn request_access(&self) -> Ticket {
        loop {
            let cur = self.state.load(Ordering::Acquire);
            if cur & LOCK_MODE_BIT == 0 {
                match self.state.compare_exchange_weak(
                    cur,
                    cur + TICKET_DELTA,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Ticket::Atomic,
                    Err(_) => continue,
                }
            } else {
                self.access_lock.acquire();
                return Ticket::Exclusive;
            }
        }
    }

    pub fn relinquish_access(&self, ticket: Ticket) {
        match ticket {
            Ticket::Atomic => {
                self.state.fetch_sub(TICKET_DELTA, Ordering::AcqRel);
            }
            Ticket::Exclusive => self.access_lock.release(),
        }
    }

    /// Convenience wrapper running `f` under a writer ticket.
    pub fn with_writer<R>(&self, f: impl FnOnce() -> R) -> R {
        let ticket = self.request_access();
        let r = f();
        self.relinquish_access(ticket);
        r
    }

    /// Reader protocol: blocks new atomic writers, waits only for
    /// in-flight ones to relinquish, then takes exclusive access.
    pub fn lock(&self) {
        self.lockers.fetch_add(1, Ordering::AcqRel);

        if self.state.load(Ordering::Acquire) & LOCK_MODE_BIT == LOCK_MODE_BIT {
            self.access_lock.acquire();
            return;
        }

        {
            let _guard = self.control_lock.lock().unwrap();
            loop {
                let cur = self.state.load(Ordering::Acquire);
                if cur & LOCK_MODE_BIT == LOCK_MODE_BIT {
                    break;
                }
                if self
                    .state
                    .compare_exchange(
                        cur,
                        cur | LOCK_MODE_BIT,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    break;
                }
            }
        }

        // Spin-wait (read-only) for in-flight atomic writers to relinquish.
        while self.state.load(Ordering::Acquire) != LOCK_MODE_BIT {
            std::hint::spin_loop();
        }

        self.access_lock.acquire();
    }

    pub fn unlock(&self) {
        let remaining = self.lockers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining > 0 {
            self.access_lock.release();
            return;
        }

        {
            let _guard = self.control_lock.lock().unwrap();
            if self.lockers.load(Ordering::Acquire) == 0 {
                let cur = self.state.load(Ordering::Acquire);
                if cur & LOCK_MODE_BIT == LOCK_MODE_BIT {
                    let _ = self.state.compare_exchange(
                        cur,
                        cur & !LOCK_MODE_BIT,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
            }
        }

        self.access_lock.release();
    }

    /// Convenience wrapper running `f` under exclusive reader access.
    pub fn with_reader<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock();
        let r = f();
        self.unlock();
        r
    }
}

impl Default for AccessManager {
    fn default() -> Self {
        AccessManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn writer_ticket_round_trips_wait_free() {
        let am = AccessManager::new();
        let ticket = am.request_access();
        am.relinquish_access(ticket);
        assert_eq!(am.state.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reader_excludes_concurrent_exclusive_access() {
        let am = Arc::new(AccessManager::new());
        let counter = Arc::new(StdAtomicU64::new(0));

        am.lock();
        let am2 = Arc::clone(&am);
        let counter2 = Arc::clone(&counter);
        let handle = thread::spawn(move || {
            am2.lock();
            counter2.fetch_add(1, Ordering::SeqCst);
            am2.unlock();
        });
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), 0, "second reader must block");
        am.unlock();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reader_waits_for_in_flight_writers_then_proceeds() {
        let am = Arc::new(AccessManager::new());
        let ticket = am.request_access(); // in-flight writer

        let am2 = Arc::clone(&am);
        let locked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let locked2 = Arc::clone(&locked);
        let handle = thread::spawn(move || {
            am2.lock();
            locked2.store(true, Ordering::SeqCst);
            am2.unlock();
        });

        thread::sleep(Duration::from_millis(30));
        assert!(
            !locked.load(Ordering::SeqCst),
            "reader must wait for the in-flight writer"
        );
        am.relinquish_access(ticket);
        handle.join().unwrap();
        assert!(locked.load(Ordering::SeqCst));
    }

    #[test]
    fn new_writers_queue_behind_an_active_reader() {
        let am = Arc::new(AccessManager::new());
        am.lock();

        let am2 = Arc::clone(&am);
        let got_ticket = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let got_ticket2 = Arc::clone(&got_ticket);
        let handle = thread::spawn(move || {
            let ticket = am2.request_access();
            got_ticket2.store(true, Ordering::SeqCst);
            am2.relinquish_access(ticket);
        });

        thread::sleep(Duration::from_millis(30));
        assert!(!got_ticket.load(Ordering::SeqCst));
        am.unlock();
        handle.join().unwrap();
        assert!(got_ticket.load(Ordering::SeqCst));
    }

    #[test]
    fn ticket_bits_never_leak() {
        let am = AccessManager::new();
        for _ in 0..1000 {
            let t = am.request_access();
            am.relinquish_access(t);
        }
        assert_eq!(am.state.load(Ordering::SeqCst), 0);
    }
}
