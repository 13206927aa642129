//! Unbound MPSC event stream (spec §4.6).
//!
//! Producers must never block or drop an event because a consumer is
//! slow; the consumer must observe every event sent before `close`.
//! Built directly on `crossbeam-channel`'s unbounded channel (already a
//! teacher dependency — `rayon-core/Cargo.toml` depends on
//! `crossbeam-channel` for its own sleep/injector machinery) plus a small
//! latch-based close/drain wrapper for the §4.6 edge-triggered channels.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

use crate::latch::{Latch, WaitCh};

/// An unbounded, close-able MPSC event stream.
pub struct EventStream<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    closed: AtomicBool,
    pending: AtomicUsize,
    data_latch: Mutex<Latch>,
    empty_latch: Mutex<Latch>,
}

impl<T> EventStream<T> {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let empty_latch = Latch::new();
        empty_latch.close(); // a brand new stream starts empty.
        EventStream {
            sender,
            receiver,
            closed: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            data_latch: Mutex::new(Latch::new()),
            empty_latch: Mutex::new(empty_latch),
        }
    }

    /// Sends an event. Never blocks, never drops. Panics if the stream
    /// has already been closed (spec: "after close `send` panics").
    pub fn send(&self, event: T) {
        if self.closed.load(Ordering::Acquire) {
            panic!("taskgrove: send on a closed EventStream");
        }
        // crossbeam's unbounded sender only errs if every receiver has
        // been dropped, which cannot happen here: `self` always holds one.
        self.sender.send(event).ok();
        if self.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            self.data_latch.lock().unwrap().close();
            *self.empty_latch.lock().unwrap() = Latch::new();
        }
    }

    /// Idempotent. After close, `send` panics; `next` still drains
    /// whatever was enqueued before close.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the next event, or `None` only once the stream is closed
    /// *and* fully drained.
    pub fn next(&self) -> Option<T> {
        loop {
            if let Ok(event) = self.receiver.try_recv() {
                if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    *self.data_latch.lock().unwrap() = Latch::new();
                    self.empty_latch.lock().unwrap().close();
                }
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                // One last race: an event may have been sent between our
                // failed try_recv and observing `closed`.
                if let Ok(event) = self.receiver.try_recv() {
                    return Some(event);
                }
                return None;
            }
            // Not closed and currently empty: block for the next send.
            self.data_wait_ch().wait();
        }
    }

    /// Edge-triggered: closes when an element becomes available. Rearmed
    /// (a fresh latch is installed) the next time the stream is drained
    /// to empty, so a caller that calls this again after draining will
    /// wait for the *next* arrival rather than observe a stale close.
    pub fn data_wait_ch(&self) -> WaitCh {
        self.data_latch.lock().unwrap().wait_ch()
    }

    /// A channel that closes once the stream is drained to empty.
    ///
    /// When `close_on_empty` is `true`, the returned handle is a private
    /// one-shot snapshot: once it observes empty, it stays closed forever
    /// regardless of later arrivals. When `false`, the handle is backed
    /// by the shared, auto-rearming empty-latch, so a fresh call after a
    /// later refill-and-redrain cycle observes the new cycle rather than
    /// a stale one.
    pub fn empty_ch(&self, close_on_empty: bool) -> WaitCh {
        if close_on_empty {
            let snapshot = Latch::new();
            if self.pending.load(Ordering::Acquire) == 0 {
                snapshot.close();
            } else {
                let ch = self.empty_latch.lock().unwrap().wait_ch();
                let snap_clone = snapshot.clone();
                std::thread::spawn(move || {
                    ch.wait();
                    snap_clone.close();
                });
            }
            snapshot.wait_ch()
        } else {
            self.empty_latch.lock().unwrap().wait_ch()
        }
    }
}

impl<T> Default for EventStream<T> {
    fn default() -> Self {
        EventStream::new()
    }
}
