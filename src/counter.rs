//! Monotonic counter triple, rate counter, and datapoint (spec §4.8, §2-H).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::access::AccessManager;
use crate::group::Group;

/// `(value, running, max)`, guarded by an [`AccessManager`].
///
/// `value` only ever increases; `running` can go up and down but never
/// below zero; `max` is the highest `running` ever observed.
pub struct Counter {
    value: AtomicU64,
    running: AtomicU64,
    max: AtomicU64,
    access: AccessManager,
}

impl Counter {
    pub fn new() -> Self {
        Counter {
            value: AtomicU64::new(0),
            running: AtomicU64::new(0),
            max: AtomicU64::new(0),
            access: AccessManager::new(),
        }
    }

    fn update_max(&self, r: u64) {
        let mut cur = self.max.load(Ordering::Acquire);
        while r > cur {
            match self.max.compare_exchange_weak(
                cur,
                r,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn inc(&self) {
        self.access.with_writer(|| {
            self.value.fetch_add(1, Ordering::AcqRel);
            let new_running = self.running.fetch_add(1, Ordering::AcqRel) + 1;
            self.update_max(new_running);
        });
    }

    pub fn dec(&self) {
        self.access.with_writer(|| {
            let mut cur = self.running.load(Ordering::Acquire);
            while cur > 0 {
                match self.running.compare_exchange_weak(
                    cur,
                    cur - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => cur = actual,
                }
            }
        });
    }

    /// `delta > 0` behaves like repeated `inc`; `delta < 0` saturates
    /// `running` at zero rather than underflowing.
    pub fn add(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        self.access.with_writer(|| {
            if delta > 0 {
                self.value.fetch_add(delta as u64, Ordering::AcqRel);
                let new_running = self.running.fetch_add(delta as u64, Ordering::AcqRel) + delta as u64;
                self.update_max(new_running);
            } else {
                let step = (-delta) as u64;
                let mut cur = self.running.load(Ordering::Acquire);
                loop {
                    let sub = step.min(cur);
                    match self.running.compare_exchange_weak(
                        cur,
                        cur - sub,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => cur = actual,
                    }
                }
            }
        });
    }

    /// A consistent snapshot of all three fields with respect to any
    /// already-completed writer op.
    pub fn get(&self) -> (u64, u64, u64) {
        self.access.with_reader(|| {
            (
                self.value.load(Ordering::Acquire),
                self.running.load(Ordering::Acquire),
                self.max.load(Ordering::Acquire),
            )
        })
    }

    /// Like `get`, but swaps each field to zero atomically (w.r.t. other
    /// ops) as part of the same exclusive section.
    pub fn get_and_reset(&self) -> (u64, u64, u64) {
        self.access.with_reader(|| {
            (
                self.value.swap(0, Ordering::AcqRel),
                self.running.swap(0, Ordering::AcqRel),
                self.max.swap(0, Ordering::AcqRel),
            )
        })
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::new()
    }
}

/// A single rate sample: wall-clock time plus the triple observed then.
#[derive(Copy, Clone, Debug)]
pub struct Datapoint {
    pub t: Instant,
    pub value: u64,
    pub running: u64,
    pub max: u64,
}

/// The derivative of `value` over time, sampled on a fixed period.
///
/// Per spec §2 ("a Rate-Counter is scheduled by a periodic task hosted in
/// a subordinate thread-group"), the sampling loop runs as a worker in a
/// dedicated no-errors sub-group of whatever group owns the rate counter,
/// rather than a bare detached thread — so cancelling the owning group's
/// scope stops sampling the same way it stops any other worker.
pub struct RateCounter {
    latest: Mutex<Option<Datapoint>>,
    rate_per_sec: AtomicU64Bits,
}

/// `f64` has no atomic type in `std`; store its bit pattern in an
/// `AtomicU64` instead of taking a mutex on the hot read path.
struct AtomicU64Bits(AtomicU64);

impl AtomicU64Bits {
    fn new(v: f64) -> Self {
        AtomicU64Bits(AtomicU64::new(v.to_bits()))
    }
    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

impl RateCounter {
    pub fn new() -> Self {
        RateCounter {
            latest: Mutex::new(None),
            rate_per_sec: AtomicU64Bits::new(0.0),
        }
    }

    /// The most recent rate, in units of `value` per second.
    pub fn rate_per_sec(&self) -> f64 {
        self.rate_per_sec.load()
    }

    pub fn latest_datapoint(&self) -> Option<Datapoint> {
        *self.latest.lock().unwrap()
    }

    fn sample(&self, counter: &Counter, previous: &mut Option<Datapoint>) {
        let (value, running, max) = counter.get();
        let now = Instant::now();
        let point = Datapoint {
            t: now,
            value,
            running,
            max,
        };
        if let Some(prev) = *previous {
            let elapsed = now.saturating_duration_since(prev.t).as_secs_f64();
            if elapsed > 0.0 {
                let rate = (point.value.saturating_sub(prev.value)) as f64 / elapsed;
                self.rate_per_sec.store(rate);
            }
        }
        *self.latest.lock().unwrap() = Some(point);
        *previous = Some(point);
    }

    /// Spawns the periodic sampling worker in a no-errors sub-group of
    /// `parent`, sampling `counter` every `period` until `parent`'s scope
    /// (or any ancestor's) is cancelled. The sampling loop runs under
    /// `Group::spawn_with`'s panic guard, so a panic inside `sample`
    /// becomes a fatal error delivered through `done` instead of silently
    /// killing the sampler thread.
    pub fn spawn_in(
        self: std::sync::Arc<Self>,
        parent: &Group,
        counter: std::sync::Arc<Counter>,
        period: Duration,
    ) {
        let sampler_group = parent.sub_no_errors();
        let rate_counter = self;
        sampler_group.spawn_with(Some("rate-sampler".into()), move |worker| {
            let done_ch = worker.context().done();
            let mut previous = None;
            loop {
                rate_counter.sample(&counter, &mut previous);
                if done_ch.is_closed() {
                    break;
                }
                std::thread::sleep(period);
                if done_ch.is_closed() {
                    break;
                }
            }
            None
        });
    }
}

impl Default for RateCounter {
    fn default() -> Self {
        RateCounter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn inc_updates_value_running_and_max_together() {
        let c = Counter::new();
        c.inc();
        c.inc();
        assert_eq!(c.get(), (2, 2, 2));
        c.dec();
        assert_eq!(c.get(), (2, 1, 2));
    }

    #[test]
    fn dec_at_zero_is_a_noop() {
        let c = Counter::new();
        c.dec();
        assert_eq!(c.get(), (0, 0, 0));
    }

    #[test]
    fn add_negative_saturates_running_at_zero() {
        let c = Counter::new();
        c.add(3);
        c.add(-10);
        assert_eq!(c.get(), (3, 0, 3));
    }

    #[test]
    fn add_zero_is_a_noop() {
        let c = Counter::new();
        c.add(0);
        assert_eq!(c.get(), (0, 0, 0));
    }

    #[test]
    fn get_and_reset_zeroes_all_three_fields() {
        let c = Counter::new();
        c.add(5);
        assert_eq!(c.get_and_reset(), (5, 5, 5));
        assert_eq!(c.get(), (0, 0, 0));
    }

    /// Scenario S4: 8 threads each `inc()` 10_000 times concurrently with a
    /// 9th thread polling `get()`; every snapshot must have
    /// `running <= max <= final value`.
    #[test]
    fn concurrent_inc_with_concurrent_get_stays_consistent() {
        let counter = Arc::new(Counter::new());
        let incrementers: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        c.inc();
                    }
                })
            })
            .collect();

        let reader = {
            let c = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let (_, running, max) = c.get();
                    assert!(running <= max);
                    assert!(max <= 80_000);
                }
            })
        };

        for h in incrementers {
            h.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(counter.get(), (80_000, 80_000, 80_000));
    }
}
