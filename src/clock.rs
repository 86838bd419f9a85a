//! Monotonic nanosecond clock capability
//!
//! The profiler timestamps block intervals with a monotonic clock. The
//! trait seam keeps the hot path testable: production uses
//! `CLOCK_MONOTONIC`, tests and trace replay drive a `ManualClock`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic nanosecond clock.
///
/// Implementations must be cheap and non-blocking: `now_ns` runs once or
/// twice per context switch.
pub trait Clock: Send + Sync {
    /// Current monotonic time in nanoseconds.
    fn now_ns(&self) -> u64;
}

impl<C: Clock> Clock for Arc<C> {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}

/// Production clock backed by `clock_gettime(CLOCK_MONOTONIC)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid, writable timespec; CLOCK_MONOTONIC is
        // always available on Linux.
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
    }
}

/// Settable clock for tests and trace replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start_ns`.
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    /// Set the current time.
    pub fn set(&self, ns: u64) {
        self.now.store(ns, Ordering::Relaxed);
    }

    /// Advance the current time by `delta_ns`.
    pub fn advance(&self, delta_ns: u64) {
        self.now.fetch_add(delta_ns, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}
