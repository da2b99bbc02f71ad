//! Monotonic time as a seam, so the expiry window is testable.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Monotonic microsecond clock.
pub trait TimeSource: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Wall-clock-backed source; microseconds since construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

/// Hand-cranked clock for tests.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            now: AtomicI64::new(0),
        }
    }

    pub fn advance_us(&self, us: i64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now_us(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
