//! Monotonic microsecond clock source.
//!
//! Every timestamp in the workspace is a plain `u64` count of microseconds
//! from an arbitrary, process-local epoch. Only differences are meaningful.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Microseconds since a process-local epoch.
pub type Timestamp = u64;

/// Microseconds per second.
pub const USEC_PER_SEC: u64 = 1_000_000;

/// Source of monotonic microsecond timestamps.
pub trait Clock: Send + Sync {
    /// Current time in microseconds. Never decreases.
    fn now_us(&self) -> Timestamp;
}

/// `Instant`-backed clock with its epoch fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_us(&self) -> Timestamp {
        duration_to_us(self.epoch.elapsed())
    }
}

/// Process-wide monotonic timestamp in microseconds.
///
/// The epoch is fixed by the first call.
pub fn microtime() -> Timestamp {
    static CLOCK: OnceLock<MonotonicClock> = OnceLock::new();
    CLOCK.get_or_init(MonotonicClock::new).now_us()
}

/// Clock that only moves when told to. Intended for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock reading `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock forward by `us` microseconds.
    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::AcqRel);
    }

    /// Set the clock to `us`; ignored if it would move backwards.
    pub fn set(&self, us: Timestamp) {
        self.now.fetch_max(us, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> Timestamp {
        self.now.load(Ordering::Acquire)
    }
}

/// Convert a `Duration` to whole microseconds, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub fn duration_to_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
