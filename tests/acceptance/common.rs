//! Common utilities for integration tests.

#![allow(dead_code)] // Not every helper is used by every test module

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Invocation counter shared between a test and a tick callback.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback that bumps this counter on every invocation.
    pub fn tick(&self) -> impl FnMut(f64) + Send + 'static {
        let inner = Arc::clone(&self.0);
        move |_: f64| {
            inner.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Poll `cond` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Expected invocation count for `elapsed` at `period`, with slack.
///
/// Random phases allow one invocation more or less than `elapsed / period`;
/// `late_slack` covers wakes lost to a loaded machine.
pub fn expected_range(elapsed: Duration, period: Duration, late_slack: u64) -> (u64, u64) {
    let whole = u64::try_from(elapsed.as_micros() / period.as_micros()).unwrap_or(u64::MAX);
    (whole.saturating_sub(1 + late_slack), whole + 1)
}

/// Assert `count` lies in `range`, naming the entry on failure.
pub fn assert_in_range(name: &str, count: u64, range: (u64, u64)) {
    assert!(
        (range.0..=range.1).contains(&count),
        "{name}: {count} invocations, expected {}..={}",
        range.0,
        range.1
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_tick() {
        let counter = Counter::new();
        let mut tick = counter.tick();
        tick(0.0);
        tick(0.01);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_expected_range() {
        let range = expected_range(Duration::from_millis(100), Duration::from_millis(10), 0);
        assert_eq!(range, (9, 11));

        let range = expected_range(Duration::from_millis(100), Duration::from_millis(25), 1);
        assert_eq!(range, (2, 5));
    }

    #[test]
    fn test_wait_until() {
        assert!(wait_until(Duration::from_millis(10), || true));

        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(20), || false));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
