//! Tick metrics for run-loop monitoring.
//!
//! Keeps a ring buffer of per-wake tick durations (time spent running due
//! callbacks) plus running totals, allocation-free after construction.

use serde::Serialize;
use std::time::Duration;

/// Wake lateness above which a wake counts as late, in microseconds.
pub const LATE_WAKE_THRESHOLD_US: u64 = 1_000;

/// Per-wake statistics for one run loop.
#[derive(Debug)]
pub struct TickMetrics {
    /// Ring buffer of tick durations in microseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total wakes of the loop thread.
    total_wakes: u64,
    /// Total callback invocations across all entries.
    total_invocations: u64,
    /// Minimum observed tick duration.
    min_us: u64,
    /// Maximum observed tick duration.
    max_us: u64,
    /// Sum of all tick durations for mean calculation.
    sum_us: u64,
    /// Wakes that arrived noticeably after their deadline.
    late_wakes: u64,
}

impl TickMetrics {
    /// Create a metrics collector retaining `histogram_size` samples.
    #[must_use]
    pub fn new(histogram_size: usize) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_wakes: 0,
            total_invocations: 0,
            min_us: u64::MAX,
            max_us: 0,
            sum_us: 0,
            late_wakes: 0,
        }
    }

    /// Record one wake of the loop thread.
    ///
    /// * `tick_us` - time spent iterating entries and running callbacks.
    /// * `fired` - number of callbacks invoked during this wake.
    /// * `lateness_us` - how far past its requested deadline the thread woke.
    pub fn record_wake(&mut self, tick_us: u64, fired: u64, lateness_us: u64) {
        self.samples[self.write_pos] = tick_us;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_wakes += 1;
        self.total_invocations += fired;
        self.min_us = self.min_us.min(tick_us);
        self.max_us = self.max_us.max(tick_us);
        self.sum_us = self.sum_us.wrapping_add(tick_us);

        if lateness_us > LATE_WAKE_THRESHOLD_US {
            self.late_wakes += 1;
        }
    }

    /// Total wakes recorded.
    #[must_use]
    pub fn total_wakes(&self) -> u64 {
        self.total_wakes
    }

    /// Total callback invocations recorded.
    #[must_use]
    pub fn total_invocations(&self) -> u64 {
        self.total_invocations
    }

    /// Number of late wakes.
    #[must_use]
    pub fn late_wakes(&self) -> u64 {
        self.late_wakes
    }

    /// Compute a percentile (0.0 to 100.0) of the retained tick durations.
    ///
    /// Returns `None` if no samples have been collected or if percentile is out of range.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        let idx = idx.min(sorted.len() - 1);

        Some(Duration::from_micros(sorted[idx]))
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> TickMetricsSnapshot {
        let any = self.total_wakes > 0;
        TickMetricsSnapshot {
            total_wakes: self.total_wakes,
            total_invocations: self.total_invocations,
            min_us: any.then_some(self.min_us),
            max_us: any.then_some(self.max_us),
            mean_us: any.then(|| self.sum_us / self.total_wakes),
            p99_us: self
                .percentile(99.0)
                .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX)),
            late_wakes: self.late_wakes,
            sample_count: self.sample_count,
        }
    }
}

/// Immutable snapshot of tick metrics for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickMetricsSnapshot {
    /// Total wakes of the loop thread.
    pub total_wakes: u64,
    /// Total callback invocations.
    pub total_invocations: u64,
    /// Minimum tick duration in microseconds.
    pub min_us: Option<u64>,
    /// Maximum tick duration in microseconds.
    pub max_us: Option<u64>,
    /// Mean tick duration in microseconds.
    pub mean_us: Option<u64>,
    /// 99th percentile of the retained tick durations in microseconds.
    pub p99_us: Option<u64>,
    /// Number of late wakes.
    pub late_wakes: u64,
    /// Number of samples in the histogram.
    pub sample_count: usize,
}

impl TickMetricsSnapshot {
    /// Get jitter (max - min) in microseconds.
    #[must_use]
    pub fn jitter_us(&self) -> Option<u64> {
        match (self.min_us, self.max_us) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
