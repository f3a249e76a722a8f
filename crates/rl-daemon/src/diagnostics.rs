//! Traffic counters and the shutdown report.
//!
//! Callbacks on the run-loop thread and the queue consumer thread update
//! [`DiagnosticsState`] with relaxed atomics; the main thread turns it into a
//! [`DiagnosticsSnapshot`] once everything has stopped.

use rl_common::metrics::TickMetricsSnapshot;
use rl_common::state::RunLoopState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared counters updated by the demo's producers and consumers.
#[derive(Debug)]
pub struct DiagnosticsState {
    /// Samples produced by the sampler entry.
    samples: AtomicU64,
    /// Messages accepted by the queue.
    queued: AtomicU64,
    /// Messages rejected because the queue was full.
    queue_rejected: AtomicU64,
    /// Messages taken off the queue by the consumer thread.
    consumed: AtomicU64,
    /// Messages drained from the bus.
    bus_received: AtomicU64,
    /// Daemon start time.
    start_time: Instant,
}

impl Default for DiagnosticsState {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsState {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            queue_rejected: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            bus_received: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one sample and whether the queue accepted it. Returns the sample number.
    pub fn record_sample(&self, queued: bool) -> u64 {
        if queued {
            self.queued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.queue_rejected.fetch_add(1, Ordering::Relaxed);
        }
        self.samples.fetch_add(1, Ordering::Relaxed)
    }

    /// Record one message taken off the queue.
    pub fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` messages drained from the bus.
    pub fn record_bus_received(&self, count: u64) {
        self.bus_received.fetch_add(count, Ordering::Relaxed);
    }

    /// Get uptime since daemon start.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Build the final report.
    pub fn snapshot(
        &self,
        state: RunLoopState,
        bus_dropped: u64,
        tick: TickMetricsSnapshot,
    ) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            state,
            uptime_ms: u64::try_from(self.uptime().as_millis()).unwrap_or(u64::MAX),
            samples: self.samples.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            queue_rejected: self.queue_rejected.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            bus_received: self.bus_received.load(Ordering::Relaxed),
            bus_dropped,
            tick,
        }
    }
}

/// Point-in-time view of the daemon's traffic.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Run-loop lifecycle state.
    pub state: RunLoopState,
    /// Time since start, in milliseconds.
    pub uptime_ms: u64,
    /// Samples produced.
    pub samples: u64,
    /// Samples accepted by the queue.
    pub queued: u64,
    /// Samples rejected by a full queue.
    pub queue_rejected: u64,
    /// Samples consumed from the queue.
    pub consumed: u64,
    /// Messages drained from the bus.
    pub bus_received: u64,
    /// Messages the bus dropped on overflow.
    pub bus_dropped: u64,
    /// Run-loop tick statistics.
    pub tick: TickMetricsSnapshot,
}

impl DiagnosticsSnapshot {
    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
