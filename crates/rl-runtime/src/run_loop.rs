//! Threaded periodic run loop.
//!
//! Each [`RunLoop`] owns one thread that sleeps until the nearest entry is
//! due, runs every due callback, and goes back to sleep:
//!
//! 1. Sleep on the wake condvar until `t + interval` (or until signalled)
//! 2. Exit if a stop was requested
//! 3. `delta = now - t`, `t = now`
//! 4. Under the entry lock, subtract `delta` from every countdown; run the
//!    callbacks whose countdown reached zero and re-arm them
//! 5. Next `interval` = smallest remaining countdown, clamped to `max_wait`
//!
//! Re-arming adds the period to the remaining countdown instead of resetting
//! it, so an entry's long-run rate does not drift when a wake is late (see
//! [`CatchUpPolicy`] for what happens when it is late by whole periods).
//!
//! Entries are kept in an arena of slots linked in registration order, and
//! are addressed by generation-checked [`EntryHandle`]s. Register and
//! unregister are O(1) and may run on any thread while the loop ticks.
//!
//! The entry list and the stop/wake state are guarded by two separate locks,
//! so the loop never holds the entry lock while it sleeps.

use crossbeam_utils::CachePadded;
use rl_common::config::{CatchUpPolicy, CoreConfig, DEFAULT_MAX_WAIT};
use rl_common::error::{CoreError, CoreResult};
use rl_common::metrics::{TickMetrics, TickMetricsSnapshot};
use rl_common::state::{RunLoopState, StateMachine};
use rl_common::time::{duration_to_us, Clock, MonotonicClock, Timestamp, USEC_PER_SEC};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Callback invoked when an entry is due, with the wake delta in seconds.
pub type TickFn = Box<dyn FnMut(f64) + Send + 'static>;

/// Source of unique loop ids, so handles from one loop are rejected by another.
static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered entry, returned by [`RunLoop::register`].
///
/// A handle is valid until it is passed to [`RunLoop::unregister`]; the slot
/// it names may be reused afterwards, but the old handle will not match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    loop_id: u64,
    index: u32,
    generation: u32,
}

impl fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}v{}", self.loop_id, self.index, self.generation)
    }
}

struct Entry {
    tick: TickFn,
    period_us: i64,
    /// Microseconds until due; zero or negative means due now.
    countdown_us: i64,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// What one pass over the entries did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TickOutcome {
    /// Callbacks invoked.
    pub fired: u64,
    /// Smallest remaining countdown, floored at zero. `None` with no entries.
    pub next_due_us: Option<u64>,
}

/// Index-stable storage for entries, linked in registration order.
pub(crate) struct EntryArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    policy: CatchUpPolicy,
}

impl EntryArena {
    pub(crate) fn new(policy: CatchUpPolicy) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            policy,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn entry_mut(&mut self, index: u32) -> Option<&mut Entry> {
        self.slots.get_mut(index as usize)?.entry.as_mut()
    }

    /// Append an entry at the tail. Returns `(index, generation)`.
    pub(crate) fn insert(&mut self, tick: TickFn, period_us: i64, phase_us: i64) -> (u32, u32) {
        let entry = Entry {
            tick,
            period_us,
            countdown_us: phase_us,
            prev: self.tail,
            next: None,
        };

        let index = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            index
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            index
        };

        match self.tail.and_then(|t| self.entry_mut(t)) {
            Some(last) => last.next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        (index, self.slots[index as usize].generation)
    }

    /// Unlink and return the entry, or `None` if the handle is stale.
    pub(crate) fn remove(&mut self, index: u32, generation: u32) -> Option<TickFn> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        match entry.prev.and_then(|p| self.entry_mut(p)) {
            Some(prev) => prev.next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next.and_then(|n| self.entry_mut(n)) {
            Some(next) => next.prev = entry.prev,
            None => self.tail = entry.prev,
        }

        self.free.push(index);
        self.len -= 1;
        Some(entry.tick)
    }

    /// Drop every entry.
    pub(crate) fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(u32::try_from(index).unwrap_or(u32::MAX));
            }
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Advance every countdown by `delta_us` and run what is due, in
    /// registration order.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn tick(&mut self, delta_us: u64) -> TickOutcome {
        let delta = i64::try_from(delta_us).unwrap_or(i64::MAX);
        let delta_secs = delta_us as f64 / USEC_PER_SEC as f64;
        let policy = self.policy;

        let mut fired = 0;
        let mut soonest: Option<i64> = None;
        let mut cursor = self.head;

        while let Some(index) = cursor {
            let Some(entry) = self.entry_mut(index) else {
                break;
            };

            entry.countdown_us = entry.countdown_us.saturating_sub(delta);
            if entry.countdown_us <= 0 {
                (entry.tick)(delta_secs);
                fired += 1;
                entry.countdown_us = rearm(entry.countdown_us, entry.period_us, policy);
            }

            soonest = Some(soonest.map_or(entry.countdown_us, |s| s.min(entry.countdown_us)));
            cursor = entry.next;
        }

        TickOutcome {
            fired,
            next_due_us: soonest.map(|s| u64::try_from(s).unwrap_or(0)),
        }
    }
}

/// Countdown after a due entry has run. `countdown` is zero or negative.
fn rearm(countdown: i64, period: i64, policy: CatchUpPolicy) -> i64 {
    match policy {
        CatchUpPolicy::CatchUp => countdown.saturating_add(period),
        CatchUpPolicy::SkipMissed => match countdown.rem_euclid(period) {
            0 => period,
            r => r,
        },
    }
}

/// Convert a frequency to a period in microseconds.
///
/// # Panics
///
/// Panics if `frequency_hz` is not a positive finite number.
#[allow(clippy::cast_possible_truncation)]
fn period_from_frequency(frequency_hz: f64) -> i64 {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        error!(frequency_hz, "Run loop entry registered with invalid frequency");
        panic!("run loop frequency must be positive and finite, got {frequency_hz}");
    }
    // Saturating float-to-int cast; sub-microsecond periods become 1us.
    ((1e6 / frequency_hz) as i64).max(1)
}

/// Entry list plus the metrics recorded while holding it.
struct Schedule {
    arena: EntryArena,
    metrics: Option<TickMetrics>,
}

/// Lifecycle and wake flags, guarded by the wake mutex.
struct WakeState {
    lifecycle: StateMachine,
    stop: bool,
    /// Set when the entry list changed since the loop last looked at it.
    rescan: bool,
}

struct Shared {
    id: u64,
    name: String,
    max_wait_us: u64,
    clock: Arc<dyn Clock>,
    schedule: CachePadded<Mutex<Schedule>>,
    wake: CachePadded<Mutex<WakeState>>,
    wake_cv: Condvar,
}

impl Shared {
    fn lock_schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_wake(&self) -> MutexGuard<'_, WakeState> {
        self.wake.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the loop thread to recompute its deadline now.
    fn request_rescan(&self) {
        self.lock_wake().rescan = true;
        self.wake_cv.notify_all();
    }
}

/// Body of the loop thread.
fn loop_thread(shared: &Shared) {
    let clock = &*shared.clock;
    let mut t = clock.now_us();
    let mut interval = 0u64;

    let mut wake = shared.lock_wake();
    if wake.lifecycle.transition(RunLoopState::Running).is_err() {
        return;
    }
    shared.wake_cv.notify_all();
    debug!(run_loop = %shared.name, "Run loop thread started");

    loop {
        let deadline: Timestamp = t.saturating_add(interval);
        let now = clock.now_us();
        if !wake.stop && !wake.rescan && now < deadline {
            wake = shared
                .wake_cv
                .wait_timeout(wake, Duration::from_micros(deadline - now))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if wake.stop {
            break;
        }
        wake.rescan = false;
        drop(wake);

        let now = clock.now_us();
        let delta = now.saturating_sub(t);
        t = now;

        {
            let mut schedule = shared.lock_schedule();
            let outcome = schedule.arena.tick(delta);
            let tick_us = clock.now_us().saturating_sub(now);
            if let Some(metrics) = schedule.metrics.as_mut() {
                metrics.record_wake(tick_us, outcome.fired, now.saturating_sub(deadline));
            }

            interval = outcome
                .next_due_us
                .unwrap_or(shared.max_wait_us)
                .min(shared.max_wait_us);

            trace!(
                run_loop = %shared.name,
                delta_us = delta,
                fired = outcome.fired,
                next_interval_us = interval,
                "Tick"
            );
        }

        wake = shared.lock_wake();
    }

    if let Err(e) = wake.lifecycle.transition(RunLoopState::Stopped) {
        warn!(run_loop = %shared.name, "Unexpected run loop exit: {e}");
    }
    shared.wake_cv.notify_all();
    drop(wake);

    // Nobody joins a loop that was stopped from one of its own callbacks.
    shared.lock_schedule().arena.clear();
}

/// A thread that runs registered callbacks at their own frequencies.
///
/// Callbacks run on the loop thread while it holds the entry lock. They must
/// be short and must not block: a slow callback delays every other entry of
/// the same loop.
///
/// From inside a callback, these methods of the callback's own loop deadlock
/// on the entry lock: [`register`](Self::register),
/// [`register_with_phase`](Self::register_with_phase),
/// [`unregister`](Self::unregister), [`entry_count`](Self::entry_count),
/// [`metrics`](Self::metrics) and the `Debug` impl.
/// [`stop`](Self::stop) is allowed there: it returns without joining and the
/// thread exits after the current wake.
pub struct RunLoop {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("entries", &self.entry_count())
            .finish_non_exhaustive()
    }
}

impl RunLoop {
    /// Start a run loop named `name` with default settings.
    ///
    /// Blocks until the loop thread is running.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ThreadSpawn`] if the thread cannot be created.
    pub fn new(name: &str) -> CoreResult<Self> {
        RunLoopBuilder::new(name).spawn()
    }

    /// Start a run loop from the `[run_loop]` and `[metrics]` sections of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] for invalid settings and
    /// [`CoreError::ThreadSpawn`] if the thread cannot be created.
    pub fn from_config(config: &CoreConfig) -> CoreResult<Self> {
        config.validate()?;
        RunLoopBuilder::new(&config.run_loop.name)
            .config(config)
            .spawn()
    }

    fn spawn(builder: RunLoopBuilder) -> CoreResult<Self> {
        let metrics = (builder.histogram_size > 0).then(|| TickMetrics::new(builder.histogram_size));
        let shared = Arc::new(Shared {
            id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
            name: builder.name,
            max_wait_us: duration_to_us(builder.max_wait).max(1),
            clock: builder.clock,
            schedule: CachePadded::new(Mutex::new(Schedule {
                arena: EntryArena::new(builder.catch_up),
                metrics,
            })),
            wake: CachePadded::new(Mutex::new(WakeState {
                lifecycle: StateMachine::new(),
                stop: false,
                rescan: false,
            })),
            wake_cv: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(shared.name.replace('\0', ""))
            .spawn(move || loop_thread(&thread_shared))
            .map_err(|e| {
                let _ = shared.lock_wake().lifecycle.transition(RunLoopState::Stopped);
                CoreError::ThreadSpawn {
                    name: shared.name.clone(),
                    reason: e.to_string(),
                }
            })?;

        {
            let mut wake = shared.lock_wake();
            while wake.lifecycle.state() == RunLoopState::Created {
                wake = shared
                    .wake_cv
                    .wait(wake)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        debug!(run_loop = %shared.name, "Run loop started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Register `tick` to run `frequency_hz` times per second.
    ///
    /// The first invocation comes after a random fraction of the period, so
    /// entries registered together at the same frequency do not all fire on
    /// the same wake.
    ///
    /// # Panics
    ///
    /// Panics if `frequency_hz` is not a positive finite number.
    pub fn register<F>(&self, frequency_hz: f64, tick: F) -> EntryHandle
    where
        F: FnMut(f64) + Send + 'static,
    {
        let period_us = period_from_frequency(frequency_hz);
        let phase_us = rand::random::<u64>() % period_us.unsigned_abs();
        self.insert(Box::new(tick), period_us, i64::try_from(phase_us).unwrap_or(0))
    }

    /// Register `tick` with an explicit delay before its first invocation.
    ///
    /// # Panics
    ///
    /// Panics if `frequency_hz` is not a positive finite number.
    pub fn register_with_phase<F>(&self, frequency_hz: f64, phase: Duration, tick: F) -> EntryHandle
    where
        F: FnMut(f64) + Send + 'static,
    {
        let period_us = period_from_frequency(frequency_hz);
        let phase_us = i64::try_from(duration_to_us(phase)).unwrap_or(i64::MAX);
        self.insert(Box::new(tick), period_us, phase_us)
    }

    fn insert(&self, tick: TickFn, period_us: i64, phase_us: i64) -> EntryHandle {
        let (index, generation) = self
            .shared
            .lock_schedule()
            .arena
            .insert(tick, period_us, phase_us);
        let handle = EntryHandle {
            loop_id: self.shared.id,
            index,
            generation,
        };
        self.shared.request_rescan();

        debug!(run_loop = %self.shared.name, %handle, period_us, "Entry registered");
        handle
    }

    /// Remove an entry. Its callback is dropped once any in-flight call returns.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was already unregistered or belongs to another loop.
    pub fn unregister(&self, handle: EntryHandle) {
        let removed = if handle.loop_id == self.shared.id {
            self.shared
                .lock_schedule()
                .arena
                .remove(handle.index, handle.generation)
        } else {
            None
        };

        let Some(tick) = removed else {
            error!(run_loop = %self.shared.name, %handle, "Unregister with stale or foreign handle");
            panic!("run loop `{}`: handle {handle} is not registered", self.shared.name);
        };
        drop(tick);
        self.shared.request_rescan();

        debug!(run_loop = %self.shared.name, %handle, "Entry unregistered");
    }

    /// Stop the loop thread and drop every remaining entry.
    ///
    /// Waits for the current wake, if any, to finish. Calling `stop` again is
    /// a no-op. Called from one of the loop's own callbacks, it only requests
    /// the stop; the thread finishes the current wake, drops the entries and
    /// exits on its own.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Fault`] if the loop thread had panicked.
    pub fn stop(&self) -> CoreResult<()> {
        let Some(handle) = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        {
            let mut wake = self.shared.lock_wake();
            wake.stop = true;
            if let Err(e) = wake.lifecycle.transition(RunLoopState::Stopping) {
                warn!(run_loop = %self.shared.name, "Stop requested in unexpected state: {e}");
            }
            self.shared.wake_cv.notify_all();
        }

        if handle.thread().id() == thread::current().id() {
            debug!(run_loop = %self.shared.name, "Stop requested from a callback, not joining");
            return Ok(());
        }

        let joined = handle.join();

        {
            let mut wake = self.shared.lock_wake();
            if wake.lifecycle.state() != RunLoopState::Stopped {
                let _ = wake.lifecycle.transition(RunLoopState::Stopped);
            }
        }
        self.shared.lock_schedule().arena.clear();

        if let Err(e) = joined {
            error!(run_loop = %self.shared.name, "Run loop thread panicked: {e:?}");
            return Err(CoreError::Fault(format!(
                "run loop `{}` thread panicked",
                self.shared.name
            )));
        }

        debug!(run_loop = %self.shared.name, "Run loop stopped");
        Ok(())
    }

    /// Name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunLoopState {
        self.shared.lock_wake().lifecycle.state()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.shared.lock_schedule().arena.len()
    }

    /// Tick statistics so far. All zero when metrics are disabled.
    #[must_use]
    pub fn metrics(&self) -> TickMetricsSnapshot {
        self.shared
            .lock_schedule()
            .metrics
            .as_ref()
            .map(TickMetrics::snapshot)
            .unwrap_or_default()
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Run loop shutdown failed: {e}");
        }
    }
}

/// Builder for configuring a run loop before its thread starts.
pub struct RunLoopBuilder {
    name: String,
    max_wait: Duration,
    catch_up: CatchUpPolicy,
    histogram_size: usize,
    clock: Arc<dyn Clock>,
}

impl RunLoopBuilder {
    /// Create a builder for a loop named `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            max_wait: DEFAULT_MAX_WAIT,
            catch_up: CatchUpPolicy::default(),
            histogram_size: rl_common::config::MetricsConfig::default().histogram_size,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Longest sleep between wakes, even with nothing due.
    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Re-arm policy for late entries.
    #[must_use]
    pub fn catch_up(mut self, policy: CatchUpPolicy) -> Self {
        self.catch_up = policy;
        self
    }

    /// Number of tick samples kept for metrics; zero disables metrics.
    #[must_use]
    pub fn histogram_size(mut self, size: usize) -> Self {
        self.histogram_size = size;
        self
    }

    /// Time source for deltas and deadlines.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Apply the `[run_loop]` and `[metrics]` sections of `config`.
    #[must_use]
    pub fn config(mut self, config: &CoreConfig) -> Self {
        self.max_wait = config.run_loop.max_wait;
        self.catch_up = config.run_loop.catch_up;
        self.histogram_size = if config.metrics.enabled {
            config.metrics.histogram_size
        } else {
            0
        };
        self
    }

    /// Start the loop thread.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ThreadSpawn`] if the thread cannot be created.
    pub fn spawn(self) -> CoreResult<RunLoop> {
        RunLoop::spawn(self)
    }
}
