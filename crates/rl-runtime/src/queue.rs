//! Blocking single-consumer message queue.
//!
//! A [`RingBuffer`] behind one mutex, with a condition variable that lets a
//! consumer sleep until something is pushed. Any number of threads may push;
//! the queue is meant to be drained by one dedicated consumer thread. When
//! several threads wait at once, which of them gets the next message is up
//! to the condition variable.
//!
//! ```text
//!  producer ─┐
//!  producer ─┼─ push ─▶ [ Mutex<RingBuffer> ] ─ notify_one ─▶ wait ─ consumer
//!  producer ─┘
//! ```

use crate::ring::RingBuffer;
use rl_common::message::Message;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Thread-safe FIFO with a blocking `wait`.
#[derive(Debug)]
pub struct SyncQueue<T = Message> {
    ring: Mutex<RingBuffer<T>>,
    ready: Condvar,
}

impl<T: Copy + Default> SyncQueue<T> {
    /// Create a queue with the default 128 slots.
    #[must_use]
    pub fn new() -> Self {
        Self::from_ring(RingBuffer::new())
    }

    /// Create a queue with `slots` slots (at least 2).
    #[must_use]
    pub fn with_capacity(slots: usize) -> Self {
        Self::from_ring(RingBuffer::with_capacity(slots))
    }
}

impl<T: Copy + Default> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> SyncQueue<T> {
    fn from_ring(ring: RingBuffer<T>) -> Self {
        Self {
            ring: Mutex::new(ring),
            ready: Condvar::new(),
        }
    }

    // Ring operations never panic mid-update, so a poisoned lock still
    // guards consistent indices.
    fn lock(&self) -> MutexGuard<'_, RingBuffer<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `value` and wake one waiter.
    ///
    /// Returns `false` if the queue is full; nothing is signalled then.
    pub fn push(&self, value: T) -> bool {
        let pushed = self.lock().push(value);
        if pushed {
            self.ready.notify_one();
        }
        pushed
    }

    /// Block until a value is available, then remove and return it.
    pub fn wait(&self) -> T {
        let mut ring = self.lock();
        loop {
            if let Some(value) = ring.pull() {
                return value;
            }
            ring = self
                .ready
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), but give up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let ring = self.lock();
        let (mut ring, _) = self
            .ready
            .wait_timeout_while(ring, timeout, |ring| ring.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        ring.pull()
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of values held at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }
}
