//! Lock-protected message bus.
//!
//! The bus is a [`RingBuffer`] of [`Message`]s behind one mutex, without any
//! signalling. Typed `send_*` calls take the lock for a single insert and drop
//! the message (with a warning) when the bus is full. Readers either call
//! [`Bus::receive`] for one message, or open a [`BusTransaction`] with
//! [`Bus::lock`] to receive and send several messages while holding the lock.
//! The transaction releases the lock when it goes out of scope.

use crate::ring::RingBuffer;
use rl_common::message::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Multi-reader message bus with caller-managed transactions.
#[derive(Debug)]
pub struct Bus {
    ring: Mutex<RingBuffer<Message>>,
    /// Messages dropped on overflow since creation.
    dropped: AtomicU64,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Create a bus with the default 128 slots.
    #[must_use]
    pub fn new() -> Self {
        Self::from_ring(RingBuffer::new())
    }

    /// Create a bus with `slots` slots (at least 2).
    #[must_use]
    pub fn with_capacity(slots: usize) -> Self {
        Self::from_ring(RingBuffer::with_capacity(slots))
    }

    fn from_ring(ring: RingBuffer<Message>) -> Self {
        Self {
            ring: Mutex::new(ring),
            dropped: AtomicU64::new(0),
        }
    }

    /// Take the bus lock for a multi-message transaction.
    ///
    /// Other senders and receivers block until the returned guard is dropped.
    pub fn lock(&self) -> BusTransaction<'_> {
        BusTransaction {
            bus: self,
            ring: self.ring.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Publish `msg`. Returns `false` if the bus was full and `msg` was dropped.
    pub fn send(&self, msg: Message) -> bool {
        self.lock().send(msg)
    }

    /// Publish a signed integer under `label`.
    pub fn send_i64(&self, label: u32, value: i64) -> bool {
        self.send(Message::i64(label, value))
    }

    /// Publish an unsigned integer under `label`.
    pub fn send_u64(&self, label: u32, value: u64) -> bool {
        self.send(Message::u64(label, value))
    }

    /// Publish a 64-bit float under `label`.
    pub fn send_f64(&self, label: u32, value: f64) -> bool {
        self.send(Message::f64(label, value))
    }

    /// Publish a 32-bit float under `label`.
    pub fn send_f32(&self, label: u32, value: f32) -> bool {
        self.send(Message::f32(label, value))
    }

    /// Remove and return the oldest message, if any.
    pub fn receive(&self) -> Option<Message> {
        self.lock().receive_fast()
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of messages dropped because the bus was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Maximum number of messages held at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().ring.capacity()
    }
}

/// Exclusive access to a [`Bus`] for the lifetime of the guard.
///
/// All operations on one transaction are atomic with respect to every other
/// bus user.
#[derive(Debug)]
pub struct BusTransaction<'a> {
    bus: &'a Bus,
    ring: MutexGuard<'a, RingBuffer<Message>>,
}

impl BusTransaction<'_> {
    /// Remove and return the oldest message without re-taking the lock.
    #[inline]
    pub fn receive_fast(&mut self) -> Option<Message> {
        self.ring.pull()
    }

    /// Publish `msg` inside the transaction. Drops it if the bus is full.
    pub fn send(&mut self, msg: Message) -> bool {
        if self.ring.push(msg) {
            return true;
        }
        let dropped = self.bus.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            label = msg.label,
            capacity = self.ring.capacity(),
            dropped,
            "Bus overflow, message dropped"
        );
        false
    }

    /// Receive every buffered message in order.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        // Reborrow so the iterator does not capture the guard's lifetime.
        let ring: &mut RingBuffer<Message> = &mut self.ring;
        std::iter::from_fn(move || ring.pull())
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Number of messages currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
