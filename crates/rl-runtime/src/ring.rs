//! Fixed-capacity circular FIFO with no internal synchronization.
//!
//! Storage is allocated once at construction. `head` is the next slot to
//! write and `tail` the next slot to read, both taken modulo the slot count.
//! One slot is always left free so that `head == tail` means empty and
//! `head + 1 == tail` means full; a buffer of N slots holds at most N - 1
//! values.
//!
//! There is no locking here. A single producer and a single consumer may use
//! a buffer only if their calls never overlap; anything else needs an outer
//! lock (see [`crate::queue::SyncQueue`] and [`crate::bus::Bus`]).

use rl_common::config::DEFAULT_CAPACITY;

/// Fixed-capacity ring buffer of copyable values.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// Slot storage, length fixed at construction.
    slots: Box<[T]>,
    /// Next slot to write.
    head: usize,
    /// Next slot to read.
    tail: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a buffer with the default 128 slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer with `slots` slots (at least 2).
    #[must_use]
    pub fn with_capacity(slots: usize) -> Self {
        let slots = slots.max(2);
        Self {
            slots: vec![T::default(); slots].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }
}

impl<T: Copy + Default> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> RingBuffer<T> {
    /// Append `value`. Returns `false` without touching the buffer if full.
    #[inline]
    pub fn push(&mut self, value: T) -> bool {
        let next = self.advance(self.head);
        if next == self.tail {
            return false;
        }
        self.slots[self.head] = value;
        self.head = next;
        true
    }

    /// Remove and return the oldest value, or `None` if empty.
    #[inline]
    pub fn pull(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.slots[self.tail];
        self.tail = self.advance(self.tail);
        Some(value)
    }

    /// Return the oldest value without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        (!self.is_empty()).then(|| self.slots[self.tail])
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Number of values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.head + self.slots.len() - self.tail) % self.slots.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// True when the next push would be rejected.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.advance(self.head) == self.tail
    }

    /// Maximum number of values held at once (slot count minus one).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    #[inline]
    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }
}
