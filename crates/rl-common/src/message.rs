//! Tagged messages carried by queues and the bus.
//!
//! A message is a 32-bit label plus an 8-byte payload. The label tells the
//! receiver how to read the payload; the buffers never look inside.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::fmt;

/// Message payload, interpreted according to the message label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// 64-bit float.
    F64(f64),
    /// 32-bit float.
    F32(f32),
}

impl Default for Payload {
    fn default() -> Self {
        Self::U64(0)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I64(v) => write!(f, "{v}i64"),
            Self::U64(v) => write!(f, "{v}u64"),
            Self::F64(v) => write!(f, "{v}f64"),
            Self::F32(v) => write!(f, "{v}f32"),
        }
    }
}

/// A labelled, copyable message.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Application-defined tag.
    pub label: u32,
    /// Value carried by the message.
    pub payload: Payload,
}

// Messages are copied by value through every buffer slot.
const_assert!(std::mem::size_of::<Message>() <= 24);

impl Message {
    /// Create a message from a label and payload.
    #[must_use]
    pub const fn new(label: u32, payload: Payload) -> Self {
        Self { label, payload }
    }

    /// Signed integer message.
    #[must_use]
    pub const fn i64(label: u32, value: i64) -> Self {
        Self::new(label, Payload::I64(value))
    }

    /// Unsigned integer message.
    #[must_use]
    pub const fn u64(label: u32, value: u64) -> Self {
        Self::new(label, Payload::U64(value))
    }

    /// 64-bit float message.
    #[must_use]
    pub const fn f64(label: u32, value: f64) -> Self {
        Self::new(label, Payload::F64(value))
    }

    /// 32-bit float message.
    #[must_use]
    pub const fn f32(label: u32, value: f32) -> Self {
        Self::new(label, Payload::F32(value))
    }

    /// Payload as `i64`, if it was sent as one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self.payload {
            Payload::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Payload as `u64`, if it was sent as one.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self.payload {
            Payload::U64(v) => Some(v),
            _ => None,
        }
    }

    /// Payload as `f64`, if it was sent as one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self.payload {
            Payload::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Payload as `f32`, if it was sent as one.
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match self.payload {
            Payload::F32(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}={}", self.label, self.payload)
    }
}
