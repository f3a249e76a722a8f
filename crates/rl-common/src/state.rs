//! Run-loop lifecycle state machine.
//!
//! State transitions follow the scheduler thread's lifetime:
//! CREATED → RUNNING → STOPPING → STOPPED
//!
//! A loop whose thread never came up goes straight from CREATED to STOPPED.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunLoopState {
    /// Instance allocated, thread not yet observed running.
    #[default]
    Created,
    /// Thread is ticking entries.
    Running,
    /// Stop requested; the thread exits at its next wake.
    Stopping,
    /// Thread has exited.
    Stopped,
}

impl fmt::Display for RunLoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl RunLoopState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: RunLoopState) -> bool {
        use RunLoopState::{Created, Running, Stopped, Stopping};

        matches!(
            (self, target),
            (Created, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
                // Stop requested before the thread got going
                | (Created, Stopping)
                // Spawn failure
                | (Created, Stopped)
        )
    }
}

/// State machine wrapper counting validated transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: RunLoopState,
    transition_count: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in CREATED.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RunLoopState::Created,
            transition_count: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> RunLoopState {
        self.current
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStateTransition`] if `target` is not
    /// reachable from the current state.
    pub fn transition(&mut self, target: RunLoopState) -> CoreResult<()> {
        if self.current.can_transition_to(target) {
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}
