use thiserror::Error;

/// Core error types covering configuration, thread lifecycle and runtime faults.
///
/// Buffer overflow is deliberately absent: a full queue or bus is an expected
/// steady-state condition reported through `bool` returns, not an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operating system refused to create a run-loop thread.
    #[error("failed to spawn thread `{name}`: {reason}")]
    ThreadSpawn {
        /// Name of the thread that could not be created.
        name: String,
        /// Underlying OS error text.
        reason: String,
    },

    /// Generic runtime fault.
    #[error("runtime fault: {0}")]
    Fault(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
