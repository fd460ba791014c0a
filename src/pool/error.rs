//! Pool error types.

use std::fmt;

/// Errors surfaced by pool operations.
#[derive(Debug, Clone)]
pub enum PoolError {
    /// The exclusive pool lock was not acquired within the flush timeout.
    LockTimeout {
        /// How long the caller waited before giving up, in milliseconds.
        waited_ms: u64,
    },

    /// The pool was cleared after a fatal lifecycle failure.
    Corrupted {
        /// The failing operation, e.g. "failed to create instance 3".
        context: String,
        /// The underlying cause reported by the lifecycle hook.
        cause: String,
    },

    /// The pool is shutting down; no further workers will be handed out.
    Shutdown,
}

impl PoolError {
    /// Check if this is a lock timeout.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, PoolError::LockTimeout { .. })
    }

    /// Check if this is a fatal corruption error.
    pub fn is_corrupted(&self) -> bool {
        matches!(self, PoolError::Corrupted { .. })
    }

    /// Check if this is a shutdown error.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PoolError::Shutdown)
    }

    /// The underlying hook failure, if any.
    pub fn cause(&self) -> Option<&str> {
        match self {
            PoolError::Corrupted { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// The cause string carried into an error pill.
    pub(crate) fn cause_message(&self) -> String {
        match self {
            PoolError::Corrupted { cause, .. } => cause.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::LockTimeout { waited_ms } => {
                write!(f, "pool lock not acquired within {}ms", waited_ms)
            }
            PoolError::Corrupted { context, cause } => {
                write!(f, "pool corrupted: {}: {}", context, cause)
            }
            PoolError::Shutdown => {
                write!(f, "pool is shutting down")
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
