//! Error types for registry and lock operations.

use std::fmt;

use crate::computed::ComputedState;

/// System-level registry errors.
///
/// Internal retries (lost map CAS races, spin loops in `register`) never
/// surface here; only contract violations and cooperative cancellation do.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// `unregister` was called for a computation that is not invalidated.
    ///
    /// Removing a still-reachable entry would break the at-most-one-live
    /// guarantee consumers rely on, so the call is rejected instead.
    WrongComputedState {
        /// The state the computation was actually in.
        actual: ComputedState,
    },

    /// A component was constructed with an unsupported configuration.
    InvalidConfiguration {
        /// Description of the rejected configuration.
        reason: String,
    },

    /// The same logical task tried to re-acquire a lock-set key it already
    /// holds.
    ReentrantLock {
        /// Debug representation of the offending key.
        key: String,
    },

    /// The operation was cancelled via its cancellation token.
    Cancelled,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::WrongComputedState { actual } => {
                write!(f, "computation must be invalidated, but was {actual:?}")
            }
            RegistryError::InvalidConfiguration { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            RegistryError::ReentrantLock { key } => {
                write!(f, "lock for {key} is already held by the current task")
            }
            RegistryError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for RegistryError {}
