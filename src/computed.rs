//! The computation contract the registry operates on.
//!
//! The registry never looks inside a computation's value or its dependency
//! edges; it only needs the input fingerprint, the consistency state, and
//! the access-time bookkeeping defined here.

use std::time::Duration;

use crate::clock::Moment;
use crate::input::ComputedInput;

/// Consistency state of a computation.
///
/// Transitions are monotone: `Computing -> Consistent -> Invalidated`, with
/// `invalidate()` permitted from either earlier state. Once invalidated, a
/// computation never leaves that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComputedState {
    /// The producer is still running.
    Computing,
    /// The cached value is consistent with its inputs.
    Consistent,
    /// Terminal: an input changed and the value must not be used.
    Invalidated,
}

impl ComputedState {
    /// Whether this is the terminal state.
    #[inline]
    pub fn is_invalidated(&self) -> bool {
        matches!(self, ComputedState::Invalidated)
    }
}

/// Per-computation registry options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComputedOptions {
    /// How long after the last access the registry keeps a strong pin on
    /// the computation. Once the window expires the pruner demotes the
    /// entry to weak-only and the computation lives or dies with its
    /// outside references.
    pub keep_alive_time: Duration,
}

impl ComputedOptions {
    /// Options with the given keep-alive window.
    pub fn with_keep_alive(keep_alive_time: Duration) -> Self {
        Self { keep_alive_time }
    }
}

/// A memoized computation, opaque to the registry.
///
/// Implementations own the value, the dependency graph, and the state
/// machine; the registry only reads the state, touches access times, and
/// asks for invalidation when replacing a predecessor. `invalidate()` must
/// be idempotent and is expected to call
/// [`ComputedRegistry::unregister`](crate::ComputedRegistry::unregister)
/// once the transition lands.
pub trait Computed: Send + Sync + 'static {
    /// Current consistency state.
    fn state(&self) -> ComputedState;

    /// The immutable input fingerprint this computation was produced for.
    fn input(&self) -> &ComputedInput;

    /// Registry options for this computation.
    fn options(&self) -> ComputedOptions;

    /// Moment of the most recent `touch()`.
    fn last_access_time(&self) -> Moment;

    /// Record an access, refreshing the keep-alive window.
    fn touch(&self);

    /// Drive the transition to [`ComputedState::Invalidated`]. Idempotent.
    fn invalidate(&self);
}
