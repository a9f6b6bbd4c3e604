//! Approximate event counter with probabilistic sampling.

use std::sync::atomic::{AtomicI64, Ordering};

/// A low-contention counter that trades accuracy for cheap increments.
///
/// Only increments whose `random` value lands on the sampling mask update
/// the shared value, and each sampled increment adds the whole sampling
/// period, so the approximate value tracks the true count in expectation
/// while touching the cache line once per `precision` events.
#[derive(Debug)]
pub struct StochasticCounter {
    mask: u32,
    value: AtomicI64,
}

impl StochasticCounter {
    /// Sampling period used by the registry's operation counter.
    pub const DEFAULT_PRECISION: u32 = 16;

    /// A counter sampling roughly one in `precision` increments.
    ///
    /// `precision` is rounded up to a power of two; zero means every
    /// increment is sampled.
    pub fn new(precision: u32) -> Self {
        let mask = precision.next_power_of_two().saturating_sub(1);
        Self {
            mask,
            value: AtomicI64::new(0),
        }
    }

    /// Register one event.
    ///
    /// Returns the new approximate value when this increment was sampled,
    /// `None` when it was discarded. `random` should be uncorrelated with
    /// the call sites (callers pass a randomized key hash).
    #[inline]
    pub fn increment(&self, random: u32) -> Option<i64> {
        if random & self.mask != 0 {
            return None;
        }
        let step = i64::from(self.mask) + 1;
        Some(self.value.fetch_add(step, Ordering::Relaxed) + step)
    }

    /// Current approximate value.
    #[inline]
    pub fn approx_value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Overwrite the approximate value; used to reset after a prune pass.
    #[inline]
    pub fn set_approx_value(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }
}

impl Default for StochasticCounter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PRECISION)
    }
}
