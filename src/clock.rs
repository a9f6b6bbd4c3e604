//! Injectable monotonic time source for keep-alive bookkeeping.
//!
//! The registry's pruner compares access times against keep-alive windows
//! and must not depend on wall-clock stability, so all timestamps are
//! [`Moment`]s read from a [`MomentClock`]. Production code uses
//! [`CoarseClock`]; tests drive a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// A monotonic timestamp, in nanoseconds since an arbitrary process-local
/// anchor.
///
/// Moments from different clocks are not comparable; the registry only ever
/// compares moments read from its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Moment(u64);

impl Moment {
    /// The anchor itself.
    pub const ZERO: Self = Self(0);

    /// Construct a moment from raw nanoseconds since the anchor.
    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Raw nanoseconds since the anchor.
    #[inline]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Shift this moment forward, saturating at the representable maximum.
    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// Duration elapsed since `earlier`, or zero if `earlier` is newer.
    #[inline]
    pub fn saturating_since(self, earlier: Moment) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

/// Source of [`Moment`]s.
///
/// Implementations must be monotone: `now()` never moves backwards.
pub trait MomentClock: Send + Sync + 'static {
    /// The current moment.
    fn now(&self) -> Moment;
}

static ANCHOR: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Millisecond-coarse monotonic clock backed by [`Instant`].
///
/// Coarse resolution is deliberate: keep-alive windows are long relative to
/// a millisecond, and truncation keeps repeated `touch()` calls cheap to
/// compare.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoarseClock;

impl MomentClock for CoarseClock {
    fn now(&self) -> Moment {
        let millis = ANCHOR.elapsed().as_millis() as u64;
        Moment(millis.saturating_mul(1_000_000))
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// A clock starting at [`Moment::ZERO`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Set the clock to an absolute moment.
    pub fn set(&self, moment: Moment) {
        self.nanos.store(moment.as_nanos(), Ordering::Relaxed);
    }
}

impl MomentClock for ManualClock {
    fn now(&self) -> Moment {
        Moment(self.nanos.load(Ordering::Relaxed))
    }
}
