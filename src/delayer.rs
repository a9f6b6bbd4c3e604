//! Coalescing delay gate between an invalidation and the re-read it
//! triggers.
//!
//! Consumers call [`UpdateDelayer::delay`] before re-reading; external
//! "something changed, flush now" signals go through
//! [`UpdateDelayer::cancel_delays`], which coalesces bursts into a single
//! release of all in-flight waiters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, Level};

/// How long after a flush the previous error-delay promise completes.
/// Error-path waiters are held back this long so a flush cannot turn a
/// failing retry loop into a hot one.
const ERROR_FLUSH_LAG: Duration = Duration::from_secs(1);

/// Configuration for [`UpdateDelayer`].
#[derive(Debug, Clone)]
pub struct UpdateDelayerOptions {
    /// Base delay before a consumer re-reads after an invalidation.
    pub delay: Duration,
    /// Smallest extra delay applied after a failed re-read.
    pub min_extra_error_delay: Duration,
    /// Ceiling for the error backoff.
    pub max_extra_error_delay: Duration,
    /// Coalescing window for `cancel_delays(false)` bursts.
    pub cancel_delays_delay: Duration,
    /// Level used for delay/flush log events.
    pub log_level: Level,
}

impl Default for UpdateDelayerOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            min_extra_error_delay: Duration::from_secs(5),
            max_extra_error_delay: Duration::from_secs(120),
            cancel_delays_delay: Duration::from_millis(50),
            log_level: Level::DEBUG,
        }
    }
}

struct DelayerInner {
    options: UpdateDelayerOptions,
    /// Rotating single-use completion promises; waiters snapshot the
    /// current one before waiting, and a flush swaps in a fresh pending
    /// promise before completing the old one, so no snapshot is stranded.
    end_delay: ArcSwap<CancellationToken>,
    error_end_delay: ArcSwap<CancellationToken>,
    cancel_scheduled: AtomicBool,
}

/// Gates how fast a reactive consumer re-reads after an invalidation.
///
/// This is cheap to clone - all data is behind `Arc`.
#[derive(Clone)]
pub struct UpdateDelayer {
    inner: Arc<DelayerInner>,
}

impl Default for UpdateDelayer {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateDelayer {
    /// A delayer with default options.
    pub fn new() -> Self {
        Self::with_options(UpdateDelayerOptions::default())
    }

    /// A delayer with the given options.
    pub fn with_options(options: UpdateDelayerOptions) -> Self {
        Self {
            inner: Arc::new(DelayerInner {
                options,
                end_delay: ArcSwap::from_pointee(CancellationToken::new()),
                error_end_delay: ArcSwap::from_pointee(CancellationToken::new()),
                cancel_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// A zero-delay instance: every wait returns immediately.
    pub fn none() -> Self {
        Self::with_options(UpdateDelayerOptions {
            delay: Duration::ZERO,
            min_extra_error_delay: Duration::ZERO,
            max_extra_error_delay: Duration::ZERO,
            cancel_delays_delay: Duration::ZERO,
            log_level: Level::DEBUG,
        })
    }

    /// This delayer's configuration.
    pub fn options(&self) -> &UpdateDelayerOptions {
        &self.inner.options
    }

    /// Wait out the configured delay, an end-of-delay flush, or `cancel`,
    /// whichever comes first. Cancellation yields silently.
    pub async fn delay(&self, cancel: &CancellationToken) {
        let wait = self.inner.options.delay;
        if wait.is_zero() {
            return;
        }
        let end = self.inner.end_delay.load_full();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = end.cancelled() => {}
            _ = cancel.cancelled() => {}
        }
    }

    /// The extra wait applied before retry `try_index` after an error:
    /// `min_extra * sqrt(2)^(try_index - 1)`, capped at `max_extra`.
    pub fn extra_error_duration(&self, try_index: u32) -> Duration {
        let options = &self.inner.options;
        let min = options.min_extra_error_delay.as_secs_f64();
        let max = options.max_extra_error_delay.as_secs_f64();
        let exponent = f64::from(try_index.saturating_sub(1));
        Duration::from_secs_f64((min * 2f64.powf(exponent / 2.0)).min(max))
    }

    /// Wait out the error backoff for retry `try_index`, an error-delay
    /// flush, or `cancel`, whichever comes first.
    pub async fn extra_error_delay(
        &self,
        error: &(dyn std::error::Error + Send + Sync),
        try_index: u32,
        cancel: &CancellationToken,
    ) {
        let wait = self.extra_error_duration(try_index);
        if wait.is_zero() {
            return;
        }
        if self.inner.options.log_level == Level::DEBUG {
            debug!(%error, try_index, ?wait, "delaying retry after error");
        } else {
            trace!(%error, try_index, ?wait, "delaying retry after error");
        }
        let end = self.inner.error_end_delay.load_full();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = end.cancelled() => {}
            _ = cancel.cancelled() => {}
        }
    }

    /// Release in-flight waiters.
    ///
    /// With `no_delay == false` the flush is deferred by
    /// `cancel_delays_delay`, and further calls within that window fold
    /// into the one pending flush. With `no_delay == true` the flush
    /// happens now: normal-path waiters are released immediately, error-
    /// path waiters after a one-second lag.
    pub fn cancel_delays(&self, no_delay: bool) {
        if !no_delay {
            if self
                .inner
                .cancel_scheduled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let this = self.clone();
                let window = self.inner.options.cancel_delays_delay;
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            tokio::time::sleep(window).await;
                            this.inner.cancel_scheduled.store(false, Ordering::Release);
                            this.cancel_delays(true);
                        });
                    }
                    Err(_) => {
                        this.inner.cancel_scheduled.store(false, Ordering::Release);
                        this.cancel_delays(true);
                    }
                }
            }
            return;
        }

        if self.inner.options.log_level == Level::DEBUG {
            debug!("flushing update delays");
        } else {
            trace!("flushing update delays");
        }

        let old = self
            .inner
            .end_delay
            .swap(Arc::new(CancellationToken::new()));
        old.cancel();

        let old_error = self
            .inner
            .error_end_delay
            .swap(Arc::new(CancellationToken::new()));
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(ERROR_FLUSH_LAG).await;
                    old_error.cancel();
                });
            }
            Err(_) => old_error.cancel(),
        }
    }
}
