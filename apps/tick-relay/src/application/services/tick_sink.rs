//! Tick Sink
//!
//! Terminal stage of the pipeline: every normalized tick is written to the
//! cache under its symbol and then handed to each registered callback.
//! Cache and callback failures are isolated from each other and from the
//! feed connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::application::ports::{CacheStore, SinkError, TickCallback};
use crate::domain::streaming::TickRecord;
use crate::infrastructure::metrics;

/// Default cache entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache writer and broadcast dispatcher for normalized ticks.
pub struct TickSink {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    callbacks: OnceLock<Vec<Arc<dyn TickCallback>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for TickSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickSink")
            .field("ttl", &self.ttl)
            .field("callbacks", &self.callbacks.get().map_or(0, Vec::len))
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl TickSink {
    /// Create a sink writing to `cache` with the given entry lifetime.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            callbacks: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Wire the broadcast callbacks. Must happen once, before the feed starts.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::CallbacksAlreadySet` on a second call.
    pub fn set_callbacks(&self, callbacks: Vec<Arc<dyn TickCallback>>) -> Result<(), SinkError> {
        self.callbacks
            .set(callbacks)
            .map_err(|_| SinkError::CallbacksAlreadySet)
    }

    /// Cache entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stop accepting ticks.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Check whether the sink has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn callbacks(&self) -> &[Arc<dyn TickCallback>] {
        self.callbacks.get().map_or(&[], Vec::as_slice)
    }

    /// Cache the tick, then broadcast it.
    ///
    /// Never fails: cache and callback errors are logged and counted.
    pub async fn on_tick(&self, tick: TickRecord) {
        if self.is_closed() {
            metrics::record_tick_dropped(metrics::DropReason::Closed);
            return;
        }

        if let Err(e) = self.cache.set(tick.symbol.as_str(), tick.clone(), self.ttl).await {
            let error = SinkError::from(e);
            tracing::warn!(symbol = %tick.symbol, error = %error, "Cache write failed");
            metrics::record_cache_write_failure();
            self.report_error(&error.to_string());
        }

        for callback in self.callbacks() {
            if let Err(e) = callback.on_tick(&tick) {
                tracing::warn!(symbol = %tick.symbol, error = %e, "Broadcast callback failed");
            }
        }
    }

    /// Tell every callback about a pipeline error.
    pub fn report_error(&self, message: &str) {
        if self.is_closed() {
            return;
        }
        for callback in self.callbacks() {
            callback.on_error(message);
        }
    }
}
