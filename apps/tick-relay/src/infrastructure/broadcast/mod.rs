//! Broadcast Hub
//!
//! Push fan-out over a tokio broadcast channel. Every connected push
//! consumer holds one receiver; per-consumer symbol filtering happens on the
//! receiving side.
//!
//! # Events
//!
//! - `market_update`: one normalized tick
//! - `error`: `{"message": ...}` for pipeline failures

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::application::ports::{SinkError, TickCallback};
use crate::domain::streaming::TickRecord;
use crate::domain::subscription::InstrumentSymbol;
use crate::infrastructure::metrics;

/// Event name for tick updates.
pub const MARKET_UPDATE_EVENT: &str = "market_update";

/// Event name for pipeline errors.
pub const ERROR_EVENT: &str = "error";

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

// =============================================================================
// Push Events
// =============================================================================

/// One event on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    /// Event name.
    pub event: String,
    /// Instrument the event concerns, for per-consumer filtering.
    pub symbol: Option<InstrumentSymbol>,
    /// JSON payload, shared between receivers.
    pub data: Arc<Value>,
}

impl PushEvent {
    /// Check if this is a tick update.
    #[must_use]
    pub fn is_market_update(&self) -> bool {
        self.event == MARKET_UPDATE_EVENT
    }

    /// Wire frame: `{"event": ..., "data": ...}`.
    #[must_use]
    pub fn to_frame(&self) -> String {
        json!({ "event": self.event, "data": &*self.data }).to_string()
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Fan-out point for push events.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tick_relay::infrastructure::broadcast::BroadcastHub;
///
/// let hub = BroadcastHub::new(16);
/// let mut rx = hub.subscribe();
///
/// hub.emit("error", json!({"message": "feed down"}));
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event, "error");
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    tx: broadcast::Sender<PushEvent>,
    events_sent: AtomicU64,
    events_unheard: AtomicU64,
}

impl BroadcastHub {
    /// Create a hub whose channel buffers `capacity` events per slow receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
            events_sent: AtomicU64::new(0),
            events_unheard: AtomicU64::new(0),
        }
    }

    /// Create a hub with the default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Publish an arbitrary event.
    ///
    /// Returns the number of receivers, or `None` when nobody is listening.
    pub fn emit(&self, event: impl Into<String>, data: Value) -> Option<usize> {
        self.publish(PushEvent {
            event: event.into(),
            symbol: None,
            data: Arc::new(data),
        })
    }

    /// Publish a tick as `market_update`.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Broadcast` if the tick cannot be serialized.
    pub fn publish_tick(&self, tick: &TickRecord) -> Result<Option<usize>, SinkError> {
        let data = serde_json::to_value(tick).map_err(|e| SinkError::Broadcast(e.to_string()))?;
        Ok(self.publish(PushEvent {
            event: MARKET_UPDATE_EVENT.to_string(),
            symbol: Some(tick.symbol.clone()),
            data: Arc::new(data),
        }))
    }

    fn publish(&self, event: PushEvent) -> Option<usize> {
        let name = event.event.clone();

        if let Ok(receivers) = self.tx.send(event) {
            self.events_sent.fetch_add(1, Ordering::Relaxed);
            metrics::record_broadcast(&name, receivers as u64);
            Some(receivers)
        } else {
            self.events_unheard.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// New receiver for all events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            receivers: self.receiver_count(),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_unheard: self.events_unheard.load(Ordering::Relaxed),
        }
    }
}

impl TickCallback for BroadcastHub {
    fn on_tick(&self, tick: &TickRecord) -> Result<(), SinkError> {
        self.publish_tick(tick).map(|_| ())
    }

    fn on_error(&self, message: &str) {
        self.emit(ERROR_EVENT, json!({ "message": message }));
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Broadcast statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    /// Live receivers.
    pub receivers: usize,
    /// Events delivered to at least one receiver.
    pub events_sent: u64,
    /// Events published with no receivers.
    pub events_unheard: u64,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn tick() -> TickRecord {
        TickRecord::new(
            InstrumentSymbol::parse("NSE:SBIN-EQ").unwrap(),
            Decimal::from_str("812.5").unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn tick_reaches_every_receiver() {
        let hub = BroadcastHub::new(16);
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        hub.on_tick(&tick()).unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let event = rx.try_recv().unwrap();
            assert!(event.is_market_update());
            assert_eq!(event.symbol.as_ref().unwrap().as_str(), "NSE:SBIN-EQ");
            assert_eq!(event.data["ltp"], "812.5");
        }
    }

    #[test]
    fn no_receivers_is_not_an_error() {
        let hub = BroadcastHub::new(16);

        assert!(hub.on_tick(&tick()).is_ok());
        assert_eq!(hub.stats().events_unheard, 1);
        assert_eq!(hub.stats().events_sent, 0);
    }

    #[test]
    fn error_event_frame() {
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        hub.on_error("cache unavailable");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, ERROR_EVENT);
        assert!(event.symbol.is_none());
        let frame: Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(frame, json!({"event": "error", "data": {"message": "cache unavailable"}}));
    }

    #[test]
    fn market_update_frame_is_flat_tick() {
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        hub.publish_tick(&tick()).unwrap();

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap().to_frame()).unwrap();
        assert_eq!(frame["event"], "market_update");
        assert_eq!(frame["data"]["symbol"], "NSE:SBIN-EQ");
    }

    #[test]
    fn emitted_event_keeps_its_own_name() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        ::metrics::with_local_recorder(&recorder, || {
            hub.emit("status", json!({"feed": "connected"}));
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, "status");
        assert!(!event.is_market_update());
        let rendered = handle.render();
        assert!(rendered.contains(r#"tick_relay_broadcast_deliveries_total{event="status"} 1"#));
        assert!(!rendered.contains(r#"event="error""#));
    }

    #[test]
    fn slow_receiver_lags_without_blocking() {
        let hub = BroadcastHub::new(2);
        let mut rx = hub.subscribe();

        for _ in 0..5 {
            hub.on_tick(&tick()).unwrap();
        }

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(3))));
    }

    #[test]
    fn receiver_count_tracks_drops() {
        let hub = BroadcastHub::with_defaults();
        let rx = hub.subscribe();
        assert_eq!(hub.receiver_count(), 1);

        drop(rx);
        assert_eq!(hub.stats().receivers, 0);
    }
}
