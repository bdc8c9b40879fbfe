//! Market Data Streaming Types
//!
//! Core domain types for the tick pipeline: the canonical tick record and
//! the feed connection state. These types are codec-agnostic and represent
//! the canonical internal representation of market data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::subscription::InstrumentSymbol;

// =============================================================================
// Tick Record
// =============================================================================

/// A single normalized price update for one instrument.
///
/// Built once per inbound frame and never mutated afterwards. Any field the
/// exchange supplies beyond symbol, price and time (volume, bid/ask, change)
/// is carried opaquely in `extra` and flattened back out on serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Exchange-qualified instrument.
    pub symbol: InstrumentSymbol,

    /// Last traded price.
    #[serde(rename = "ltp")]
    pub last_price: Decimal,

    /// Exchange time of the tick (receive time when the feed omits it).
    pub timestamp: DateTime<Utc>,

    /// Pass-through exchange fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TickRecord {
    /// Create a tick with no auxiliary fields.
    #[must_use]
    pub fn new(symbol: InstrumentSymbol, last_price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            last_price,
            timestamp,
            extra: Map::new(),
        }
    }

    /// Attach auxiliary fields.
    #[must_use]
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// Look up a pass-through field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

// =============================================================================
// Feed Frames
// =============================================================================

/// Status carried by an upstream control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    /// Request accepted.
    Ok,
    /// Request rejected.
    Error,
}

/// Acknowledgement or error frame from the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Outcome.
    #[serde(rename = "s")]
    pub status: ControlStatus,
    /// Numeric status code, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Frame type (`cn` for the connection handshake, `sub` for subscriptions).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ControlFrame {
    /// Check if this frame acknowledges the connection handshake.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        self.kind.as_deref() == Some("cn")
    }

    /// Check if the frame reports success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ControlStatus::Ok
    }
}

/// One decoded element of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    /// Price update.
    Tick(TickRecord),
    /// Acknowledgement or error.
    Control(ControlFrame),
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the upstream feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session; subscribe calls only update bookkeeping.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Session live; subscription changes are sent immediately.
    Connected,
    /// Retry budget exhausted. Needs operator attention.
    Failed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Check if the session is live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Numeric code used for the connection state gauge.
    #[must_use]
    pub const fn gauge_value(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Failed => -1.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
