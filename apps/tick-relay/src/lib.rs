#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Tick Relay - Market Data Distribution Pipeline
//!
//! Holds one connection to the Fyers data socket, keeps the upstream
//! subscription set in step with what callers ask for, caches every tick
//! with a TTL and pushes it to WebSocket consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: instrument symbols, subscription registry, tick records
//! - **Application**: ports (feed transport, token provider, cache,
//!   callbacks) and services (feed connection, supervisor, tick sink, retry)
//! - **Infrastructure**: Fyers adapter, memory cache, broadcast hub, HTTP,
//!   config, metrics, telemetry
//!
//! # Data Flow
//!
//! ```text
//!                    ┌────────────────┐   ┌──────────┐   ┌──────────────┐
//! Fyers data WS ───► │ FeedConnection │──►│ TickSink │──►│ BroadcastHub │──► /ws consumers
//!                    └────────────────┘   └────┬─────┘   └──────────────┘
//!                      ▲  replay / deltas      │
//!                      │                       ▼
//!              SubscriptionRegistry       MemoryCache ──► GET /quote/{symbol}
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{ConnectionState, FeedFrame, TickRecord};
pub use domain::subscription::{
    ConsumerId, InstrumentSymbol, SubscriptionChanges, SubscriptionRegistry, SubscriptionStats,
    SymbolError,
};

// Ports and services
pub use application::ports::{
    CacheEntry, CacheError, CacheStore, Credential, FeedError, FeedRequest, FeedSession,
    FeedTransport, ParseError, SinkError, TickCallback, TickNormalizer, TokenError, TokenProvider,
};
pub use application::services::{
    Backoff, FeedConnection, FeedSupervisor, RetryPolicy, TickSink,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig, TokenSource};

// Adapters
pub use infrastructure::broadcast::{BroadcastHub, BroadcastStats, PushEvent, SharedBroadcastHub};
pub use infrastructure::cache::MemoryCache;
pub use infrastructure::fyers::{
    FileTokenProvider, FyersCodec, FyersTransport, FyersTransportConfig, StaticTokenProvider,
};

// HTTP server
pub use infrastructure::http::{HttpServer, HttpServerError, HttpState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
