//! HTTP Server
//!
//! Control API, push channel, health checks and Prometheus metrics on one
//! axum router.
//!
//! # Endpoints
//!
//! - `POST /subscribe`, `POST /unsubscribe` - mutate the upstream subscription set
//! - `GET /subscriptions` - current subscription snapshot
//! - `GET /quote/{symbol}` - latest cached tick
//! - `GET /ws` - push channel (`market_update` and `error` events)
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe
//! - `GET /readyz` - readiness probe (feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

mod push;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::CacheStore;
use crate::application::services::FeedConnection;
use crate::domain::subscription::ConsumerId;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics;

pub use routes::{HealthResponse, HealthStatus, QuoteError, SubscriptionResponse, SymbolsRequest};

// =============================================================================
// Server State
// =============================================================================

/// Shared state for all handlers.
pub struct HttpState {
    version: String,
    started_at: Instant,
    connection: FeedConnection,
    cache: Arc<dyn CacheStore>,
    hub: SharedBroadcastHub,
    cancel: CancellationToken,
    next_consumer: AtomicU64,
    push_consumers: AtomicUsize,
}

impl HttpState {
    /// Create handler state.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        connection: FeedConnection,
        cache: Arc<dyn CacheStore>,
        hub: SharedBroadcastHub,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            connection,
            cache,
            hub,
            cancel,
            next_consumer: AtomicU64::new(1),
            push_consumers: AtomicUsize::new(0),
        }
    }

    /// Number of connected push consumers.
    #[must_use]
    pub fn push_consumers(&self) -> usize {
        self.push_consumers.load(Ordering::Relaxed)
    }

    fn consumer_joined(&self) -> ConsumerId {
        let id = self.next_consumer.fetch_add(1, Ordering::Relaxed);
        let count = self.push_consumers.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_push_consumers(count);
        id
    }

    fn consumer_left(&self, consumer: ConsumerId) {
        self.connection.registry().consumer_disconnected(consumer);
        let count = self
            .push_consumers
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::set_push_consumers(count);
    }
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState")
            .field("version", &self.version)
            .field("connection", &self.connection.state())
            .field("push_consumers", &self.push_consumers())
            .finish_non_exhaustive()
    }
}

/// Build the router over shared state.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/subscribe", post(routes::subscribe_handler))
        .route("/unsubscribe", post(routes::unsubscribe_handler))
        .route("/subscriptions", get(routes::subscriptions_handler))
        .route("/quote/{symbol}", get(routes::quote_handler))
        .route("/ws", get(push::push_handler))
        .route("/health", get(routes::health_handler))
        .route("/healthz", get(routes::liveness_handler))
        .route("/readyz", get(routes::readiness_handler))
        .route("/metrics", get(routes::metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP server for the relay.
#[derive(Debug)]
pub struct HttpServer {
    port: u16,
    state: Arc<HttpState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters a
    /// fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
