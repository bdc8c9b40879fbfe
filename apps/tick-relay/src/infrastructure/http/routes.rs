//! Control API, health and metrics handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::HttpState;
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::{InstrumentSymbol, SubscriptionStats, normalize_all};
use crate::infrastructure::broadcast::BroadcastStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Control API
// =============================================================================

/// Body of `POST /subscribe` and `POST /unsubscribe`.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolsRequest {
    /// Raw instrument symbols.
    pub symbols: Vec<String>,
}

/// Response of the subscription endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// `subscribed`, `unsubscribed` or `ok`.
    pub status: String,
    /// Normalized symbols the request applied to, or the full snapshot.
    pub symbols: BTreeSet<InstrumentSymbol>,
}

pub(super) async fn subscribe_handler(
    State(state): State<Arc<HttpState>>,
    Json(request): Json<SymbolsRequest>,
) -> Response {
    let symbols = normalize_all(&request.symbols);
    if symbols.is_empty() {
        return no_valid_symbols();
    }

    let changes = state.connection.subscribe(&symbols);
    tracing::info!(
        requested = symbols.len(),
        added = changes.subscribe.len(),
        "Subscribe request"
    );

    Json(SubscriptionResponse {
        status: "subscribed".to_string(),
        symbols: symbols.into_iter().collect(),
    })
    .into_response()
}

pub(super) async fn unsubscribe_handler(
    State(state): State<Arc<HttpState>>,
    Json(request): Json<SymbolsRequest>,
) -> Response {
    let symbols = normalize_all(&request.symbols);
    if symbols.is_empty() {
        return no_valid_symbols();
    }

    let changes = state.connection.unsubscribe(&symbols);
    tracing::info!(
        requested = symbols.len(),
        removed = changes.unsubscribe.len(),
        "Unsubscribe request"
    );

    Json(SubscriptionResponse {
        status: "unsubscribed".to_string(),
        symbols: symbols.into_iter().collect(),
    })
    .into_response()
}

pub(super) async fn subscriptions_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(SubscriptionResponse {
        status: "ok".to_string(),
        symbols: state.connection.registry().snapshot(),
    })
}

fn no_valid_symbols() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "no valid symbols in request" })),
    )
        .into_response()
}

/// Failure looking up a cached quote.
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    /// Path segment is not a valid symbol.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
    /// No unexpired tick for the symbol.
    #[error("no quote for {0}")]
    NotFound(InstrumentSymbol),
    /// Cache backend failed.
    #[error("{0}")]
    Cache(String),
}

impl IntoResponse for QuoteError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidSymbol(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub(super) async fn quote_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
) -> Result<Response, QuoteError> {
    let symbol = InstrumentSymbol::parse(&raw).map_err(|e| QuoteError::InvalidSymbol(e.to_string()))?;

    match state.cache.get(symbol.as_str()).await {
        Ok(Some(entry)) => Ok(Json(entry).into_response()),
        Ok(None) => Err(QuoteError::NotFound(symbol)),
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "Quote lookup failed");
            Err(QuoteError::Cache(e.to_string()))
        }
    }
}

// =============================================================================
// Health
// =============================================================================

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected.
    Healthy,
    /// Feed reconnecting; cached quotes still served.
    Degraded,
    /// Retry budget exhausted.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting | ConnectionState::Disconnected => Self::Degraded,
            ConnectionState::Failed => Self::Unhealthy,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed state.
    pub feed: ConnectionState,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStats,
    /// Connected push consumers.
    pub push_consumers: usize,
    /// Broadcast statistics.
    pub broadcast: BroadcastStats,
}

fn build_health_response(state: &HttpState) -> HealthResponse {
    let feed = state.connection.state();
    HealthResponse {
        status: feed.into(),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        subscriptions: state.connection.registry().stats(),
        push_consumers: state.push_consumers(),
        broadcast: state.hub.stats(),
    }
}

pub(super) async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    if state.connection.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}
