//! Port Interfaces
//!
//! Contracts between the tick pipeline and the outside world. Infrastructure
//! adapters implement these; services depend only on the traits.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TokenProvider`: supplies the bearer credential for the feed handshake
//! - `FeedTransport` / `FeedSession`: the physical upstream connection
//! - `TickNormalizer`: raw frame text into canonical records
//! - `CacheStore`: expiring key/value store for the latest tick per symbol
//! - `TickCallback`: push fan-out invoked for every tick

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::streaming::{FeedFrame, TickRecord};
use crate::domain::subscription::InstrumentSymbol;

// =============================================================================
// Credentials
// =============================================================================

/// Opaque bearer token used for the feed handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token for the handshake header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Errors from a token provider.
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    /// No token is available.
    #[error("access token unavailable: {0}")]
    Unavailable(String),

    /// Token source exists but holds no token.
    #[error("access token is empty")]
    Empty,
}

/// Source of the current bearer credential.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current credential.
    async fn token(&self) -> Result<Credential, TokenError>;

    /// Discard the cached credential after the feed rejected it.
    async fn invalidate(&self);
}

// =============================================================================
// Feed Transport
// =============================================================================

/// Errors from the upstream feed connection.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Feed rejected the credential.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Network or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credential could not be obtained.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Retry budget exhausted.
    #[error("connection failed after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Connection was shut down.
    #[error("connection closed")]
    Closed,
}

impl FeedError {
    /// Check if the error is a credential rejection.
    #[must_use]
    pub const fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }

    /// Label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AuthRejected(_) => "auth_rejected",
            Self::Transport(_) => "transport",
            Self::Token(_) => "token",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Closed => "closed",
        }
    }
}

/// Outbound subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    /// Start streaming these symbols.
    Subscribe(Vec<InstrumentSymbol>),
    /// Stop streaming these symbols.
    Unsubscribe(Vec<InstrumentSymbol>),
}

impl FeedRequest {
    /// Symbols carried by the request.
    #[must_use]
    pub fn symbols(&self) -> &[InstrumentSymbol] {
        match self {
            Self::Subscribe(symbols) | Self::Unsubscribe(symbols) => symbols,
        }
    }

    /// Request name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
        }
    }
}

/// Factory for authenticated upstream sessions.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open a connection and complete the handshake.
    ///
    /// Returns `FeedError::AuthRejected` when the feed refuses the credential.
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn FeedSession>, FeedError>;
}

/// One live upstream session.
#[async_trait]
pub trait FeedSession: Send {
    /// Send a subscription request.
    async fn send(&mut self, request: &FeedRequest) -> Result<(), FeedError>;

    /// Next inbound text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, FeedError>>;

    /// Close the session.
    async fn close(&mut self);
}

// =============================================================================
// Normalization
// =============================================================================

/// Rejected inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),

    /// Valid JSON of an unexpected shape.
    #[error("unexpected frame shape: {0}")]
    Shape(String),

    /// Required field absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// Field present but unusable.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },
}

/// Converts raw feed text into canonical frames.
pub trait TickNormalizer: Send + Sync {
    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` when the frame or any element in it is malformed.
    fn normalize(&self, raw: &str) -> Result<Vec<FeedFrame>, ParseError>;
}

// =============================================================================
// Cache
// =============================================================================

/// Latest tick for a symbol with its expiry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    /// Cached tick.
    pub tick: TickRecord,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// When the entry stops being served.
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry expiring `ttl` after `now`.
    #[must_use]
    pub fn new(tick: TickRecord, now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            tick,
            stored_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Check whether the entry has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Lifetime the entry was written with.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        self.expires_at - self.stored_at
    }
}

/// Cache backend errors.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Backend unreachable.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Expiring key/value store for ticks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Write (overwrite) the entry for `key`.
    async fn set(&self, key: &str, tick: TickRecord, ttl: Duration) -> Result<(), CacheError>;

    /// Unexpired entry for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
}

// =============================================================================
// Broadcast Callbacks
// =============================================================================

/// Errors raised while handling a tick.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Cache write failed.
    #[error("cache write failed: {0}")]
    Cache(#[from] CacheError),

    /// A broadcast callback failed.
    #[error("broadcast failed: {0}")]
    Broadcast(String),

    /// Callbacks were already wired.
    #[error("callbacks already set")]
    CallbacksAlreadySet,
}

/// Capability invoked by the tick sink for every tick.
pub trait TickCallback: Send + Sync {
    /// Deliver one tick.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Broadcast` when delivery fails.
    fn on_tick(&self, tick: &TickRecord) -> Result<(), SinkError>;

    /// Report a pipeline error to consumers.
    fn on_error(&self, message: &str);
}
