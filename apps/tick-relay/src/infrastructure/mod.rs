//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process
//! plumbing (configuration, HTTP, telemetry).

/// Fyers data socket transport, frame codec and token providers.
pub mod fyers;

/// In-memory expiring tick cache.
pub mod cache;

/// Push event fan-out.
pub mod broadcast;

/// Environment configuration.
pub mod config;

/// Control API, push channel, health and metrics endpoints.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
