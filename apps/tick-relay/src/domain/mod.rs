//! Domain Layer - Core market data types.
//!
//! Pure types with no I/O: instrument symbols, the subscription registry,
//! tick records and the feed connection state.

/// Tick records, feed frames and connection state.
pub mod streaming;

/// Instrument symbols and subscription tracking.
pub mod subscription;
