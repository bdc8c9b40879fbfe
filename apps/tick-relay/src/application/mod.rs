//! Application Layer - Use cases and port definitions.
//!
//! Port traits describe what the pipeline needs from the outside world;
//! services implement the feed lifecycle and tick handling against them.

/// Port interfaces for the feed, token source, cache and broadcast.
pub mod ports;

/// Feed connection, supervisor, tick sink and retry policy.
pub mod services;
