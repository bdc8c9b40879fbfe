//! Configuration Module
//!
//! Environment-driven configuration for the relay.

mod settings;

pub use settings::{
    BroadcastSettings, CacheSettings, ConfigError, DEFAULT_FEED_URL, FeedSettings, RelayConfig,
    RetrySettings, ServerSettings, TokenSource,
};
