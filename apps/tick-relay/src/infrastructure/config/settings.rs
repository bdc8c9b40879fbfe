//! Relay Configuration Settings
//!
//! Configuration types for the tick relay, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::retry::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RETRY_DELAY, DEFAULT_RETRY_DELAY, RetryPolicy,
};
use crate::application::services::supervisor::DEFAULT_AUTH_RETRIES;
use crate::application::services::tick_sink::DEFAULT_CACHE_TTL;
use crate::infrastructure::broadcast::DEFAULT_CAPACITY;
use crate::infrastructure::cache::DEFAULT_SWEEP_INTERVAL;
use crate::infrastructure::fyers::token::DEFAULT_TOKEN_FILE;
use crate::infrastructure::fyers::transport::DEFAULT_HANDSHAKE_TIMEOUT;

/// Production data socket.
pub const DEFAULT_FEED_URL: &str = "wss://socket.fyers.in/hsm/v1-5/prod";

/// Where the access token comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Token given directly in configuration.
    Static(String),
    /// Token file maintained by an external login job.
    File(PathBuf),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static([REDACTED])"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Application id.
    pub app_id: String,
    /// Access token source.
    pub token: TokenSource,
    /// Data socket URL.
    pub url: String,
    /// Connect plus acknowledgement bound.
    pub handshake_timeout: Duration,
}

/// Connection retry settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// Attempts per connect cycle.
    pub connect_attempts: u32,
    /// Delay between attempts, or the first delay when backing off.
    pub connect_delay: Duration,
    /// Double the delay after every failure.
    pub exponential_backoff: bool,
    /// Cap for the doubled delay.
    pub max_connect_delay: Duration,
    /// Jitter as a fraction of each delay, clamped to `0.0..=1.0`.
    pub jitter: f64,
    /// Fresh-token retries after a credential rejection.
    pub auth_retries: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            connect_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_delay: DEFAULT_RETRY_DELAY,
            exponential_backoff: false,
            max_connect_delay: DEFAULT_MAX_RETRY_DELAY,
            jitter: 0.0,
            auth_retries: DEFAULT_AUTH_RETRIES,
        }
    }
}

impl RetrySettings {
    /// Retry policy for the feed connection.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        let policy = if self.exponential_backoff {
            RetryPolicy::exponential(
                self.connect_attempts,
                self.connect_delay,
                self.max_connect_delay.max(self.connect_delay),
            )
        } else {
            RetryPolicy::fixed(self.connect_attempts, self.connect_delay)
        };
        policy.with_jitter(self.jitter)
    }
}

/// Tick cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Entry lifetime.
    pub ttl: Duration,
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP port for the control API, push channel, health and metrics.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8000 }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Events buffered per slow consumer before it lags.
    pub capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream feed.
    pub feed: FeedSettings,
    /// Instruments subscribed at startup (raw, normalized later).
    pub symbols: Vec<String>,
    /// Server ports.
    pub server: ServerSettings,
    /// Tick cache.
    pub cache: CacheSettings,
    /// Push fan-out.
    pub broadcast: BroadcastSettings,
    /// Connection retry.
    pub retry: RetrySettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let app_id = env
            .get("FYERS_APP_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("FYERS_APP_ID".to_string()))?;
        if app_id.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FYERS_APP_ID".to_string()));
        }

        let token = match env.get("FYERS_ACCESS_TOKEN") {
            Some(token) if !token.trim().is_empty() => TokenSource::Static(token.trim().to_string()),
            Some(_) => return Err(ConfigError::EmptyValue("FYERS_ACCESS_TOKEN".to_string())),
            None => TokenSource::File(
                env.get("FYERS_TOKEN_FILE")
                    .filter(|path| !path.trim().is_empty())
                    .map_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE), PathBuf::from),
            ),
        };

        let feed = FeedSettings {
            app_id: app_id.trim().to_string(),
            token,
            url: env
                .get("TICK_RELAY_FEED_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            handshake_timeout: env.duration_secs("TICK_RELAY_HANDSHAKE_TIMEOUT_SECS", DEFAULT_HANDSHAKE_TIMEOUT),
        };

        let symbols = env
            .get("TICK_RELAY_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let server = ServerSettings {
            http_port: env.parse("TICK_RELAY_HTTP_PORT", ServerSettings::default().http_port),
        };

        let cache = CacheSettings {
            ttl: env.duration_secs("TICK_RELAY_CACHE_TTL_SECS", CacheSettings::default().ttl),
            sweep_interval: env.duration_secs(
                "TICK_RELAY_CACHE_SWEEP_SECS",
                CacheSettings::default().sweep_interval,
            ),
        };

        let broadcast = BroadcastSettings {
            capacity: env.parse(
                "TICK_RELAY_BROADCAST_CAPACITY",
                BroadcastSettings::default().capacity,
            ),
        };

        let retry = RetrySettings {
            connect_attempts: env.parse(
                "TICK_RELAY_CONNECT_ATTEMPTS",
                RetrySettings::default().connect_attempts,
            ),
            connect_delay: env.duration_millis(
                "TICK_RELAY_CONNECT_DELAY_MS",
                RetrySettings::default().connect_delay,
            ),
            exponential_backoff: env
                .get("TICK_RELAY_CONNECT_BACKOFF")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("exponential")),
            max_connect_delay: env.duration_millis(
                "TICK_RELAY_CONNECT_MAX_DELAY_MS",
                RetrySettings::default().max_connect_delay,
            ),
            jitter: Some(env.parse::<f64>("TICK_RELAY_CONNECT_JITTER", RetrySettings::default().jitter))
                .filter(|jitter| jitter.is_finite())
                .map_or(0.0, |jitter| jitter.clamp(0.0, 1.0)),
            auth_retries: env.parse("TICK_RELAY_AUTH_RETRIES", RetrySettings::default().auth_retries),
        };

        Ok(Self {
            feed,
            symbols,
            server,
            cache,
            broadcast,
            retry,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
