//! Tick Relay Binary
//!
//! Starts the market data relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FYERS_APP_ID`: Fyers application id
//!
//! ## Token (one of)
//! - `FYERS_ACCESS_TOKEN`: access token
//! - `FYERS_TOKEN_FILE`: token file written by the login job (default: data/access_token.txt)
//!
//! ## Optional
//! - `TICK_RELAY_FEED_URL`: data socket URL
//! - `TICK_RELAY_SYMBOLS`: comma-separated instruments subscribed at startup
//! - `TICK_RELAY_HTTP_PORT`: HTTP port (default: 8000)
//! - `TICK_RELAY_CACHE_TTL_SECS`: tick cache TTL (default: 86400)
//! - `TICK_RELAY_CACHE_SWEEP_SECS`: expiry sweep interval (default: 60)
//! - `TICK_RELAY_BROADCAST_CAPACITY`: per-consumer event buffer (default: 10000)
//! - `TICK_RELAY_CONNECT_ATTEMPTS`: attempts per connect cycle (default: 3)
//! - `TICK_RELAY_CONNECT_DELAY_MS`: delay between attempts (default: 2000)
//! - `TICK_RELAY_CONNECT_BACKOFF`: `fixed` or `exponential` (default: fixed)
//! - `TICK_RELAY_CONNECT_MAX_DELAY_MS`: exponential backoff cap (default: 30000)
//! - `TICK_RELAY_CONNECT_JITTER`: delay jitter fraction, 0.0 to 1.0 (default: 0)
//! - `TICK_RELAY_HANDSHAKE_TIMEOUT_SECS`: connect bound (default: 10)
//! - `TICK_RELAY_AUTH_RETRIES`: fresh-token retries after rejection (default: 1)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log filter (default: tick_relay=info)

use std::sync::Arc;
use std::time::Duration;

use tick_relay::application::ports::{TickCallback, TokenProvider};
use tick_relay::domain::subscription::normalize_all;
use tick_relay::infrastructure::telemetry;
use tick_relay::{
    BroadcastHub, FeedConnection, FeedSupervisor, FileTokenProvider, FyersCodec, FyersTransport,
    FyersTransportConfig, HttpServer, HttpState, MemoryCache, RelayConfig, StaticTokenProvider,
    SubscriptionRegistry, TickSink, TokenSource, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting tick relay");

    let _metrics_handle = init_metrics()?;

    let config = RelayConfig::from_env()?;
    log_config(&config);

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let shutdown_token = CancellationToken::new();

    let tokens: Arc<dyn TokenProvider> = match &config.feed.token {
        TokenSource::Static(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        TokenSource::File(path) => Arc::new(FileTokenProvider::new(path.clone())),
    };

    // Cache plus expiry sweeper
    let cache = Arc::new(MemoryCache::new());
    let sweeper = {
        let cache = Arc::clone(&cache);
        let cancel = shutdown_token.clone();
        let interval = config.cache.sweep_interval;
        tokio::spawn(async move { cache.run_sweeper(interval, cancel).await })
    };

    // Tick path: sink writes the cache, then pushes through the hub
    let broadcast_hub = Arc::new(BroadcastHub::new(config.broadcast.capacity));
    let sink = Arc::new(TickSink::new(cache.clone(), config.cache.ttl));
    sink.set_callbacks(vec![Arc::clone(&broadcast_hub) as Arc<dyn TickCallback>])?;

    let transport = FyersTransport::new(
        FyersTransportConfig::new(&config.feed.url, &config.feed.app_id)
            .with_handshake_timeout(config.feed.handshake_timeout),
    );
    let connection = FeedConnection::new(
        Arc::new(transport),
        tokens,
        Arc::new(FyersCodec::new()),
        Arc::new(SubscriptionRegistry::new()),
        sink,
    );

    let initial = normalize_all(&config.symbols);
    if !initial.is_empty() {
        connection.subscribe(&initial);
        tracing::info!(count = initial.len(), "Initial instruments registered");
    }

    // Feed supervisor: a fatal feed error takes the whole process down
    let supervisor = FeedSupervisor::new(
        connection.clone(),
        config.retry.policy(),
        config.retry.auth_retries,
        shutdown_token.clone(),
    );
    let supervisor_cancel = shutdown_token.clone();
    let supervisor_task = tokio::spawn(async move {
        let result = supervisor.run().await;
        if result.is_err() {
            supervisor_cancel.cancel();
        }
        result
    });

    // HTTP server
    let http_state = Arc::new(HttpState::new(
        env!("CARGO_PKG_VERSION"),
        connection.clone(),
        cache.clone(),
        Arc::clone(&broadcast_hub),
        shutdown_token.clone(),
    ));
    let http_server = HttpServer::new(config.server.http_port, http_state, shutdown_token.clone());
    let http_cancel = shutdown_token.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
            http_cancel.cancel();
        }
    });

    tracing::info!("Tick relay ready");

    tokio::select! {
        () = await_shutdown_signal() => {}
        () = shutdown_token.cancelled() => {
            tracing::warn!("Fatal component error, shutting down");
        }
    }

    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        connection.shutdown().await;
        let feed = supervisor_task.await;
        let _ = http_task.await;
        let _ = sweeper.await;
        feed
    })
    .await;

    match drained {
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "Tick relay stopped: feed unavailable");
            Err(e.into())
        }
        Ok(Ok(Ok(()))) => {
            tracing::info!("Tick relay stopped");
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            tracing::warn!("Graceful shutdown timed out");
            Ok(())
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        feed_url = %config.feed.url,
        token = ?config.feed.token,
        symbols = config.symbols.len(),
        http_port = config.server.http_port,
        cache_ttl_secs = config.cache.ttl.as_secs(),
        connect_attempts = config.retry.connect_attempts,
        connect_delay_ms = u64::try_from(config.retry.connect_delay.as_millis()).unwrap_or(u64::MAX),
        exponential_backoff = config.retry.exponential_backoff,
        connect_jitter = config.retry.jitter,
        "Configuration loaded"
    );
}

/// Wait for SIGTERM or SIGINT.
async fn await_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
