//! Feed Connection
//!
//! Owns the single physical connection to the upstream feed.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──handshake ok──► Connected
//!       ▲                          │                            │
//!       └──────── failure ─────────┘                            │
//!       └──────────────────── transport closed ─────────────────┘
//!
//! connect_with_retry() exhausted ──► Failed
//! ```
//!
//! After every successful handshake the full desired subscription set is
//! replayed as one bulk subscribe frame. While connected, subscription
//! changes are forwarded as delta frames through the session task's command
//! queue. The registry mutation and the enqueue happen under one lock, so
//! the order of upstream frames matches the order of registry changes.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::retry::RetryPolicy;
use super::tick_sink::TickSink;
use crate::application::ports::{
    FeedError, FeedRequest, FeedSession, FeedTransport, TickNormalizer, TokenProvider,
};
use crate::domain::streaming::{ConnectionState, ControlFrame, FeedFrame};
use crate::domain::subscription::{
    ConsumerId, InstrumentSymbol, SubscriptionChanges, SubscriptionRegistry,
};
use crate::infrastructure::metrics::{self, ConnectOutcome, DropReason};

// =============================================================================
// Feed Connection
// =============================================================================

/// Handle to the upstream feed connection. Cheap to clone.
#[derive(Clone)]
pub struct FeedConnection {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn FeedTransport>,
    tokens: Arc<dyn TokenProvider>,
    normalizer: Arc<dyn TickNormalizer>,
    registry: Arc<SubscriptionRegistry>,
    sink: Arc<TickSink>,
    state: watch::Sender<ConnectionState>,
    commands: Mutex<Option<mpsc::UnboundedSender<FeedRequest>>>,
    session_task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection")
            .field("state", &self.state())
            .field("subscriptions", &self.inner.registry.stats().symbol_count)
            .finish_non_exhaustive()
    }
}

impl FeedConnection {
    /// Create a disconnected feed connection.
    #[must_use]
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        tokens: Arc<dyn TokenProvider>,
        normalizer: Arc<dyn TickNormalizer>,
        registry: Arc<SubscriptionRegistry>,
        sink: Arc<TickSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                tokens,
                normalizer,
                registry,
                sink,
                state,
                commands: Mutex::new(None),
                session_task: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Check if the session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Observe state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscription registry backing this connection.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// Tick sink fed by this connection.
    #[must_use]
    pub fn sink(&self) -> &Arc<TickSink> {
        &self.inner.sink
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Perform one handshake attempt and start the session task.
    ///
    /// No retry happens here. A rejected credential is invalidated at the
    /// token provider before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the `FeedError` of the failed step; the state is left at
    /// `Disconnected`. `FeedError::Closed` once shut down, including a shutdown
    /// that lands while the handshake is in flight.
    pub async fn connect(&self) -> Result<(), FeedError> {
        if self.inner.cancel.is_cancelled() {
            return Err(FeedError::Closed);
        }
        if self.is_connected() {
            return Ok(());
        }

        self.inner.set_state(ConnectionState::Connecting);

        let credential = match self.inner.tokens.token().await {
            Ok(credential) => credential,
            Err(e) => {
                metrics::record_connect_attempt(ConnectOutcome::Failed);
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        let mut session = match self.inner.transport.connect(&credential).await {
            Ok(session) => session,
            Err(e) => {
                if e.is_auth_rejected() {
                    metrics::record_connect_attempt(ConnectOutcome::AuthRejected);
                    tracing::warn!(error = %e, "Feed rejected credential, invalidating token");
                    self.inner.tokens.invalidate().await;
                } else {
                    metrics::record_connect_attempt(ConnectOutcome::Failed);
                }
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        // Previous session task has already torn down once the state left
        // Connected; reap its handle.
        if let Some(previous) = self.inner.session_task.lock().take() {
            previous.abort();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let own_tx = tx.clone();
        let snapshot = {
            let mut commands = self.inner.commands.lock();
            if self.inner.cancel.is_cancelled() {
                None
            } else {
                *commands = Some(tx);
                self.inner.set_state(ConnectionState::Connected);
                Some(self.inner.registry.snapshot())
            }
        };
        let Some(snapshot) = snapshot else {
            tracing::debug!("Shut down during handshake, dropping session");
            session.close().await;
            self.inner.set_state(ConnectionState::Disconnected);
            return Err(FeedError::Closed);
        };

        metrics::record_connect_attempt(ConnectOutcome::Connected);
        tracing::info!(symbols = snapshot.len(), "Feed connected");

        if !snapshot.is_empty() {
            let replay = FeedRequest::Subscribe(snapshot.into_iter().collect());
            if let Err(e) = session.send(&replay).await {
                tracing::warn!(error = %e, "Subscription replay failed");
                session.close().await;
                self.inner.release_commands(&own_tx);
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
            tracing::debug!(symbols = replay.symbols().len(), "Replayed subscriptions");
        }

        let task = tokio::spawn(run_session(Arc::clone(&self.inner), session, rx, own_tx));
        *self.inner.session_task.lock() = Some(task);

        Ok(())
    }

    /// Connect, retrying transport failures per `policy`.
    ///
    /// A rejected credential is returned immediately without further attempts.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::RetriesExhausted` after the last failed attempt
    /// (state becomes `Failed`), `FeedError::AuthRejected` on credential
    /// rejection, or `FeedError::Closed` if shut down while waiting.
    pub async fn connect_with_retry(&self, policy: &RetryPolicy) -> Result<(), FeedError> {
        let attempts = policy.attempts();

        for attempt in 1..=attempts {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e @ (FeedError::AuthRejected(_) | FeedError::Closed)) => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, max_attempts = attempts, error = %e, "Feed connection attempt failed");

                    if attempt < attempts {
                        let delay = policy.delay_after(attempt);
                        tokio::select! {
                            () = self.inner.cancel.cancelled() => return Err(FeedError::Closed),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        tracing::error!(attempts, "Feed connection retries exhausted");
        self.inner.set_state(ConnectionState::Failed);
        Err(FeedError::RetriesExhausted { attempts })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Add symbols to the desired set, sending a subscribe frame when live.
    pub fn subscribe(&self, symbols: &[InstrumentSymbol]) -> SubscriptionChanges {
        self.inner.mutate(|registry| registry.add(symbols))
    }

    /// Remove symbols from the desired set, sending an unsubscribe frame when live.
    pub fn unsubscribe(&self, symbols: &[InstrumentSymbol]) -> SubscriptionChanges {
        self.inner.mutate(|registry| registry.remove(symbols))
    }

    /// Add symbols to a consumer's watch list, subscribing any new ones.
    pub fn watch(&self, consumer: ConsumerId, symbols: &[InstrumentSymbol]) -> SubscriptionChanges {
        self.inner.mutate(|registry| registry.watch(consumer, symbols))
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Close the session. No callbacks are invoked once this returns.
    pub async fn shutdown(&self) {
        self.inner.sink.close();
        self.inner.cancel.cancel();

        let task = self.inner.session_task.lock().take();
        if let Some(task) = task {
            match task.await {
                Err(e) if !e.is_cancelled() => {
                    tracing::warn!(error = %e, "Feed session task panicked");
                }
                _ => {}
            }
        }

        *self.inner.commands.lock() = None;
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("Feed connection shut down");
    }
}

// =============================================================================
// Shared State
// =============================================================================

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::debug!(state = %next, "Feed connection state changed");
            metrics::set_connection_state(next);
        }
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&SubscriptionRegistry) -> SubscriptionChanges,
    ) -> SubscriptionChanges {
        let changes = {
            let commands = self.commands.lock();
            let changes = apply(&self.registry);

            if let Some(tx) = commands.as_ref() {
                for request in delta_requests(&changes) {
                    if tx.send(request).is_err() {
                        tracing::debug!("Session ended, change will be replayed on reconnect");
                        break;
                    }
                }
            }
            changes
        };

        metrics::set_subscriptions(self.registry.stats().symbol_count);
        changes
    }

    fn release_commands(&self, own: &mpsc::UnboundedSender<FeedRequest>) {
        let mut commands = self.commands.lock();
        if commands.as_ref().is_some_and(|tx| tx.same_channel(own)) {
            *commands = None;
        }
    }

    async fn dispatch(&self, raw: &str) {
        let started = Instant::now();

        let frames = match self.normalizer.normalize(raw) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed feed frame");
                metrics::record_tick_dropped(DropReason::Malformed);
                return;
            }
        };

        for frame in frames {
            match frame {
                FeedFrame::Tick(tick) => {
                    metrics::record_tick_received();
                    self.sink.on_tick(tick).await;
                }
                FeedFrame::Control(control) => self.handle_control(&control),
            }
        }

        metrics::record_processing_duration(started.elapsed());
    }

    fn handle_control(&self, control: &ControlFrame) {
        if control.is_ok() {
            tracing::debug!(kind = ?control.kind, message = %control.message, "Feed acknowledged request");
        } else {
            tracing::warn!(
                kind = ?control.kind,
                code = ?control.code,
                message = %control.message,
                "Feed reported an error"
            );
            self.sink.report_error(&control.message);
        }
    }
}

fn delta_requests(changes: &SubscriptionChanges) -> Vec<FeedRequest> {
    let mut requests = Vec::with_capacity(2);
    if !changes.subscribe.is_empty() {
        requests.push(FeedRequest::Subscribe(changes.subscribe.iter().cloned().collect()));
    }
    if !changes.unsubscribe.is_empty() {
        requests.push(FeedRequest::Unsubscribe(
            changes.unsubscribe.iter().cloned().collect(),
        ));
    }
    requests
}

// =============================================================================
// Session Task
// =============================================================================

async fn run_session(
    inner: Arc<Inner>,
    mut session: Box<dyn FeedSession>,
    mut commands: mpsc::UnboundedReceiver<FeedRequest>,
    own_tx: mpsc::UnboundedSender<FeedRequest>,
) {
    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            Some(request) = commands.recv() => {
                if let Err(e) = session.send(&request).await {
                    tracing::warn!(request = request.name(), error = %e, "Failed to send subscription change");
                    break;
                }
                tracing::debug!(request = request.name(), symbols = request.symbols().len(), "Sent subscription change");
            }
            frame = session.recv() => match frame {
                Some(Ok(raw)) => inner.dispatch(&raw).await,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Feed transport error");
                    break;
                }
                None => {
                    tracing::info!("Feed closed by peer");
                    break;
                }
            },
        }
    }

    session.close().await;
    inner.release_commands(&own_tx);
    inner.set_state(ConnectionState::Disconnected);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{CacheStore, MockTokenProvider, TickCallback};
    use crate::application::services::testing::{FakeTransport, Recorder, token_provider};
    use crate::application::services::tick_sink::DEFAULT_CACHE_TTL;
    use crate::infrastructure::cache::MemoryCache;
    use crate::infrastructure::fyers::codec::FyersCodec;

    struct Fixture {
        connection: FeedConnection,
        transport: Arc<FakeTransport>,
        cache: Arc<MemoryCache>,
        recorder: Arc<Recorder>,
    }

    fn fixture_with(transport: FakeTransport, tokens: MockTokenProvider) -> Fixture {
        let transport = Arc::new(transport);
        let cache = Arc::new(MemoryCache::new());
        let sink = Arc::new(TickSink::new(cache.clone(), DEFAULT_CACHE_TTL));
        let recorder = Arc::new(Recorder::default());
        sink.set_callbacks(vec![recorder.clone() as Arc<dyn TickCallback>])
            .unwrap();

        let connection = FeedConnection::new(
            transport.clone(),
            Arc::new(tokens),
            Arc::new(FyersCodec::new()),
            Arc::new(SubscriptionRegistry::new()),
            sink,
        );

        Fixture {
            connection,
            transport,
            cache,
            recorder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeTransport::default(), token_provider())
    }

    fn sym(s: &str) -> InstrumentSymbol {
        InstrumentSymbol::parse(s).unwrap()
    }

    async fn wait_for_state(connection: &FeedConnection, expected: ConnectionState) {
        let mut rx = connection.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == expected))
            .await
            .unwrap()
            .unwrap();
    }

    // -------------------------------------------------------------------------
    // Connect and replay
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn subscribe_while_disconnected_only_updates_registry() {
        let f = fixture();

        let changes = f.connection.subscribe(&[sym("NSE:SBIN-EQ")]);

        assert!(changes.subscribe.contains("NSE:SBIN-EQ"));
        assert!(!f.connection.is_connected());
        assert!(f.connection.registry().contains("NSE:SBIN-EQ"));
        assert!(f.transport.attempts.lock().is_empty());
    }

    #[tokio::test]
    async fn connect_replays_snapshot_as_one_frame() {
        let f = fixture();
        f.connection
            .subscribe(&[sym("NSE:SBIN-EQ"), sym("NSE:TCS-EQ")]);

        f.connection.connect().await.unwrap();

        assert_eq!(f.connection.state(), ConnectionState::Connected);
        let mut session = f.transport.take_session();
        let replay = session.sent.recv().await.unwrap();
        let expected: Vec<_> = f.connection.registry().snapshot().into_iter().collect();
        assert_eq!(replay, FeedRequest::Subscribe(expected));
        assert!(session.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_with_empty_registry_sends_nothing() {
        let f = fixture();

        f.connection.connect().await.unwrap();

        let mut session = f.transport.take_session();
        assert!(session.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn live_subscribe_sends_delta_frames_in_order() {
        let f = fixture();
        f.connection.connect().await.unwrap();
        let mut session = f.transport.take_session();

        f.connection.subscribe(&[sym("NSE:SBIN-EQ")]);
        f.connection.subscribe(&[sym("NSE:SBIN-EQ")]);
        f.connection.unsubscribe(&[sym("NSE:SBIN-EQ")]);
        f.connection.unsubscribe(&[sym("NSE:TCS-EQ")]);

        assert_eq!(
            session.sent.recv().await.unwrap(),
            FeedRequest::Subscribe(vec![sym("NSE:SBIN-EQ")])
        );
        assert_eq!(
            session.sent.recv().await.unwrap(),
            FeedRequest::Unsubscribe(vec![sym("NSE:SBIN-EQ")])
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn auth_rejection_invalidates_token() {
        let transport = FakeTransport::default();
        transport.fail_next(FeedError::AuthRejected("invalid token".into()));
        let mut tokens = token_provider();
        tokens.expect_invalidate().times(1).return_const(());
        let f = fixture_with(transport, tokens);

        let result = f.connection.connect().await;

        assert!(matches!(result, Err(FeedError::AuthRejected(_))));
        assert_eq!(f.connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn token_failure_leaves_disconnected() {
        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_token()
            .returning(|| Err(crate::application::ports::TokenError::Empty));
        let f = fixture_with(FakeTransport::default(), tokens);

        let result = f.connection.connect().await;

        assert!(matches!(result, Err(FeedError::Token(_))));
        assert_eq!(f.connection.state(), ConnectionState::Disconnected);
        assert!(f.transport.attempts.lock().is_empty());
    }

    // -------------------------------------------------------------------------
    // Retry
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn retry_makes_three_attempts_two_seconds_apart() {
        let f = fixture_with(FakeTransport::failing(), token_provider());

        let result = f.connection.connect_with_retry(&RetryPolicy::default()).await;

        assert!(matches!(result, Err(FeedError::RetriesExhausted { attempts: 3 })));
        assert_eq!(f.connection.state(), ConnectionState::Failed);

        let attempts = f.transport.attempts.lock().clone();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(2));
        assert_eq!(attempts[2] - attempts[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failure() {
        let transport = FakeTransport::default();
        transport.fail_next(FeedError::Transport("reset".into()));
        let f = fixture_with(transport, token_provider());

        f.connection
            .connect_with_retry(&RetryPolicy::default())
            .await
            .unwrap();

        assert!(f.connection.is_connected());
        assert_eq!(f.transport.attempts.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_auth_rejection() {
        let transport = FakeTransport::default();
        transport.fail_next(FeedError::AuthRejected("expired".into()));
        let mut tokens = token_provider();
        tokens.expect_invalidate().return_const(());
        let f = fixture_with(transport, tokens);

        let result = f.connection.connect_with_retry(&RetryPolicy::default()).await;

        assert!(matches!(result, Err(FeedError::AuthRejected(_))));
        assert_eq!(f.transport.attempts.lock().len(), 1);
    }

    // -------------------------------------------------------------------------
    // Inbound frames
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn tick_reaches_cache_and_callbacks() {
        let f = fixture();
        f.connection.connect().await.unwrap();
        let session = f.transport.take_session();

        session
            .inbound
            .send(r#"{"symbol":"NSE:SBIN-EQ","ltp":812.5,"exch_feed_time":1700000000}"#.into())
            .unwrap();
        session
            .inbound
            .send(r#"{"symbol":"NSE:SBIN-EQ","ltp":813.0,"exch_feed_time":1700000001}"#.into())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.recorder.ticks.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let entry = f.cache.get("NSE:SBIN-EQ").await.unwrap().unwrap();
        assert_eq!(entry.tick.last_price, Decimal::from_str("813.0").unwrap());
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_state_change() {
        let f = fixture();
        f.connection.connect().await.unwrap();
        let session = f.transport.take_session();

        session.inbound.send("not json".into()).unwrap();
        session.inbound.send(r#"{"ltp":1.0}"#.into()).unwrap();
        session
            .inbound
            .send(r#"{"symbol":"NSE:TCS-EQ","ltp":3500}"#.into())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.recorder.ticks.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let ticks = f.recorder.ticks.lock();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol.as_str(), "NSE:TCS-EQ");
        assert!(f.connection.is_connected());
    }

    #[tokio::test]
    async fn upstream_error_frame_is_reported() {
        let f = fixture();
        f.connection.connect().await.unwrap();
        let session = f.transport.take_session();

        session
            .inbound
            .send(r#"{"s":"error","code":-300,"message":"invalid symbol","type":"sub"}"#.into())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.recorder.errors.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(f.recorder.errors.lock()[0], "invalid symbol");
    }

    // -------------------------------------------------------------------------
    // Disconnect and shutdown
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn peer_close_sets_disconnected_and_reconnect_replays() {
        let f = fixture();
        f.connection.subscribe(&[sym("NSE:SBIN-EQ")]);
        f.connection.connect().await.unwrap();
        let first = f.transport.take_session();
        drop(first);

        wait_for_state(&f.connection, ConnectionState::Disconnected).await;

        // Changes while down are bookkeeping only
        f.connection.subscribe(&[sym("NSE:TCS-EQ")]);

        f.connection.connect().await.unwrap();
        let mut second = f.transport.take_session();
        assert_eq!(
            second.sent.recv().await.unwrap(),
            FeedRequest::Subscribe(vec![sym("NSE:SBIN-EQ"), sym("NSE:TCS-EQ")])
        );
    }

    #[tokio::test]
    async fn shutdown_stops_callbacks() {
        let f = fixture();
        f.connection.connect().await.unwrap();
        let session = f.transport.take_session();

        f.connection.shutdown().await;

        let _ = session
            .inbound
            .send(r#"{"symbol":"NSE:SBIN-EQ","ltp":812.5}"#.into());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(f.recorder.ticks.lock().is_empty());
        assert_eq!(f.connection.state(), ConnectionState::Disconnected);
        assert!(matches!(f.connection.connect().await, Err(FeedError::Closed)));
    }

    #[tokio::test]
    async fn shutdown_during_handshake_drops_session() {
        let f = fixture();
        f.connection.subscribe(&[sym("NSE:SBIN-EQ")]);
        let gate = f.transport.hold_handshake();
        let connection = f.connection.clone();
        let connecting = tokio::spawn(async move { connection.connect().await });
        wait_for_state(&f.connection, ConnectionState::Connecting).await;

        f.connection.shutdown().await;
        gate.notify_one();

        assert!(matches!(connecting.await.unwrap(), Err(FeedError::Closed)));
        assert_eq!(f.connection.state(), ConnectionState::Disconnected);
        let mut session = f.transport.take_session();
        assert!(session.sent.try_recv().is_err());
        assert!(session.inbound.is_closed());
    }

    #[tokio::test]
    async fn connect_when_connected_is_noop() {
        let f = fixture();

        f.connection.connect().await.unwrap();
        f.connection.connect().await.unwrap();

        assert_eq!(f.transport.attempts.lock().len(), 1);
    }
}
