//! In-memory fakes for service tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::application::ports::{
    Credential, FeedError, FeedRequest, FeedSession, FeedTransport, MockTokenProvider, SinkError,
    TickCallback,
};
use crate::domain::streaming::TickRecord;

/// Test-side ends of one fake session.
pub struct SessionHandle {
    /// Requests the connection sent upstream.
    pub sent: mpsc::UnboundedReceiver<FeedRequest>,
    /// Frames to deliver to the connection. Dropping closes the session.
    pub inbound: mpsc::UnboundedSender<String>,
}

struct FakeSession {
    sent: mpsc::UnboundedSender<FeedRequest>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FeedSession for FakeSession {
    async fn send(&mut self, request: &FeedRequest) -> Result<(), FeedError> {
        self.sent
            .send(request.clone())
            .map_err(|_| FeedError::Transport("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, FeedError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Scriptable transport recording every connect attempt.
#[derive(Default)]
pub struct FakeTransport {
    outcomes: Mutex<VecDeque<FeedError>>,
    always_fail: bool,
    /// Time of each connect call.
    pub attempts: Mutex<Vec<Instant>>,
    sessions: Mutex<VecDeque<SessionHandle>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeTransport {
    /// Transport whose every connect fails with a transport error.
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Default::default()
        }
    }

    /// Fail the next connect with `error`.
    pub fn fail_next(&self, error: FeedError) {
        self.outcomes.lock().push_back(error);
    }

    /// Hold every handshake until the returned gate is notified.
    pub fn hold_handshake(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Oldest session not yet taken.
    pub fn take_session(&self) -> SessionHandle {
        self.try_take_session().unwrap()
    }

    /// Oldest session not yet taken, if any.
    pub fn try_take_session(&self) -> Option<SessionHandle> {
        self.sessions.lock().pop_front()
    }

    /// Number of connect calls so far.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl FeedTransport for FakeTransport {
    async fn connect(&self, _: &Credential) -> Result<Box<dyn FeedSession>, FeedError> {
        self.attempts.lock().push(Instant::now());
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.always_fail {
            return Err(FeedError::Transport("connection refused".into()));
        }
        if let Some(error) = self.outcomes.lock().pop_front() {
            return Err(error);
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.sessions.lock().push_back(SessionHandle {
            sent: sent_rx,
            inbound: inbound_tx,
        });
        Ok(Box::new(FakeSession {
            sent: sent_tx,
            inbound: inbound_rx,
        }))
    }
}

/// Callback recording everything it receives.
#[derive(Default)]
pub struct Recorder {
    /// Delivered ticks.
    pub ticks: Mutex<Vec<TickRecord>>,
    /// Reported errors.
    pub errors: Mutex<Vec<String>>,
}

impl TickCallback for Recorder {
    fn on_tick(&self, tick: &TickRecord) -> Result<(), SinkError> {
        self.ticks.lock().push(tick.clone());
        Ok(())
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

/// Token provider that always hands out the same credential.
pub fn token_provider() -> MockTokenProvider {
    let mut tokens = MockTokenProvider::new();
    tokens
        .expect_token()
        .returning(|| Ok(Credential::new("app-token")));
    tokens
}
