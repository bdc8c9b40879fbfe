//! Feed Supervisor
//!
//! Keeps the feed connection up for the lifetime of the process: connects
//! with the retry policy, waits for the session to drop, and reconnects.
//! Exhausting the retry budget is fatal and is surfaced to consumers on the
//! `error` channel before the supervisor returns.

use tokio_util::sync::CancellationToken;

use super::feed_connection::FeedConnection;
use super::retry::RetryPolicy;
use crate::application::ports::FeedError;

/// Default number of fresh-token retries after a credential rejection.
pub const DEFAULT_AUTH_RETRIES: u32 = 1;

/// Reconnect loop around a `FeedConnection`.
#[derive(Debug)]
pub struct FeedSupervisor {
    connection: FeedConnection,
    policy: RetryPolicy,
    auth_retries: u32,
    cancel: CancellationToken,
}

impl FeedSupervisor {
    /// Create a supervisor.
    #[must_use]
    pub const fn new(
        connection: FeedConnection,
        policy: RetryPolicy,
        auth_retries: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection,
            policy,
            auth_retries,
            cancel,
        }
    }

    /// Run until cancelled or the feed becomes unreachable.
    ///
    /// # Errors
    ///
    /// Returns the terminal `FeedError` (retries exhausted or credential
    /// rejected after `auth_retries` fresh tokens).
    pub async fn run(self) -> Result<(), FeedError> {
        let mut state = self.connection.watch_state();

        loop {
            let established = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                result = self.establish() => result,
            };

            match established {
                Ok(()) => {}
                Err(FeedError::Closed) => return Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "Market data feed unavailable, giving up");
                    self.connection
                        .sink()
                        .report_error(&format!("market data feed unavailable: {e}"));
                    return Err(e);
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                changed = async { state.wait_for(|s| !s.is_connected()).await.map(drop) } => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }

            tracing::warn!("Feed disconnected, reconnecting");
        }
    }

    async fn establish(&self) -> Result<(), FeedError> {
        let mut auth_failures = 0;

        loop {
            match self.connection.connect_with_retry(&self.policy).await {
                Err(FeedError::AuthRejected(reason)) if auth_failures < self.auth_retries => {
                    auth_failures += 1;
                    tracing::warn!(
                        attempt = auth_failures,
                        max_attempts = self.auth_retries,
                        reason = %reason,
                        "Credential rejected, retrying with a fresh token"
                    );
                }
                other => return other,
            }
        }
    }
}
