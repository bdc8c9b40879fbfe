//! Connection Retry Policy
//!
//! Bounded retry for the feed handshake. The default makes three attempts
//! spaced a fixed two seconds apart; exponential backoff and jitter are
//! available for deployments that want them.

use std::time::Duration;

use rand::Rng;

/// Default number of connection attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default cap for exponential backoff.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay every time.
    Fixed(Duration),
    /// Delay multiplied after every failure, capped at `max`.
    Exponential {
        /// Delay after the first failure.
        initial: Duration,
        /// Upper bound.
        max: Duration,
        /// Growth factor (e.g. 2.0 doubles the delay).
        multiplier: f64,
    },
}

impl Backoff {
    /// Un-jittered delay after the given failed attempt (1-based).
    #[must_use]
    pub fn base_delay(&self, failed_attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = i32::try_from(failed_attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                #[allow(clippy::cast_precision_loss)]
                let scaled = initial.as_millis() as f64 * multiplier.powi(exponent);
                let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
                let millis = if scaled.is_finite() && scaled > 0.0 {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        (scaled.round() as u64).min(max_millis)
                    }
                } else if scaled.is_infinite() {
                    max_millis
                } else {
                    0
                };
                Duration::from_millis(millis)
            }
        }
    }
}

/// Retry policy for `FeedConnection::connect_with_retry`.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tick_relay::application::services::retry::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.delay_after(1), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay schedule.
    pub backoff: Backoff,
    /// Jitter as a fraction of the delay (0.1 = ±10%). Zero disables jitter.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed(DEFAULT_RETRY_DELAY),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
            jitter_factor: 0.0,
        }
    }

    /// Doubling backoff from `initial`, capped at `max`.
    #[must_use]
    pub const fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                initial,
                max,
                multiplier: 2.0,
            },
            jitter_factor: 0.0,
        }
    }

    /// Set the jitter factor.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Attempts to make, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        self.apply_jitter(self.backoff.base_delay(failed_attempt))
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
