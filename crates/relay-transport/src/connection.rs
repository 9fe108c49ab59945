//! Connection state and publish retry policy.

use std::time::Duration;

use crate::{BASE_RETRY_DELAY_MS, MAX_PUBLISH_ATTEMPTS};

/// Connection state of a bus client.
///
/// The client reconnects on its own after losing the server, so there is no
/// terminal failure state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial handshake in progress.
    #[default]
    Connecting,

    /// Connected and able to publish.
    Connected,

    /// Lost the server; reconnecting in the background.
    Disconnected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Backoff schedule for retrying a failed publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Base delay between attempts (exponential backoff applied).
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_PUBLISH_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default delays and `max_attempts` attempts.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Calculate delay before the attempt following failed attempt `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// What the relay does when a publish fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PublishPolicy {
    /// The first failure is fatal.
    #[default]
    Fatal,

    /// Retry with backoff; exhausting the policy is fatal.
    Retry(RetryPolicy),
}

impl PublishPolicy {
    /// Delay before retrying after `attempt` failures, or `None` when the
    /// failure is final.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Fatal => None,
            Self::Retry(policy) if policy.should_retry(attempt) => {
                Some(policy.delay_for_attempt(attempt))
            }
            Self::Retry(_) => None,
        }
    }
}
