//! Session tunables.

use std::time::Duration;

use peerlink_protocol::constants::{
    BACKPRESSURE_POLL, BUFFERED_AMOUNT_HIGH, CHUNK_SIZE, CONNECT_MAX_ATTEMPTS, CONNECT_TIMEOUT,
    HEARTBEAT_INTERVAL, LIVENESS_TIMEOUT, PROGRESS_INTERVAL,
};
use peerlink_transfer::StreamSettings;

use crate::SessionError;

/// How a guest retries a connection that does not reach `Live`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Time one attempt has to reach `Live`, handshake included.
    pub per_attempt_timeout: Duration,
    /// Pause before the second attempt.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent pause.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: CONNECT_MAX_ATTEMPTS,
            per_attempt_timeout: CONNECT_TIMEOUT,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

/// Everything a session can be tuned with. Defaults match the protocol
/// constants.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub retry: RetryPolicy,
    pub heartbeat_interval: Duration,
    pub liveness_timeout: Duration,
    pub chunk_size: usize,
    pub buffered_amount_high: u64,
    pub backpressure_poll: Duration,
    pub progress_interval: Duration,
    /// Pause before acknowledging `FILE_START`. Cosmetic; zero sends at once.
    pub ack_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            liveness_timeout: LIVENESS_TIMEOUT,
            chunk_size: CHUNK_SIZE,
            buffered_amount_high: BUFFERED_AMOUNT_HIGH,
            backpressure_poll: BACKPRESSURE_POLL,
            progress_interval: PROGRESS_INTERVAL,
            ack_delay: Duration::ZERO,
        }
    }
}

impl SessionConfig {
    pub(crate) fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            chunk_size: self.chunk_size,
            buffered_amount_high: self.buffered_amount_high,
            backpressure_poll: self.backpressure_poll,
            progress_interval: self.progress_interval,
        }
    }
}

/// Normalizes a user-typed room id: surrounding whitespace is dropped and
/// the id is lowercased.
///
/// Ids travel as single words in the TCP hello, so blank ids and ids with
/// inner whitespace are rejected.
pub fn normalize_peer_id(input: &str) -> Result<String, SessionError> {
    let id = input.trim().to_lowercase();
    if id.is_empty() || id.contains(char::is_whitespace) {
        return Err(SessionError::InvalidPeerId(input.to_string()));
    }
    Ok(id)
}
