//! Peer session management.
//!
//! A [`Session`] owns one signaling registration and at most one channel to
//! a remote peer. It drives connection setup (with retries for guests), the
//! `PING`/`PONG` handshake, heartbeat liveness, chat and file transfers.
//!
//! Every mutation happens inside a single driver task; the [`Session`]
//! handle only sends commands to it and observes state, events and the chat
//! log.

mod chat;
mod config;
mod driver;
mod handshake;
mod heartbeat;
mod router;
mod session;
mod types;

pub use chat::ChatLog;
pub use config::{RetryPolicy, SessionConfig, normalize_peer_id};
pub use session::Session;
pub use types::{FailureReason, SessionEvent, SessionState};

/// Errors returned by [`Session`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid peer id: {0:?}")]
    InvalidPeerId(String),

    #[error("cannot connect to your own id")]
    SelfConnection,

    #[error("session already active ({0})")]
    AlreadyStarted(SessionState),

    #[error("session is not live")]
    NotLive,

    #[error("failed to send on the channel")]
    SendFailed,

    #[error("transfer {0} still in progress")]
    Busy(String),

    #[error("{0}")]
    Failed(FailureReason),

    #[error("session exited before the operation completed")]
    Exited,

    #[error("session driver is gone")]
    Closed,
}
