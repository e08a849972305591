//! Public types for the session state machine.

use std::fmt;
use std::time::Duration;

use peerlink_channel::{LinkStatus, SignalingError};
use peerlink_protocol::{ChatRecord, TransferDirection, TransferProgress};
use peerlink_transfer::ReceivedFile;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing started, or torn down.
    Idle,
    /// Registered with the signaling service.
    SignalingUp,
    /// Host waiting for a guest to connect.
    AwaitingRemote,
    /// Guest dialing the host.
    Connecting { attempt: u32 },
    /// Transport reports the channel open; not yet verified.
    RawChannelOpen,
    /// `PING` sent, waiting for the answering `PONG`.
    Handshaking,
    /// Verified and exchanging data.
    Live,
    /// A live channel was lost.
    Disconnected,
    /// Session start failed for good.
    Failed(FailureReason),
}

impl SessionState {
    /// `true` for states from which a new start or join is accepted.
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected | Self::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::SignalingUp => f.write_str("signaling up"),
            Self::AwaitingRemote => f.write_str("awaiting remote"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::RawChannelOpen => f.write_str("channel open"),
            Self::Handshaking => f.write_str("handshaking"),
            Self::Live => f.write_str("live"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Why a session could not be established. Displays as a message fit for
/// showing to a person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    PeerUnavailable(String),
    Network(String),
    ServerUnavailable(String),
    IdConflict(String),
    IncompatibleEndpoint(String),
    /// Every connection attempt timed out.
    NoResponse { attempts: u32 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerUnavailable(id) => write!(
                f,
                "Nobody is waiting in room \"{id}\". Check the code and try again."
            ),
            Self::Network(_) => f.write_str("A network problem interrupted the connection."),
            Self::ServerUnavailable(_) => {
                f.write_str("The connection service is unreachable. Try again later.")
            }
            Self::IdConflict(id) => write!(f, "The room \"{id}\" is already in use."),
            Self::IncompatibleEndpoint(_) => {
                f.write_str("The other device is running an incompatible version.")
            }
            Self::NoResponse { attempts } => write!(
                f,
                "The other device did not respond after {attempts} attempts."
            ),
        }
    }
}

impl From<SignalingError> for FailureReason {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::PeerUnavailable(s) => Self::PeerUnavailable(s),
            SignalingError::Network(s) => Self::Network(s),
            SignalingError::ServerUnavailable(s) => Self::ServerUnavailable(s),
            SignalingError::IdConflict(s) => Self::IdConflict(s),
            SignalingError::IncompatibleEndpoint(s) => Self::IncompatibleEndpoint(s),
        }
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A connection attempt failed and another is scheduled.
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// Connectivity of the signaling link, independent of the channel.
    SignalingStatus(LinkStatus),
    /// A record was appended to the chat log.
    Message(ChatRecord),
    Progress(TransferProgress),
    FileReceived(ReceivedFile),
    TransferFailed {
        transfer_id: String,
        direction: TransferDirection,
        reason: String,
    },
}
