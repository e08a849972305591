//! Error types for the channel adapter.

/// Failure classes a signaling service can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingErrorKind {
    PeerUnavailable,
    Network,
    ServerUnavailable,
    IdConflict,
    IncompatibleEndpoint,
}

/// Errors surfaced by a signaling service or handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    #[error("peer {0} is not available")]
    PeerUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("signaling server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("id {0} is already in use")]
    IdConflict(String),

    #[error("incompatible endpoint: {0}")]
    IncompatibleEndpoint(String),
}

impl SignalingError {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> SignalingErrorKind {
        match self {
            Self::PeerUnavailable(_) => SignalingErrorKind::PeerUnavailable,
            Self::Network(_) => SignalingErrorKind::Network,
            Self::ServerUnavailable(_) => SignalingErrorKind::ServerUnavailable,
            Self::IdConflict(_) => SignalingErrorKind::IdConflict,
            Self::IncompatibleEndpoint(_) => SignalingErrorKind::IncompatibleEndpoint,
        }
    }
}

/// Errors produced by an open channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            SignalingError::IdConflict("x".into()).kind(),
            SignalingErrorKind::IdConflict
        );
        assert_eq!(
            SignalingError::PeerUnavailable("x".into()).kind(),
            SignalingErrorKind::PeerUnavailable
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(
            SignalingError::PeerUnavailable("abcd-efgh".into()).to_string(),
            "peer abcd-efgh is not available"
        );
        assert_eq!(ChannelError::Closed.to_string(), "channel closed");
    }
}
