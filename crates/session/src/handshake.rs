//! Application-level handshake on a freshly opened channel.
//!
//! Each side sends `PING` as soon as the transport reports the channel open
//! and goes live on the first `PONG` that answers it. Later `PONG`s are
//! heartbeat replies.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    AwaitingPong,
    Complete,
}

/// What a received `PONG` means for this channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PongOutcome {
    /// First answer to our `PING`: the channel is verified.
    Completed,
    /// The channel was already verified.
    Heartbeat,
    /// We never sent a `PING` on this channel.
    Unsolicited,
}

/// Handshake progress for one channel instance.
#[derive(Debug)]
pub(crate) struct Handshake {
    phase: Phase,
}

impl Handshake {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Pending,
        }
    }

    /// Starts the handshake. Returns `true` if a `PING` must be sent now.
    pub(crate) fn begin(&mut self) -> bool {
        if self.phase == Phase::Pending {
            self.phase = Phase::AwaitingPong;
            true
        } else {
            false
        }
    }

    pub(crate) fn on_pong(&mut self) -> PongOutcome {
        match self.phase {
            Phase::Pending => PongOutcome::Unsolicited,
            Phase::AwaitingPong => {
                self.phase = Phase::Complete;
                PongOutcome::Completed
            }
            Phase::Complete => PongOutcome::Heartbeat,
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_exactly_once() {
        let mut hs = Handshake::new();
        assert!(hs.begin());
        assert!(!hs.begin());
        assert_eq!(hs.on_pong(), PongOutcome::Completed);
        assert!(hs.is_complete());
        assert_eq!(hs.on_pong(), PongOutcome::Heartbeat);
        assert_eq!(hs.on_pong(), PongOutcome::Heartbeat);
    }

    #[test]
    fn pong_before_ping_does_not_complete() {
        let mut hs = Handshake::new();
        assert_eq!(hs.on_pong(), PongOutcome::Unsolicited);
        assert!(!hs.is_complete());
        assert!(hs.begin());
        assert_eq!(hs.on_pong(), PongOutcome::Completed);
    }
}
