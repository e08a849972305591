//! Classifies inbound frames.

use peerlink_channel::Frame;
use peerlink_protocol::ControlMessage;
use tracing::{trace, warn};

/// Where an inbound frame should go.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// File bytes for the active incoming transfer.
    Chunk(Vec<u8>),
    Control(ControlMessage),
    /// Unknown or malformed; already logged.
    Ignored,
}

pub(crate) fn route(frame: Frame) -> Inbound {
    match frame {
        Frame::Binary(bytes) => Inbound::Chunk(bytes),
        Frame::Text(text) => match ControlMessage::decode(&text) {
            Ok(Some(msg)) => {
                trace!(msg_type = ?msg.msg_type(), "control message received");
                Inbound::Control(msg)
            }
            Ok(None) => {
                trace!("ignoring unknown control message type");
                Inbound::Ignored
            }
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed control message");
                Inbound::Ignored
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_is_a_chunk() {
        assert_eq!(
            route(Frame::Binary(vec![1, 2, 3])),
            Inbound::Chunk(vec![1, 2, 3])
        );
    }

    #[test]
    fn text_is_decoded() {
        assert_eq!(
            route(Frame::Text(r#"{"type":"PING"}"#.into())),
            Inbound::Control(ControlMessage::Ping)
        );
        assert_eq!(
            route(Frame::Text(r#"{"type":"TEXT","payload":"hi"}"#.into())),
            Inbound::Control(ControlMessage::Text("hi".into()))
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        assert_eq!(
            route(Frame::Text(r#"{"type":"TYPING","payload":true}"#.into())),
            Inbound::Ignored
        );
    }

    #[test]
    fn malformed_text_is_ignored() {
        assert_eq!(route(Frame::Text("not json".into())), Inbound::Ignored);
        assert_eq!(
            route(Frame::Text(r#"{"type":"FILE_START"}"#.into())),
            Inbound::Ignored
        );
    }
}
