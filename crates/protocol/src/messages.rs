use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::{MAX_CONTROL_MESSAGE_SIZE, MessageType};
use crate::envelope::Envelope;

/// Metadata announced in `FILE_START`.
///
/// `id` is unique per transfer and correlates the sending and receiving
/// sides of the same logical transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileMeta {
    /// Creates metadata with a freshly generated transfer id.
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

/// Optional body of `ACK_FILE_START`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct FileAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

/// A structured message on the control path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Ping,
    Pong,
    Text(String),
    FileStart(FileMeta),
    /// Acknowledges an announced transfer. Peers that omit the id
    /// acknowledge the single outstanding transfer.
    AckFileStart(Option<String>),
}

impl ControlMessage {
    /// Returns the wire type tag.
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Ping => MessageType::Ping,
            Self::Pong => MessageType::Pong,
            Self::Text(_) => MessageType::Text,
            Self::FileStart(_) => MessageType::FileStart,
            Self::AckFileStart(_) => MessageType::AckFileStart,
        }
    }

    /// Wraps the message in its wire envelope.
    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        let msg_type = self.msg_type();
        match self {
            Self::Ping | Self::Pong => Envelope::new::<()>(msg_type, None),
            Self::Text(text) => Envelope::new(msg_type, Some(text)),
            Self::FileStart(meta) => Envelope::new(msg_type, Some(meta)),
            Self::AckFileStart(None) => Envelope::new::<()>(msg_type, None),
            Self::AckFileStart(Some(id)) => Envelope::new(
                msg_type,
                Some(&FileAck {
                    id: Some(id.clone()),
                }),
            ),
        }
    }

    /// Serializes the message to its JSON text form.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.to_envelope()?)?)
    }

    /// Parses a JSON text frame.
    ///
    /// Returns `Ok(None)` for message types this side does not know, so
    /// newer peers can add types without breaking older ones.
    pub fn decode(text: &str) -> Result<Option<Self>, ProtocolError> {
        if text.len() > MAX_CONTROL_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(text.len()));
        }
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_envelope(&envelope)
    }

    /// Converts a parsed envelope into a typed message.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, ProtocolError> {
        let msg = match envelope.msg_type {
            MessageType::Ping => Self::Ping,
            MessageType::Pong => Self::Pong,
            MessageType::Text => Self::Text(
                envelope
                    .parse_payload::<String>()?
                    .ok_or(ProtocolError::MissingPayload(MessageType::Text))?,
            ),
            MessageType::FileStart => Self::FileStart(
                envelope
                    .parse_payload::<FileMeta>()?
                    .ok_or(ProtocolError::MissingPayload(MessageType::FileStart))?,
            ),
            MessageType::AckFileStart => {
                let ack = envelope.parse_payload::<FileAck>()?.unwrap_or_default();
                Self::AckFileStart(ack.id)
            }
            MessageType::Unknown => return Ok(None),
        };
        Ok(Some(msg))
    }
}
