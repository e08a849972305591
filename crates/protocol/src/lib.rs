//! Wire protocol types for peerlink sessions.
//!
//! Control messages travel as JSON envelopes `{ "type", "payload"? }` on
//! the channel's text path. File bytes travel as raw binary messages with
//! no envelope.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use constants::MessageType;
pub use envelope::Envelope;
pub use messages::{ControlMessage, FileMeta};
pub use types::{
    ChatRecord, Party, TransferDirection, TransferProgress, TransferStatus, percent_of,
};

/// Errors produced while decoding control messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0:?} message is missing its payload")]
    MissingPayload(MessageType),

    #[error("control message too large ({0} bytes)")]
    TooLarge(usize),
}
