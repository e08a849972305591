//! Chunked file transfer over a peerlink channel.
//!
//! The sending side announces a file, waits for the acknowledgement and then
//! streams it in fixed-size binary chunks, pausing while the channel's send
//! queue is above its high-water mark. The receiving side assembles chunks
//! against the announced size into a [`ReceivedFile`].

mod artifact;
mod incoming;
mod outgoing;
mod progress;
mod source;

pub use artifact::{ReceivedFile, validate_file_name};
pub use incoming::{ChunkOutcome, IncomingAssembler};
pub use outgoing::{
    OutgoingReport, OutgoingState, OutgoingTransfer, StreamSettings, spawn_chunk_loop,
    wait_for_buffer_space,
};
pub use progress::{ProgressThrottle, SpeedCalculator};
pub use source::FileSource;

use peerlink_channel::ChannelError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source ended early: expected {expected} bytes, read {read}")]
    ShortRead { expected: u64, read: u64 },

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("channel closed")]
    ChannelClosed,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("another transfer is in progress: {0}")]
    Busy(String),

    #[error("transfer id already used: {0}")]
    DuplicateId(String),

    #[error("no active incoming transfer")]
    NoActiveTransfer,

    #[error("transfer {id} overflowed: {received} bytes received for size {size}")]
    Overflow { id: String, size: u64, received: u64 },

    #[error("transfer {0} is not awaiting acknowledgement")]
    NotAnnounced(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}

impl TransferError {
    /// Returns `true` if the error means the channel itself is gone, as
    /// opposed to a failure confined to one transfer.
    pub fn is_channel_level(&self) -> bool {
        matches!(self, Self::Channel(_) | Self::ChannelClosed)
    }
}
