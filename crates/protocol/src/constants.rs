use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Size of one binary file chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// High-water mark for the channel send queue.
///
/// While the channel reports more than this many bytes buffered, the
/// sender stops reading from its source and waits for the queue to drain.
pub const BUFFERED_AMOUNT_HIGH: u64 = 16 * 1024 * 1024;

/// Re-check interval while waiting for the send queue to drain.
pub const BACKPRESSURE_POLL: Duration = Duration::from_millis(50);

/// Minimum spacing between progress notifications for one transfer.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Time a connection attempt has to reach `Live` (handshake included).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

/// Total connection attempts per join (the first try plus two retries).
pub const CONNECT_MAX_ATTEMPTS: u32 = 3;

/// How often a live session sends `PING`.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4);

/// Silence after which a live session is declared disconnected.
///
/// Roughly two missed heartbeat intervals.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest text control message accepted from a peer (1 MiB).
pub const MAX_CONTROL_MESSAGE_SIZE: usize = 1024 * 1024;

/// MIME type used when a source does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Control message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "FILE_START")]
    FileStart,
    #[serde(rename = "ACK_FILE_START")]
    AckFileStart,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}
