//! Frame codec for stream-backed channels.
//!
//! # Wire format
//!
//! ```text
//! FRAME:
//!   [1 byte: kind, 0x01=text, 0x02=binary]
//!   [4 bytes BE: payload_len]
//!   [payload_len bytes: payload, UTF-8 for text frames]
//! ```
//!
//! A clean end of stream is only accepted on a frame boundary.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChannelError;

/// Frame kind: UTF-8 text.
pub const FRAME_TEXT: u8 = 0x01;

/// Frame kind: raw bytes.
pub const FRAME_BINARY: u8 = 0x02;

/// Largest payload accepted on the wire (4 MiB).
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// A single message carried over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> u8 {
        match self {
            Frame::Text(_) => FRAME_TEXT,
            Frame::Binary(_) => FRAME_BINARY,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Frame::Text(s) => s.as_bytes(),
            Frame::Binary(b) => b,
        }
    }
}

/// Writes one frame to the stream and flushes it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), ChannelError> {
    let len = frame.len();
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::Protocol(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_LEN})"
        )));
    }

    writer.write_u8(frame.kind()).await?;
    writer.write_u32(len as u32).await?;
    writer.write_all(frame.payload()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame from the stream.
///
/// Returns `None` when the stream ends cleanly between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, ChannelError> {
    let kind = match reader.read_u8().await {
        Ok(kind) => kind,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::Protocol(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_LEN})"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    match kind {
        FRAME_TEXT => String::from_utf8(payload)
            .map(|s| Some(Frame::Text(s)))
            .map_err(|e| ChannelError::Protocol(format!("invalid UTF-8 text frame: {e}"))),
        FRAME_BINARY => Ok(Some(Frame::Binary(payload))),
        other => Err(ChannelError::Protocol(format!(
            "unknown frame kind: 0x{other:02x}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_and_binary_frames() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, &Frame::Text(r#"{"type":"PING"}"#.into()))
            .await
            .unwrap();
        write_frame(&mut a, &Frame::Binary(vec![0, 1, 2, 255]))
            .await
            .unwrap();
        drop(a);

        assert_eq!(
            read_frame(&mut b).await.unwrap(),
            Some(Frame::Text(r#"{"type":"PING"}"#.into()))
        );
        assert_eq!(
            read_frame(&mut b).await.unwrap(),
            Some(Frame::Binary(vec![0, 1, 2, 255]))
        );
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_u8(FRAME_BINARY).await.unwrap();
        a.write_u32(10).await.unwrap();
        a.write_all(&[1, 2, 3]).await.unwrap();
        drop(a);

        assert!(matches!(read_frame(&mut b).await, Err(ChannelError::Io(_))));
    }

    #[tokio::test]
    async fn unknown_kind_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_u8(0x7f).await.unwrap();
        a.write_u32(0).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("unknown frame kind"));
    }

    #[tokio::test]
    async fn oversized_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_u8(FRAME_BINARY).await.unwrap();
        a.write_u32(MAX_FRAME_LEN as u32 + 1).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
    }

    #[tokio::test]
    async fn invalid_utf8_text_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_u8(FRAME_TEXT).await.unwrap();
        a.write_u32(2).await.unwrap();
        a.write_all(&[0xff, 0xfe]).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }
}
