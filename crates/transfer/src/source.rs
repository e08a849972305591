//! Byte sources for outgoing transfers.

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use peerlink_protocol::constants::DEFAULT_MIME_TYPE;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::TransferError;

/// A file to be sent: its name, size, MIME type and a reader over its bytes.
pub struct FileSource {
    name: String,
    size: u64,
    mime_type: String,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    read: u64,
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("read", &self.read)
            .finish_non_exhaustive()
    }
}

impl FileSource {
    /// Opens `path`. The MIME type is guessed from the extension.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidName(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidName(path.display().to_string()))?;

        Ok(Self::from_reader(
            name,
            metadata.len(),
            guess_mime_type(path),
            file,
        ))
    }

    /// Wraps in-memory bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = guess_mime_type(Path::new(&name));
        let size = bytes.len() as u64;
        Self::from_reader(name, size, mime_type, Cursor::new(bytes))
    }

    /// Wraps an arbitrary reader that is expected to yield exactly `size` bytes.
    pub fn from_reader<R>(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        reader: R,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            reader: Box::new(reader),
            read: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Bytes handed out so far.
    pub fn position(&self) -> u64 {
        self.read
    }

    /// Reads the next chunk of at most `chunk_size` bytes.
    ///
    /// Returns an empty vector once `size` bytes have been read. Running out
    /// of data before that is a [`TransferError::ShortRead`].
    pub async fn read_chunk(&mut self, chunk_size: usize) -> Result<Vec<u8>, TransferError> {
        let remaining = self.size - self.read;
        let want = remaining.min(chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;

        while filled < want {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(TransferError::ShortRead {
                    expected: self.size,
                    read: self.read + filled as u64,
                });
            }
            filled += n;
        }

        self.read += want as u64;
        Ok(buf)
    }
}

fn guess_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}
