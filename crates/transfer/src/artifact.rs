use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use peerlink_protocol::FileMeta;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::TransferError;

/// Highest `name (N).ext` suffix tried before giving up.
const MAX_NAME_SUFFIX: u32 = 999;

/// A fully received file.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    meta: FileMeta,
    data: Vec<u8>,
}

impl fmt::Debug for ReceivedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedFile")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}

impl ReceivedFile {
    pub fn new(meta: FileMeta, data: Vec<u8>) -> Self {
        Self { meta, data }
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// SHA-256 of the contents, hex-encoded.
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        hex::encode(hasher.finalize())
    }

    /// Writes the file into `dir` under its announced name.
    ///
    /// Existing files are never overwritten: `name.ext` becomes
    /// `name (1).ext`, `name (2).ext` and so on. Returns the path written.
    pub async fn save_into(&self, dir: &Path) -> Result<PathBuf, TransferError> {
        validate_file_name(&self.meta.name)?;
        tokio::fs::create_dir_all(dir).await?;

        for n in 0..=MAX_NAME_SUFFIX {
            let candidate = dir.join(numbered_name(&self.meta.name, n));
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await;

            match file {
                Ok(mut file) => {
                    file.write_all(&self.data).await?;
                    file.flush().await?;
                    info!(
                        transfer = %self.meta.id,
                        path = %candidate.display(),
                        size = self.data.len(),
                        "received file saved"
                    );
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(TransferError::InvalidName(format!(
            "no free file name for {}",
            self.meta.name
        )))
    }
}

/// Validates that a peer-supplied file name is a single plain component.
///
/// Rejects:
/// - Empty names
/// - Absolute paths and Windows prefixes (`C:`, `\\server`)
/// - Anything with a directory part, including `..` traversal
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "directory separators not allowed: {name}"
        )));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(TransferError::InvalidName(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) => Err(TransferError::InvalidName(format!(
            "parent directory traversal not allowed: {name}"
        ))),
        _ => Err(TransferError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}

fn numbered_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{name} ({n})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, data: &[u8]) -> ReceivedFile {
        ReceivedFile::new(
            FileMeta {
                id: "t1".into(),
                name: name.into(),
                size: data.len() as u64,
                mime_type: "application/octet-stream".into(),
            },
            data.to_vec(),
        )
    }

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            file("a", b"hello").sha256_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("/tmp/evil").is_err());
        assert!(validate_file_name("sub/file.txt").is_err());
        assert!(validate_file_name("sub\\file.txt").is_err());
        assert!(validate_file_name(".").is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_file_name("photo.jpg").is_ok());
        assert!(validate_file_name(".bashrc").is_ok());
        assert!(validate_file_name("archive.tar.gz").is_ok());
    }

    #[test]
    fn numbering_keeps_extension() {
        assert_eq!(numbered_name("a.bin", 0), "a.bin");
        assert_eq!(numbered_name("a.bin", 2), "a (2).bin");
        assert_eq!(numbered_name("archive.tar.gz", 1), "archive.tar (1).gz");
        assert_eq!(numbered_name("README", 1), "README (1)");
        assert_eq!(numbered_name(".bashrc", 1), ".bashrc (1)");
    }

    #[tokio::test]
    async fn save_never_clobbers() {
        let dir = tempfile::tempdir().unwrap();

        let first = file("a.bin", b"one").save_into(dir.path()).await.unwrap();
        let second = file("a.bin", b"two").save_into(dir.path()).await.unwrap();

        assert_eq!(first, dir.path().join("a.bin"));
        assert_eq!(second, dir.path().join("a (1).bin"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[tokio::test]
    async fn save_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let err = file("../escape.txt", b"x")
            .save_into(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidName(_)));
    }

    #[tokio::test]
    async fn save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("downloads");
        let path = file("a.txt", b"hi").save_into(&target).await.unwrap();
        assert_eq!(path, target.join("a.txt"));
    }
}
