//! SHA-512 file digests as stored in manifests.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{ComstarError, Result};

const HEX_LEN: usize = 128;

/// SHA-512 digest (lowercase hex).
///
/// The inner field is private so the string is always 128 lowercase hex
/// characters, either computed here or validated via `TryFrom<String>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileDigest(String);

impl FileDigest {
    /// Digest of an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::from_hasher(Sha512::new_with_prefix(data))
    }

    /// Stream a file through the hasher.
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut hasher = Sha512::new();
        let mut input = File::open(path)?;
        io::copy(&mut input, &mut hasher)?;
        Ok(Self::from_hasher(hasher))
    }

    /// [`FileDigest::of_file`] on the blocking pool.
    pub async fn of_file_async(path: PathBuf) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::of_file(&path)).await?
    }

    pub(crate) fn from_hasher(hasher: Sha512) -> Self {
        FileDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for FileDigest {
    type Error = ComstarError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != HEX_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ComstarError::InvalidDigest(s));
        }
        Ok(FileDigest(s.to_ascii_lowercase()))
    }
}

impl From<FileDigest> for String {
    fn from(d: FileDigest) -> Self {
        d.0
    }
}

impl FromStr for FileDigest {
    type Err = ComstarError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl fmt::Display for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileDigest({})", self.short())
    }
}
