//! Local directory backend, e.g. a mounted bucket or a staging tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::ObjectStore;
use crate::error::Result;
use crate::fsutil;
use crate::manifest::ManifestPath;

/// Stores each object as a plain file at `<root>/<key>`.
///
/// Keys are validated like manifest paths so they cannot escape `root`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        Ok(ManifestPath::new(key)?.to_path(&self.root))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, local_file: &Path, _content_type: &str) -> Result<()> {
        let dest = self.object_path(key)?;
        let bytes = fsutil::copy_atomic(local_file, &dest).await?;
        debug!(key, bytes, "stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        fsutil::remove_if_exists(&path).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
