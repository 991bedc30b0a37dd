//! Atomic file replacement.
//!
//! Writes land in a hidden `.<name>.part` sibling and are renamed into place,
//! so readers never observe a half-written file. The part file is hidden,
//! which keeps it out of directory walks.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{ComstarError, Result};

pub(crate) fn part_path(dest: &Path) -> Result<PathBuf> {
    let name = dest
        .file_name()
        .ok_or_else(|| ComstarError::InvalidPath(dest.display().to_string()))?;
    Ok(dest.with_file_name(format!(".{}.part", name.to_string_lossy())))
}

/// Create the parent directory of `dest` if needed.
pub(crate) async fn ensure_parent(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Replace `dest` with `bytes`.
pub(crate) async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(dest).await?;
    let part = part_path(dest)?;
    let result = async {
        let mut file = tokio::fs::File::create(&part).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part, dest).await?;
        Ok::<(), ComstarError>(())
    }
    .await;
    if result.is_err() {
        discard(&part).await;
    }
    result
}

/// Replace `dest` with a copy of `src` without buffering it in memory.
pub(crate) async fn copy_atomic(src: &Path, dest: &Path) -> Result<u64> {
    ensure_parent(dest).await?;
    let part = part_path(dest)?;
    let result = async {
        let bytes = tokio::fs::copy(src, &part).await?;
        tokio::fs::rename(&part, dest).await?;
        Ok::<u64, ComstarError>(bytes)
    }
    .await;
    if result.is_err() {
        discard(&part).await;
    }
    result
}

/// Best-effort removal of an abandoned part file.
pub(crate) async fn discard(part: &Path) {
    let _ = tokio::fs::remove_file(part).await;
}

/// Remove a file; a file that is already gone counts as removed.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_is_hidden_sibling() {
        let part = part_path(Path::new("/data/sub/file.bin")).unwrap();
        assert_eq!(part, Path::new("/data/sub/.file.bin.part"));
    }

    #[tokio::test]
    async fn copy_atomic_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, vec![7u8; 256 * 1024]).unwrap();
        let dest = dir.path().join("x/y/dest.bin");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"old").unwrap();

        let n = copy_atomic(&src, &dest).await.unwrap();
        assert_eq!(n, 256 * 1024);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 256 * 1024);
        assert!(!part_path(&dest).unwrap().exists());
    }

    #[tokio::test]
    async fn copy_atomic_missing_source_leaves_dest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest.bin");
        std::fs::write(&dest, b"keep").unwrap();

        assert!(copy_atomic(&dir.path().join("nope"), &dest).await.is_err());
        assert_eq!(std::fs::read(&dest).unwrap(), b"keep");
        assert!(!part_path(&dest).unwrap().exists());
    }

    #[tokio::test]
    async fn write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a/b/c.txt");
        write_atomic(&dest, b"one").await.unwrap();
        write_atomic(&dest, b"two").await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"two");
        assert!(!part_path(&dest).unwrap().exists());
    }

    #[tokio::test]
    async fn remove_if_exists_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        assert!(!remove_if_exists(&path).await.unwrap());
        std::fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!path.exists());
    }
}
