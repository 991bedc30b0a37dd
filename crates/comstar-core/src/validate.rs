//! Comparing a directory against a manifest.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;
use url::Url;

use crate::config::IGNORE_FILE_NAME;
use crate::context::Context;
use crate::digest::FileDigest;
use crate::error::{ComstarError, Result};
use crate::manifest::{Manifest, ManifestEntry};
use crate::tasks::join_tasks;
use crate::walk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DifferenceKind {
    /// Listed in the manifest but absent locally.
    Missing(ManifestEntry),
    /// Present locally with a different digest.
    HashMismatch {
        upstream: ManifestEntry,
        local: FileDigest,
    },
    /// Present locally but not listed.
    Unknown,
}

/// A single discrepancy; `path` is relative to the checked directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub path: PathBuf,
    pub kind: DifferenceKind,
}

impl Difference {
    pub fn missing(entry: ManifestEntry) -> Self {
        Self {
            path: entry.path.to_path(Path::new("")),
            kind: DifferenceKind::Missing(entry),
        }
    }

    pub fn hash_mismatch(upstream: ManifestEntry, local: FileDigest) -> Self {
        Self {
            path: upstream.path.to_path(Path::new("")),
            kind: DifferenceKind::HashMismatch { upstream, local },
        }
    }

    pub fn unknown<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            kind: DifferenceKind::Unknown,
        }
    }

    /// Forward-slash form used in reports and progress events.
    pub fn display_path(&self) -> String {
        match &self.kind {
            DifferenceKind::Missing(e) | DifferenceKind::HashMismatch { upstream: e, .. } => {
                e.path.to_string()
            }
            DifferenceKind::Unknown => self
                .path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        }
    }
}

/// Outcome of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Sorted by path.
    pub differences: Vec<Difference>,
    /// Whether untracked files were searched for.
    pub force: bool,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.count(|k| matches!(k, DifferenceKind::Missing(_)))
    }

    pub fn mismatch_count(&self) -> usize {
        self.count(|k| matches!(k, DifferenceKind::HashMismatch { .. }))
    }

    pub fn unknown_count(&self) -> usize {
        self.count(|k| matches!(k, DifferenceKind::Unknown))
    }

    fn count(&self, pred: impl Fn(&DifferenceKind) -> bool) -> usize {
        self.differences.iter().filter(|d| pred(&d.kind)).count()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return writeln!(f, "All files validated.");
        }
        writeln!(f, "DIFFERENCES")?;
        writeln!(f, "-----------")?;
        for diff in &self.differences {
            let label = match diff.kind {
                DifferenceKind::Missing(_) => "MISSING FILE",
                DifferenceKind::HashMismatch { .. } => "HASH MISMATCH",
                DifferenceKind::Unknown => "UNKNOWN FILE",
            };
            writeln!(f, "  {}: {}", label, diff.display_path())?;
        }
        writeln!(f)?;
        write!(
            f,
            "Missing items: {}, Desynced items: {}",
            self.missing_count(),
            self.mismatch_count()
        )?;
        if self.force {
            write!(f, ", Untracked items: {}", self.unknown_count())?;
        }
        writeln!(f)
    }
}

/// Fetch the manifest at `target` and validate `dir` against it.
pub async fn verify_manifest(
    target: &Url,
    dir: &Path,
    force: bool,
    ctx: &Context,
) -> Result<ValidationReport> {
    let manifest = ctx.fetcher().fetch_manifest(target).await?;
    validate(&manifest, dir, force, ctx).await
}

/// Hash every tracked file under `dir` and compare it to `manifest`.
///
/// With `force`, files under `dir` that the manifest does not list are
/// reported as [`DifferenceKind::Unknown`].
pub async fn validate(
    manifest: &Manifest,
    dir: &Path,
    force: bool,
    ctx: &Context,
) -> Result<ValidationReport> {
    let mut differences = check_entries(manifest, dir, ctx).await?;
    if force {
        differences.extend(find_untracked(manifest, dir, ctx).await?);
    }
    differences.sort_by(|a, b| a.path.cmp(&b.path));

    let report = ValidationReport { differences, force };
    info!(
        dir = %dir.display(),
        missing = report.missing_count(),
        mismatched = report.mismatch_count(),
        unknown = report.unknown_count(),
        "validation finished"
    );
    Ok(report)
}

async fn check_entries(manifest: &Manifest, dir: &Path, ctx: &Context) -> Result<Vec<Difference>> {
    let progress = ctx.progress("Validating files", manifest.entries.len());
    let limiter = ctx.limiter();
    let mut handles = Vec::with_capacity(manifest.entries.len());

    for entry in manifest.entries.iter().cloned() {
        let local = entry.path.to_path(dir);
        let events = progress.sender();
        let limiter = limiter.clone();

        handles.push(tokio::spawn(async move {
            let _permit = limiter.acquire().await?;
            events.started(entry.path.as_str()).await;
            let name = entry.path.to_string();
            let diff = if !is_file(&local).await? {
                Some(Difference::missing(entry))
            } else {
                let actual = FileDigest::of_file_async(local).await?;
                if actual != entry.sha512 {
                    Some(Difference::hash_mismatch(entry, actual))
                } else {
                    None
                }
            };
            events.done(&name).await;
            Ok::<_, ComstarError>(diff)
        }));
    }

    let results = join_tasks(handles).await;
    progress.finish().await;
    Ok(results?.into_iter().flatten().collect())
}

/// Files under `dir` that `manifest` does not list.
pub(crate) async fn find_untracked(
    manifest: &Manifest,
    dir: &Path,
    ctx: &Context,
) -> Result<Vec<Difference>> {
    let walk_dir = dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || walk::walk_files(&walk_dir, IGNORE_FILE_NAME)).await??;
    let tracked: HashSet<PathBuf> = manifest.entries.iter().map(|e| e.path.to_path(dir)).collect();

    let progress = ctx.progress("Searching for untracked files", files.len());
    let events = progress.sender();
    let mut untracked = Vec::new();
    for file in files {
        let rel = file.strip_prefix(dir).unwrap_or(&file).to_path_buf();
        let name = rel.to_string_lossy().into_owned();
        events.started(&name).await;
        if !tracked.contains(&file) {
            untracked.push(Difference::unknown(rel));
        }
        events.done(&name).await;
    }
    drop(events);
    progress.finish().await;
    Ok(untracked)
}

/// `true` for an existing regular file.
///
/// A directory in its place counts as absent, and so does a path whose
/// parent is a regular file.
pub(crate) async fn is_file(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestPath;

    fn entry(path: &str, data: &[u8]) -> ManifestEntry {
        ManifestEntry {
            path: ManifestPath::new(path).unwrap(),
            sha512: FileDigest::of_bytes(data),
            source: Url::parse("https://h/x").unwrap(),
        }
    }

    #[test]
    fn report_display_without_force() {
        let report = ValidationReport {
            differences: vec![
                Difference::missing(entry("a.txt", b"a")),
                Difference::hash_mismatch(entry("sub/b.txt", b"b"), FileDigest::of_bytes(b"x")),
            ],
            force: false,
        };
        let text = report.to_string();
        assert_eq!(
            text,
            "DIFFERENCES\n-----------\n  MISSING FILE: a.txt\n  HASH MISMATCH: sub/b.txt\n\nMissing items: 1, Desynced items: 1\n"
        );
    }

    #[test]
    fn report_display_with_force_counts_untracked() {
        let report = ValidationReport {
            differences: vec![Difference::unknown(Path::new("extra").join("c.txt"))],
            force: true,
        };
        let text = report.to_string();
        assert!(text.contains("  UNKNOWN FILE: extra/c.txt\n"));
        assert!(text.ends_with("Missing items: 0, Desynced items: 0, Untracked items: 1\n"));
    }

    #[test]
    fn clean_report() {
        let report = ValidationReport::default();
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "All files validated.\n");
    }

    #[tokio::test]
    async fn directory_in_place_of_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a.txt")).unwrap();
        assert!(!is_file(&dir.path().join("a.txt")).await.unwrap());
        assert!(!is_file(&dir.path().join("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn path_below_a_regular_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("assets"), b"not a dir").unwrap();
        assert!(!is_file(&dir.path().join("assets").join("app.js")).await.unwrap());
    }
}
