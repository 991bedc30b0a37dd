//! Manifest model (`comstar.json`) and generation.
//!
//! A manifest lists every tracked file of a directory with its SHA-512
//! digest and the URL it can be fetched from. Entry sources are siblings of
//! the manifest URL, so a published directory is self-describing.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::{IGNORE_FILE_NAME, MANIFEST_FILE_NAME};
use crate::context::Context;
use crate::digest::FileDigest;
use crate::error::{ComstarError, Result};
use crate::fsutil;
use crate::tasks::join_tasks;
use crate::walk;

/// Relative, forward-slash path of a tracked file.
///
/// Never empty or absolute, and never contains `.`/`..` segments or
/// backslashes, so joining it onto a directory cannot escape that directory.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ManifestPath(String);

impl ManifestPath {
    pub fn new(path: &str) -> Result<Self> {
        let invalid = || ComstarError::InvalidPath(path.to_string());
        if path.is_empty() || path.starts_with('/') || path.contains('\\') {
            return Err(invalid());
        }
        for segment in path.split('/') {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(c)), None) if c == segment => {}
                _ => return Err(invalid()),
            }
        }
        Ok(ManifestPath(path.to_string()))
    }

    /// Build from a path relative to the walked directory.
    pub fn from_relative(rel: &Path) -> Result<Self> {
        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(c) => match c.to_str() {
                    Some(s) => segments.push(s),
                    None => {
                        return Err(ComstarError::InvalidPath(rel.to_string_lossy().into_owned()))
                    }
                },
                _ => return Err(ComstarError::InvalidPath(rel.to_string_lossy().into_owned())),
            }
        }
        Self::new(&segments.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Local path of this entry below `base`.
    pub fn to_path(&self, base: &Path) -> PathBuf {
        self.segments().fold(base.to_path_buf(), |p, s| p.join(s))
    }
}

impl TryFrom<String> for ManifestPath {
    type Error = ComstarError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<ManifestPath> for String {
    fn from(p: ManifestPath) -> Self {
        p.0
    }
}

impl fmt::Display for ManifestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ManifestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManifestPath({})", self.0)
    }
}

/// A single tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: ManifestPath,
    pub sha512: FileDigest,
    pub source: Url,
}

/// Wire shape of `comstar.json` before paths and digests are validated.
#[derive(Deserialize)]
struct RawManifest {
    source: Url,
    generated_at: DateTime<Utc>,
    entries: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    path: String,
    sha512: String,
    source: Url,
}

/// The `comstar.json` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub source: Url,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Assemble a manifest stamped with the current time. Entries are sorted by path.
    pub fn new(source: Url, mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Manifest {
            source,
            generated_at: Utc::now(),
            entries,
        }
    }

    /// Hash every file under `dir` and describe it as published at `target`.
    ///
    /// `target` is either the directory URL or the manifest URL itself.
    pub async fn generate(target: &Url, dir: &Path, ctx: &Context) -> Result<Manifest> {
        let base = directory_url(target)?;
        let walk_dir = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk::walk_files(&walk_dir, IGNORE_FILE_NAME)).await??;
        info!(dir = %dir.display(), files = files.len(), "generating manifest");

        let progress = ctx.progress("Generating manifest", files.len());
        let limiter = ctx.limiter();
        let mut handles = Vec::with_capacity(files.len());

        for file in files {
            let rel = file
                .strip_prefix(dir)
                .map_err(|_| ComstarError::InvalidPath(file.display().to_string()))?;
            let path = ManifestPath::from_relative(rel)?;
            let source = sibling_url(&base, path.segments())?;
            let events = progress.sender();
            let limiter = limiter.clone();

            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await?;
                events.started(path.as_str()).await;
                let sha512 = FileDigest::of_file_async(file).await?;
                debug!(path = %path, sha512 = %sha512.short(), "hashed");
                events.done(path.as_str()).await;
                Ok::<_, ComstarError>(ManifestEntry {
                    path,
                    sha512,
                    source,
                })
            }));
        }

        let entries = join_tasks(handles).await;
        progress.finish().await;

        let source = sibling_url(&base, [MANIFEST_FILE_NAME])?;
        Ok(Manifest::new(source, entries?))
    }

    /// Parse a manifest; `origin` is only used for error messages.
    ///
    /// Malformed JSON is [`ComstarError::InvalidManifest`]. A well-formed
    /// document with an unsafe path or a bad digest fails with
    /// [`ComstarError::InvalidPath`] or [`ComstarError::InvalidDigest`].
    /// Entries come back sorted by path whatever order the file used.
    pub fn from_slice(bytes: &[u8], origin: &str) -> Result<Manifest> {
        let raw: RawManifest =
            serde_json::from_slice(bytes).map_err(|e| ComstarError::InvalidManifest {
                url: origin.to_string(),
                reason: e.to_string(),
            })?;
        let entries = raw
            .entries
            .into_iter()
            .map(|e| {
                Ok(ManifestEntry {
                    path: ManifestPath::new(&e.path)?,
                    sha512: FileDigest::try_from(e.sha512)?,
                    source: e.source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut manifest = Manifest {
            source: raw.source,
            generated_at: raw.generated_at,
            entries,
        };
        manifest.entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(manifest)
    }

    pub fn read_from_path(path: &Path) -> Result<Manifest> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes, &path.display().to_string())
    }

    /// Write pretty JSON to `dir/comstar.json`, replacing any previous copy.
    pub async fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let dest = dir.join(MANIFEST_FILE_NAME);
        let json = serde_json::to_vec_pretty(self)?;
        fsutil::write_atomic(&dest, &json).await?;
        debug!(path = %dest.display(), entries = self.entries.len(), "manifest written");
        Ok(dest)
    }

    pub fn entry_map(&self) -> BTreeMap<&ManifestPath, &ManifestEntry> {
        self.entries.iter().map(|e| (&e.path, e)).collect()
    }
}

/// Normalise a user-supplied target into a directory URL (trailing `/`).
///
/// A URL whose last segment is `comstar.json` is the manifest URL; its
/// directory is used. Query and fragment are dropped.
pub fn directory_url(target: &Url) -> Result<Url> {
    let mut url = target.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| ComstarError::UnsupportedScheme(target.scheme().to_string()))?;
        segments.pop_if_empty();
    }
    let last = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or_default()
        .to_string();
    if let Ok(mut segments) = url.path_segments_mut() {
        if last == MANIFEST_FILE_NAME {
            segments.pop();
        }
        segments.push("");
    }
    Ok(url)
}

/// Resolve path segments against a directory URL, percent-encoding each one.
pub fn sibling_url<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| ComstarError::UnsupportedScheme(base.scheme().to_string()))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

/// Default manifest URL for a local directory.
pub fn local_manifest_url(dir: &Path) -> Result<Url> {
    Url::from_file_path(dir.join(MANIFEST_FILE_NAME))
        .map_err(|_| ComstarError::InvalidPath(dir.display().to_string()))
}

/// Default directory URL for a local directory.
pub fn local_directory_url(dir: &Path) -> Result<Url> {
    Url::from_directory_path(dir).map_err(|_| ComstarError::InvalidPath(dir.display().to_string()))
}
