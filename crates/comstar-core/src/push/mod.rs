//! Publishing a directory to object storage.
//!
//! Only paths whose digest differs from the published manifest are
//! transferred. The manifest itself goes up last, after every file upload
//! and delete succeeded, so readers never see entries that are not there yet.

pub mod fs;
pub mod gcs;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::MANIFEST_FILE_NAME;
use crate::context::Context;
use crate::error::{ComstarError, Result};
use crate::manifest::{Manifest, ManifestPath};
use crate::tasks::join_tasks;

const JSON_CONTENT_TYPE: &str = "application/json";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Key/value object storage backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `local_file` under `key`, replacing any existing object.
    async fn put(&self, key: &str, local_file: &Path, content_type: &str) -> Result<()>;

    /// Remove `key`. Deleting an absent object is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAction {
    Upload(ManifestPath),
    Delete(ManifestPath),
}

impl PushAction {
    pub fn path(&self) -> &ManifestPath {
        match self {
            PushAction::Upload(p) | PushAction::Delete(p) => p,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub uploaded: usize,
    pub deleted: usize,
    /// Whether `comstar.json` was re-published.
    pub manifest_published: bool,
}

/// Actions that turn `remote` into `local`.
///
/// With no remote manifest (first push) everything is uploaded. Uploads
/// come first, ordered by path, then deletes.
pub fn diff_manifests(local: &Manifest, remote: Option<&Manifest>) -> Vec<PushAction> {
    let local_map = local.entry_map();
    let Some(remote) = remote else {
        return local_map
            .keys()
            .map(|path| PushAction::Upload((*path).clone()))
            .collect();
    };

    let remote_map = remote.entry_map();

    let uploads = local_map
        .iter()
        .filter(|(path, entry)| {
            remote_map
                .get(*path)
                .map(|r| r.sha512 != entry.sha512)
                .unwrap_or(true)
        })
        .map(|(path, _)| PushAction::Upload((*path).clone()));

    let deletes = remote_map
        .keys()
        .filter(|path| !local_map.contains_key(*path))
        .map(|path| PushAction::Delete((*path).clone()));

    uploads.chain(deletes).collect()
}

/// Join an optional bucket prefix and a manifest path into an object key.
pub fn object_key(prefix: Option<&str>, path: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}/{path}"),
        None => path.to_string(),
    }
}

/// Normalise a user-supplied bucket prefix (`\` to `/`, no outer slashes).
pub fn normalize_prefix(prefix: &str) -> Option<String> {
    let p = prefix.replace('\\', "/");
    let p = p.trim_matches('/');
    if p.is_empty() {
        None
    } else {
        Some(p.to_string())
    }
}

pub fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

/// Push the differences between `local` and `remote` from `dir` to `store`.
///
/// `dir/comstar.json` must already hold `local`; it is published last.
pub async fn push_dir(
    store: Arc<dyn ObjectStore>,
    dir: &Path,
    local: &Manifest,
    remote: Option<&Manifest>,
    prefix: Option<&str>,
    ctx: &Context,
) -> Result<PushSummary> {
    let actions = diff_manifests(local, remote);
    if actions.is_empty() {
        info!(target = %store.describe(), "remote already up to date");
        return Ok(PushSummary::default());
    }
    info!(
        target = %store.describe(),
        actions = actions.len(),
        first_push = remote.is_none(),
        "pushing differences"
    );

    let progress = ctx.progress("Pushing differences", actions.len() + 1);
    let limiter = ctx.limiter();
    let mut handles = Vec::with_capacity(actions.len());

    for action in actions {
        let key = object_key(prefix, action.path().as_str());
        let local_file = action.path().to_path(dir);
        let store = Arc::clone(&store);
        let events = progress.sender();
        let limiter = limiter.clone();

        handles.push(tokio::spawn(async move {
            let _permit = limiter.acquire().await?;
            events.started(&key).await;
            match &action {
                PushAction::Upload(_) => {
                    let content_type = guess_content_type(&local_file);
                    store.put(&key, &local_file, &content_type).await?;
                }
                PushAction::Delete(_) => store.delete(&key).await?,
            }
            events.done(&key).await;
            Ok::<_, ComstarError>(action)
        }));
    }

    let results = join_tasks(handles).await;
    let events = progress.sender();
    let mut summary = PushSummary::default();
    let outcome = async {
        for action in results? {
            match action {
                PushAction::Upload(_) => summary.uploaded += 1,
                PushAction::Delete(_) => summary.deleted += 1,
            }
        }
        let key = object_key(prefix, MANIFEST_FILE_NAME);
        events.started(&key).await;
        store
            .put(&key, &dir.join(MANIFEST_FILE_NAME), JSON_CONTENT_TYPE)
            .await?;
        events.done(&key).await;
        summary.manifest_published = true;
        Ok::<_, ComstarError>(())
    }
    .await;
    drop(events);
    progress.finish().await;
    outcome?;

    info!(
        uploaded = summary.uploaded,
        deleted = summary.deleted,
        "push finished"
    );
    Ok(summary)
}
