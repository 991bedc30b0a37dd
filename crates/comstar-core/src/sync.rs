//! Bringing a local directory in line with a manifest.

use std::path::Path;

use tracing::{info, warn};
use url::Url;

use crate::config::MANIFEST_FILE_NAME;
use crate::context::Context;
use crate::digest::FileDigest;
use crate::error::{ComstarError, Result};
use crate::fsutil;
use crate::manifest::Manifest;
use crate::tasks::join_tasks;
use crate::validate::{self, Difference, DifferenceKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Delete local files the manifest does not list.
    pub force: bool,
    /// Hash every local file instead of trusting the local `comstar.json`.
    pub revalidate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub downloaded: usize,
    pub deleted: usize,
    pub bytes: u64,
}

enum Applied {
    Downloaded(u64),
    Deleted,
}

/// Sync `dir` from the manifest at `target`.
///
/// On success the fetched manifest is stored as `dir/comstar.json` so the
/// next run can trust it instead of re-hashing.
pub async fn sync_manifest(
    target: &Url,
    dir: &Path,
    opts: SyncOptions,
    ctx: &Context,
) -> Result<SyncSummary> {
    let manifest = ctx.fetcher().fetch_manifest(target).await?;
    let plan = plan_sync(&manifest, dir, opts, ctx).await?;

    let summary = if plan.is_empty() {
        info!(dir = %dir.display(), "already in sync");
        SyncSummary::default()
    } else {
        apply(plan, dir, ctx).await?
    };

    manifest.write_to_dir(dir).await?;
    info!(
        downloaded = summary.downloaded,
        deleted = summary.deleted,
        bytes = summary.bytes,
        "sync finished"
    );
    Ok(summary)
}

/// Work out what `dir` needs to match `manifest`, sorted by path.
pub async fn plan_sync(
    manifest: &Manifest,
    dir: &Path,
    opts: SyncOptions,
    ctx: &Context,
) -> Result<Vec<Difference>> {
    let local = if opts.revalidate {
        None
    } else {
        read_local_manifest(dir)
    };

    let Some(local) = local else {
        return Ok(validate::validate(manifest, dir, opts.force, ctx)
            .await?
            .differences);
    };

    let mut differences = trusted_differences(manifest, &local, dir).await?;
    if opts.force {
        differences.extend(validate::find_untracked(manifest, dir, ctx).await?);
    }
    differences.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(differences)
}

fn read_local_manifest(dir: &Path) -> Option<Manifest> {
    let path = dir.join(MANIFEST_FILE_NAME);
    if !path.is_file() {
        return None;
    }
    match Manifest::read_from_path(&path) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable local manifest");
            None
        }
    }
}

/// Diff against the local manifest's digests; only existence is checked on disk.
///
/// Files the local manifest does not know about are hashed, since nothing
/// vouches for them.
async fn trusted_differences(
    remote: &Manifest,
    local: &Manifest,
    dir: &Path,
) -> Result<Vec<Difference>> {
    let known = local.entry_map();
    let mut differences = Vec::new();

    for entry in &remote.entries {
        let local_path = entry.path.to_path(dir);
        if !validate::is_file(&local_path).await? {
            differences.push(Difference::missing(entry.clone()));
            continue;
        }
        match known.get(&entry.path) {
            Some(recorded) if recorded.sha512 == entry.sha512 => {}
            Some(recorded) => {
                differences.push(Difference::hash_mismatch(
                    entry.clone(),
                    recorded.sha512.clone(),
                ));
            }
            None => {
                let actual = FileDigest::of_file_async(local_path).await?;
                if actual != entry.sha512 {
                    differences.push(Difference::hash_mismatch(entry.clone(), actual));
                }
            }
        }
    }
    Ok(differences)
}

async fn apply(plan: Vec<Difference>, dir: &Path, ctx: &Context) -> Result<SyncSummary> {
    let progress = ctx.progress("Syncing files", plan.len());
    let limiter = ctx.limiter();
    let mut handles = Vec::with_capacity(plan.len());

    for diff in plan {
        let dest = dir.join(&diff.path);
        let name = diff.display_path();
        let fetcher = ctx.fetcher().clone();
        let events = progress.sender();
        let limiter = limiter.clone();

        handles.push(tokio::spawn(async move {
            let _permit = limiter.acquire().await?;
            events.started(&name).await;
            let applied = match diff.kind {
                DifferenceKind::Missing(entry)
                | DifferenceKind::HashMismatch {
                    upstream: entry, ..
                } => {
                    let bytes = fetcher
                        .download(&entry.source, &dest, &entry.sha512, &name, &events)
                        .await?;
                    Applied::Downloaded(bytes)
                }
                DifferenceKind::Unknown => {
                    fsutil::remove_if_exists(&dest).await?;
                    Applied::Deleted
                }
            };
            events.done(&name).await;
            Ok::<_, ComstarError>(applied)
        }));
    }

    let results = join_tasks(handles).await;
    progress.finish().await;

    let mut summary = SyncSummary::default();
    for applied in results? {
        match applied {
            Applied::Downloaded(bytes) => {
                summary.downloaded += 1;
                summary.bytes += bytes;
            }
            Applied::Deleted => summary.deleted += 1,
        }
    }
    Ok(summary)
}
