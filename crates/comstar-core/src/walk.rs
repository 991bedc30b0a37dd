//! Directory walking with `.comstarignore` support.

use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use tracing::warn;

use crate::config::MANIFEST_FILE_NAME;
use crate::error::Result;

/// List every regular file under `dir`, sorted.
///
/// Only `ignore_file_name` files (normally `.comstarignore`) are honoured,
/// each for its own directory and below; git ignore sources are off.
/// Hidden entries are skipped and the manifest itself is never listed.
pub fn walk_files(dir: &Path, ignore_file_name: &str) -> Result<Vec<PathBuf>> {
    let mut builder = WalkBuilder::new(dir);
    builder
        .add_custom_ignore_filename(ignore_file_name)
        .git_ignore(false)
        .git_exclude(false)
        .git_global(false)
        .ignore(false)
        .parents(false);

    let mut overrides = OverrideBuilder::new(dir);
    overrides.add(&format!("!{MANIFEST_FILE_NAME}"))?;
    builder.overrides(overrides.build()?);

    let mut files = Vec::new();
    for entry in builder.build() {
        match entry {
            Ok(entry) => {
                if entry.path().is_file() {
                    files.push(entry.into_path());
                }
            }
            Err(err) => warn!(error = %err, "skipping unreadable entry"),
        }
    }
    files.sort();
    Ok(files)
}
