//! comstar core library
//!
//! Generate, validate, sync and publish `comstar.json` directory manifests.

pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod events;
pub mod fakes;
pub mod fetch;
mod fsutil;
pub mod manifest;
pub mod push;
pub mod sync;
pub mod tasks;
pub mod telemetry;
pub mod validate;
pub mod walk;

pub use config::{ComstarConfig, IGNORE_FILE_NAME, MANIFEST_FILE_NAME};
pub use context::Context;
pub use digest::FileDigest;
pub use error::{ComstarError, Result};
pub use events::{Event, EventSender, Progress, ProgressStats};
pub use fetch::Fetcher;
pub use manifest::{
    directory_url, local_directory_url, local_manifest_url, sibling_url, Manifest, ManifestEntry,
    ManifestPath,
};
pub use push::fs::FsObjectStore;
pub use push::gcs::GcsStore;
pub use push::{
    diff_manifests, guess_content_type, normalize_prefix, object_key, push_dir, ObjectStore,
    PushAction, PushSummary,
};
pub use sync::{plan_sync, sync_manifest, SyncOptions, SyncSummary};
pub use telemetry::{init_tracing, LogFormat};
pub use validate::{validate, verify_manifest, Difference, DifferenceKind, ValidationReport};
pub use walk::walk_files;
