//! comstar - sync files from a static source
//!
//! ## Commands
//!
//! - `generate`: Write `comstar.json` for a directory
//! - `validate`: Check a directory against a manifest
//! - `sync`: Download missing or stale files listed in a manifest
//! - `push google`: Publish directory changes to Google Cloud Storage

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use comstar_core::{
    local_directory_url, local_manifest_url, normalize_prefix, push_dir, sync_manifest,
    verify_manifest, ComstarConfig, Context, GcsStore, LogFormat, Manifest, SyncOptions,
};
use tracing::{info, Level};
use url::Url;

#[derive(Parser)]
#[command(name = "comstar")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sync files from a static source.", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Maximum concurrent file operations (default: COMSTAR_JOBS or 10)
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push directory changes to online storage.
    #[command(subcommand)]
    Push(PushTarget),

    /// Generate manifests for directories.
    Generate {
        /// Directory to generate manifest for. Default is current directory.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// URL to write manifest for. Defaults to local filesystem, current directory.
        #[arg(short = 't', long = "target", value_parser = parse_url)]
        target: Option<Url>,
    },

    /// Sync a directory from a manifest.
    Sync {
        /// URI to manifest to sync against. Defaults to looking for manifest in current dir.
        #[arg(short, long, value_parser = parse_url)]
        manifest: Option<Url>,

        /// Directory to sync to. Default is current directory.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Ensure that ONLY files in the manifest are at the destination. Deletes any file not in the manifest.
        #[arg(short, long)]
        force: bool,

        /// Force validation of local files instead of trusting the local manifest
        #[arg(long = "validate")]
        force_validate: bool,
    },

    /// Validate a directory against a manifest.
    Validate {
        /// URI of manifest to validate against. Defaults to looking for manifest in current dir.
        #[arg(short, long, value_parser = parse_url)]
        manifest: Option<Url>,

        /// Directory to validate. Default is current directory.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Ensure that ONLY files in the manifest are at the destination. Complains about any file not in the manifest.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PushTarget {
    /// Push to GCS.
    Google {
        /// URI to manifest to diff against. If it does not exist, comstar will assume a first push and push all.
        #[arg(short, long, value_parser = parse_url)]
        manifest: Url,

        /// Directory to push. Default is current directory.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Bucket name to push to
        #[arg(short, long)]
        bucket: String,

        /// Path prefix inside bucket.
        #[arg(short = 'p', long = "bucket-path")]
        bucket_path: Option<String>,
    },
}

fn parse_url(s: &str) -> Result<Url, url::ParseError> {
    Url::parse(s)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    comstar_core::init_tracing(format, level);

    let mut config = ComstarConfig::from_env();
    if let Some(jobs) = cli.jobs {
        config = config.with_jobs(jobs);
    }
    let show_progress = !cli.quiet && !cli.json && std::io::stderr().is_terminal();
    let ctx = Context::new(config)
        .context("Failed to set up HTTP client")?
        .with_progress(show_progress);

    match cli.command {
        Commands::Push(PushTarget::Google {
            manifest,
            dir,
            bucket,
            bucket_path,
        }) => cmd_push_google(&ctx, &manifest, dir, &bucket, bucket_path.as_deref()).await,
        Commands::Generate { dir, target } => cmd_generate(&ctx, dir, target).await,
        Commands::Sync {
            manifest,
            dir,
            force,
            force_validate,
        } => {
            let opts = SyncOptions {
                force,
                revalidate: force_validate,
            };
            cmd_sync(&ctx, manifest, dir, opts).await
        }
        Commands::Validate {
            manifest,
            dir,
            force,
        } => cmd_validate(&ctx, manifest, dir, force).await,
    }
}

/// Resolve `--dir`, defaulting to the current directory.
fn base_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match dir {
        Some(d) => d,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    dir.canonicalize()
        .with_context(|| format!("Directory not found: {}", dir.display()))
}

fn default_manifest(dir: &Path, manifest: Option<Url>) -> Result<Url> {
    match manifest {
        Some(url) => Ok(url),
        None => local_manifest_url(dir)
            .with_context(|| format!("Cannot make URL from directory {}", dir.display())),
    }
}

/// Write `comstar.json` for a directory
async fn cmd_generate(ctx: &Context, dir: Option<PathBuf>, target: Option<Url>) -> Result<()> {
    let generate_dir = base_dir(dir)?;
    let target_url = match target {
        Some(url) => url,
        None => local_directory_url(&generate_dir).with_context(|| {
            format!("Cannot make URL from directory {}", generate_dir.display())
        })?,
    };

    let manifest = Manifest::generate(&target_url, &generate_dir, ctx)
        .await
        .context("Failed to generate manifest")?;
    let path = manifest.write_to_dir(&generate_dir).await?;

    info!(entries = manifest.entries.len(), source = %manifest.source, "manifest generated");
    println!(
        "Wrote {} ({} files)",
        path.display(),
        manifest.entries.len()
    );
    Ok(())
}

/// Check a directory against a manifest
async fn cmd_validate(
    ctx: &Context,
    manifest: Option<Url>,
    dir: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let validate_dir = base_dir(dir)?;
    let target_url = default_manifest(&validate_dir, manifest)?;

    let report = verify_manifest(&target_url, &validate_dir, force, ctx)
        .await
        .with_context(|| format!("Failed to validate against {}", target_url))?;

    print!("{}", report);
    if !report.is_clean() {
        bail!("Validation failed.");
    }
    Ok(())
}

/// Download missing or stale files listed in a manifest
async fn cmd_sync(
    ctx: &Context,
    manifest: Option<Url>,
    dir: Option<PathBuf>,
    opts: SyncOptions,
) -> Result<()> {
    let sync_dir = base_dir(dir)?;
    let target_url = default_manifest(&sync_dir, manifest)?;

    let summary = sync_manifest(&target_url, &sync_dir, opts, ctx)
        .await
        .with_context(|| format!("Failed to sync from {}", target_url))?;

    println!(
        "Synced {}: {} downloaded, {} deleted",
        sync_dir.display(),
        summary.downloaded,
        summary.deleted
    );
    Ok(())
}

/// Publish directory changes to Google Cloud Storage
async fn cmd_push_google(
    ctx: &Context,
    manifest: &Url,
    dir: Option<PathBuf>,
    bucket: &str,
    bucket_path: Option<&str>,
) -> Result<()> {
    let local_dir = base_dir(dir)?;
    let prefix = bucket_path.and_then(normalize_prefix);

    let local_manifest = Manifest::generate(manifest, &local_dir, ctx)
        .await
        .context("Failed to generate local manifest")?;
    local_manifest.write_to_dir(&local_dir).await?;

    let remote_manifest = ctx
        .fetcher()
        .fetch_optional_manifest(manifest)
        .await
        .with_context(|| format!("Failed to fetch remote manifest {}", manifest))?;
    if remote_manifest.is_none() {
        info!(manifest = %manifest, "no remote manifest, assuming first push");
    }

    let store = GcsStore::new(ctx.config(), bucket).context("Failed to set up GCS client")?;
    let summary = push_dir(
        Arc::new(store),
        &local_dir,
        &local_manifest,
        remote_manifest.as_ref(),
        prefix.as_deref(),
        ctx,
    )
    .await
    .with_context(|| format!("Failed to push to gs://{}", bucket))?;

    println!(
        "Pushed to gs://{}: {} uploaded, {} deleted",
        bucket, summary.uploaded, summary.deleted
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use comstar_core::MANIFEST_FILE_NAME;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx(config: ComstarConfig) -> Context {
        Context::new(config).expect("context")
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_push_google() {
        let cli = Cli::try_parse_from([
            "comstar",
            "push",
            "google",
            "-m",
            "https://storage.googleapis.com/b/site/comstar.json",
            "-b",
            "b",
            "-p",
            "site",
        ])
        .unwrap();
        match cli.command {
            Commands::Push(PushTarget::Google {
                bucket,
                bucket_path,
                manifest,
                ..
            }) => {
                assert_eq!(bucket, "b");
                assert_eq!(bucket_path.as_deref(), Some("site"));
                assert_eq!(manifest.path(), "/b/site/comstar.json");
            }
            _ => panic!("expected push google"),
        }
    }

    #[test]
    fn parses_sync_flags() {
        let cli = Cli::try_parse_from(["comstar", "sync", "-f", "--validate", "-j", "4"]).unwrap();
        assert_eq!(cli.jobs, Some(4));
        match cli.command {
            Commands::Sync {
                force,
                force_validate,
                manifest,
                ..
            } => {
                assert!(force);
                assert!(force_validate);
                assert!(manifest.is_none());
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn rejects_invalid_manifest_url() {
        assert!(Cli::try_parse_from(["comstar", "validate", "-m", "not a url"]).is_err());
    }

    #[test]
    fn default_manifest_points_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let url = default_manifest(dir.path(), None).unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/comstar.json"));
    }

    #[tokio::test]
    async fn generate_writes_manifest_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<h1>hi</h1>");
        write(dir.path(), "img/logo.svg", "<svg/>");

        cmd_generate(&ctx(ComstarConfig::default()), Some(dir.path().into()), None)
            .await
            .expect("generate");

        let raw = std::fs::read(dir.path().join(MANIFEST_FILE_NAME)).unwrap();
        let manifest = Manifest::from_slice(&raw, "test").expect("parse");
        let paths: Vec<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["img/logo.svg", "index.html"]);
        assert_eq!(manifest.source.scheme(), "file");
    }

    #[tokio::test]
    async fn validate_fails_on_modified_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "original");
        let ctx = ctx(ComstarConfig::default());
        cmd_generate(&ctx, Some(dir.path().into()), None)
            .await
            .expect("generate");

        cmd_validate(&ctx, None, Some(dir.path().into()), false)
            .await
            .expect("clean directory validates");

        write(dir.path(), "a.txt", "edited");
        let err = cmd_validate(&ctx, None, Some(dir.path().into()), false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation failed.");
    }

    #[tokio::test]
    async fn sync_defaults_to_manifest_in_dir() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write(src.path(), "docs/readme.md", "# readme");
        write(src.path(), "data.bin", "0101");
        let ctx = ctx(ComstarConfig::default());

        let source = local_directory_url(src.path()).unwrap();
        let manifest = Manifest::generate(&source, src.path(), &ctx)
            .await
            .expect("generate");
        manifest.write_to_dir(dest.path()).await.expect("seed manifest");

        cmd_sync(&ctx, None, Some(dest.path().into()), SyncOptions::default())
            .await
            .expect("sync");

        assert_eq!(
            std::fs::read_to_string(dest.path().join("docs/readme.md")).unwrap(),
            "# readme"
        );
        assert_eq!(
            std::fs::read_to_string(dest.path().join("data.bin")).unwrap(),
            "0101"
        );
    }

    #[tokio::test]
    async fn push_google_first_push_uploads_all_then_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/bucket/o"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<h1>hi</h1>");
        write(dir.path(), "css/site.css", "body {}");
        let config = ComstarConfig::default()
            .with_gcs_endpoint(&server.uri())
            .with_gcs_token("test-token");
        let manifest = Url::parse(&format!("{}/bucket/site/comstar.json", server.uri())).unwrap();

        cmd_push_google(
            &ctx(config),
            &manifest,
            Some(dir.path().into()),
            "bucket",
            Some("/site/"),
        )
        .await
        .expect("push");

        assert!(dir.path().join(MANIFEST_FILE_NAME).is_file());
        let requests = server.received_requests().await.expect("recording enabled");
        let names: Vec<String> = requests
            .iter()
            .filter_map(|r| {
                r.url
                    .query_pairs()
                    .find(|(k, _)| k == "name")
                    .map(|(_, v)| v.into_owned())
            })
            .collect();
        assert_eq!(names.len(), 3);
        assert_eq!(names.last().map(String::as_str), Some("site/comstar.json"));
        assert!(names.contains(&"site/index.html".to_string()));
        assert!(names.contains(&"site/css/site.css".to_string()));
    }
}
