//! Reading manifests and files from `http`, `https` and `file` URLs.

use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use sha2::{Digest, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

use crate::config::ComstarConfig;
use crate::digest::FileDigest;
use crate::error::{ComstarError, Result};
use crate::events::EventSender;
use crate::fsutil;
use crate::manifest::Manifest;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Scheme-aware reader for manifests and file contents.
#[derive(Debug, Clone)]
pub struct Fetcher {
    http: reqwest::Client,
}

impl Fetcher {
    pub fn new(config: &ComstarConfig) -> Result<Self> {
        Ok(Fetcher {
            http: config.http_client()?,
        })
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Fetch and parse the manifest at `url`.
    ///
    /// Returns [`ComstarError::ManifestNotFound`] for HTTP 404 or a missing file.
    pub async fn fetch_manifest(&self, url: &Url) -> Result<Manifest> {
        let bytes = match url.scheme() {
            "http" | "https" => {
                let resp = self.http.get(url.clone()).send().await?;
                if resp.status() == StatusCode::NOT_FOUND {
                    return Err(ComstarError::ManifestNotFound(url.clone()));
                }
                resp.error_for_status()?.bytes().await?.to_vec()
            }
            "file" => {
                let path = file_path(url)?;
                match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(ComstarError::ManifestNotFound(url.clone()))
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            other => return Err(ComstarError::UnsupportedScheme(other.to_string())),
        };
        let manifest = Manifest::from_slice(&bytes, url.as_str())?;
        info!(url = %url, entries = manifest.entries.len(), "manifest loaded");
        Ok(manifest)
    }

    /// Like [`Fetcher::fetch_manifest`] but a missing manifest is `None`.
    pub async fn fetch_optional_manifest(&self, url: &Url) -> Result<Option<Manifest>> {
        match self.fetch_manifest(url).await {
            Ok(m) => Ok(Some(m)),
            Err(ComstarError::ManifestNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Download `url` into `dest`, verifying it hashes to `expected`.
    ///
    /// Content is staged in a hidden part file and only renamed over `dest`
    /// once the digest matches; on mismatch `dest` is left untouched.
    /// `label` names the file in progress events and errors.
    pub async fn download(
        &self,
        url: &Url,
        dest: &Path,
        expected: &FileDigest,
        label: &str,
        events: &EventSender,
    ) -> Result<u64> {
        fsutil::ensure_parent(dest).await?;
        let part = fsutil::part_path(dest)?;
        let result = self.download_to(url, &part, label, events).await;

        let (bytes, actual) = match result {
            Ok(v) => v,
            Err(e) => {
                fsutil::discard(&part).await;
                return Err(e);
            }
        };
        if &actual != expected {
            fsutil::discard(&part).await;
            return Err(ComstarError::DigestMismatch {
                path: label.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        if let Err(e) = tokio::fs::rename(&part, dest).await {
            fsutil::discard(&part).await;
            return Err(e.into());
        }
        debug!(path = label, bytes, "downloaded");
        Ok(bytes)
    }

    async fn download_to(
        &self,
        url: &Url,
        part: &Path,
        label: &str,
        events: &EventSender,
    ) -> Result<(u64, FileDigest)> {
        let mut out = tokio::fs::File::create(part).await?;
        let mut hasher = Sha512::new();
        let mut total = 0u64;

        match url.scheme() {
            "http" | "https" => {
                let mut resp = self.http.get(url.clone()).send().await?.error_for_status()?;
                while let Some(chunk) = resp.chunk().await? {
                    hasher.update(&chunk);
                    out.write_all(&chunk).await?;
                    total += chunk.len() as u64;
                    events.progress(label, chunk.len() as u64).await;
                }
            }
            "file" => {
                let mut input = tokio::fs::File::open(file_path(url)?).await?;
                let mut buf = vec![0u8; COPY_BUF_SIZE];
                loop {
                    let n = input.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    out.write_all(&buf[..n]).await?;
                    total += n as u64;
                    events.progress(label, n as u64).await;
                }
            }
            other => return Err(ComstarError::UnsupportedScheme(other.to_string())),
        }

        out.flush().await?;
        Ok((total, FileDigest::from_hasher(hasher)))
    }
}

fn file_path(url: &Url) -> Result<PathBuf> {
    url.to_file_path()
        .map_err(|_| ComstarError::InvalidPath(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Progress;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn fetcher() -> Fetcher {
        Fetcher::new(&ComstarConfig::default()).unwrap()
    }

    /// Serve `body` one byte at a time with `pause` before each byte.
    async fn trickle_server(body: &'static [u8], pause: Duration) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = sock.read(&mut request).await.unwrap();
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            sock.write_all(head.as_bytes()).await.unwrap();
            for byte in body {
                tokio::time::sleep(pause).await;
                if sock.write_all(&[*byte]).await.is_err() {
                    return;
                }
                let _ = sock.flush().await;
            }
        });
        Url::parse(&format!("http://{addr}/slow.bin")).unwrap()
    }

    #[tokio::test]
    async fn slow_download_survives_past_idle_timeout() {
        let body: &'static [u8] = b"trickled";
        let url = trickle_server(body, Duration::from_millis(300)).await;
        let config = ComstarConfig::default().with_http_timeout(Duration::from_secs(1));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("slow.bin");

        let progress = Progress::start("test", 1, false);
        let n = Fetcher::new(&config)
            .unwrap()
            .download(&url, &dest, &FileDigest::of_bytes(body), "slow.bin", &progress.sender())
            .await
            .expect("download keeps going while bytes arrive");
        progress.finish().await;

        assert_eq!(n, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn stalled_download_hits_idle_timeout() {
        let url = trickle_server(b"xy", Duration::from_secs(3)).await;
        let config = ComstarConfig::default().with_http_timeout(Duration::from_millis(500));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stalled.bin");

        let progress = Progress::start("test", 1, false);
        let err = Fetcher::new(&config)
            .unwrap()
            .download(&url, &dest, &FileDigest::of_bytes(b"xy"), "stalled.bin", &progress.sender())
            .await
            .unwrap_err();
        progress.finish().await;

        assert!(matches!(err, ComstarError::Http(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected() {
        let url = Url::parse("ftp://example.com/comstar.json").unwrap();
        let err = fetcher().fetch_manifest(&url).await.unwrap_err();
        assert!(matches!(err, ComstarError::UnsupportedScheme(s) if s == "ftp"));
    }

    #[tokio::test]
    async fn missing_file_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("comstar.json")).unwrap();
        let err = fetcher().fetch_manifest(&url).await.unwrap_err();
        assert!(matches!(err, ComstarError::ManifestNotFound(_)));
        assert!(fetcher().fetch_optional_manifest(&url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_download_verifies_digest() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"payload").unwrap();
        let url = Url::from_file_path(&src).unwrap();
        let dest = dir.path().join("out/dest.bin");

        let progress = Progress::start("test", 1, false);
        let n = fetcher()
            .download(&url, &dest, &FileDigest::of_bytes(b"payload"), "dest.bin", &progress.sender())
            .await
            .unwrap();
        let stats = progress.finish().await;

        assert_eq!(n, 7);
        assert_eq!(stats.bytes, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn file_download_mismatch_leaves_dest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"tampered").unwrap();
        let dest = dir.path().join("dest.bin");
        std::fs::write(&dest, b"original").unwrap();
        let url = Url::from_file_path(&src).unwrap();

        let progress = Progress::start("test", 1, false);
        let err = fetcher()
            .download(&url, &dest, &FileDigest::of_bytes(b"expected"), "dest.bin", &progress.sender())
            .await
            .unwrap_err();
        progress.finish().await;

        assert!(matches!(err, ComstarError::DigestMismatch { .. }));
        assert_eq!(std::fs::read(&dest).unwrap(), b"original");
        assert!(!fsutil::part_path(&dest).unwrap().exists());
    }
}
