//! Google Cloud Storage backend over the JSON API.
//!
//! Objects are stored gzip-compressed with `Content-Encoding: gzip`, so GCS
//! serves them decompressed to clients that do not accept gzip.

use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;
use url::Url;

use super::ObjectStore;
use crate::config::ComstarConfig;
use crate::error::{ComstarError, Result};

pub struct GcsStore {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl GcsStore {
    pub fn new(config: &ComstarConfig, bucket: &str) -> Result<Self> {
        Ok(GcsStore {
            client: config.http_client()?,
            endpoint: Url::parse(&config.gcs_endpoint)?,
            bucket: bucket.to_string(),
            token: config.gcs_token.clone(),
        })
    }

    fn api_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ComstarError::UnsupportedScheme(self.endpoint.scheme().to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn upload_url(&self, key: &str) -> Result<Url> {
        let mut url = self.api_url(["upload", "storage", "v1", "b", self.bucket.as_str(), "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key)
            .append_pair("contentEncoding", "gzip");
        Ok(url)
    }

    /// The key becomes a single path segment, so `/` is percent-encoded.
    fn object_url(&self, key: &str) -> Result<Url> {
        self.api_url(["storage", "v1", "b", self.bucket.as_str(), "o", key])
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(&self, key: &str, local_file: &Path, content_type: &str) -> Result<()> {
        let path = local_file.to_path_buf();
        let (compressed, len) = tokio::task::spawn_blocking(move || gzip_to_temp(&path)).await??;
        debug!(key, bytes = len, content_type, "uploading object");

        let body = reqwest::Body::from(tokio::fs::File::from_std(compressed));
        let req = self
            .client
            .post(self.upload_url(key)?)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, len)
            .body(body);
        let resp = self.authorize(req).send().await?;
        check_status(resp, "upload", key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let req = self.client.delete(self.object_url(key)?);
        let resp = self.authorize(req).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(key, "object already absent");
            return Ok(());
        }
        check_status(resp, "delete", key).await
    }

    fn describe(&self) -> String {
        format!("gs://{}", self.bucket)
    }
}

/// Gzip `path` into an anonymous temp file, rewound for reading.
///
/// The file is unlinked already, so it disappears once the upload drops it.
fn gzip_to_temp(path: &Path) -> Result<(File, u64)> {
    let mut input = BufReader::new(File::open(path)?);
    let mut encoder = GzEncoder::new(tempfile::tempfile()?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    let mut out = encoder.finish()?;
    let len = out.seek(SeekFrom::End(0))?;
    out.seek(SeekFrom::Start(0))?;
    Ok((out, len))
}

async fn check_status(resp: Response, op: &str, key: &str) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ComstarError::Storage(format!(
        "GCS {op} of {key} failed with {status}: {body}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn store() -> GcsStore {
        let config = ComstarConfig::default().with_gcs_endpoint("http://127.0.0.1:4443");
        GcsStore::new(&config, "my-bucket").unwrap()
    }

    #[test]
    fn upload_url_carries_name_query() {
        let url = store().upload_url("site/index.html").unwrap();
        assert_eq!(url.path(), "/upload/storage/v1/b/my-bucket/o");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("name".into(), "site/index.html".into())));
        assert!(pairs.contains(&("uploadType".into(), "media".into())));
        assert!(pairs.contains(&("contentEncoding".into(), "gzip".into())));
    }

    #[test]
    fn object_url_encodes_slashes() {
        let url = store().object_url("site/index.html").unwrap();
        assert_eq!(url.path(), "/storage/v1/b/my-bucket/o/site%2Findex.html");
    }

    #[test]
    fn gzip_roundtrips_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello gcs").unwrap();

        let (compressed, len) = gzip_to_temp(&path).unwrap();
        assert!(len > 0);
        let mut out = String::new();
        GzDecoder::new(compressed).read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello gcs");
    }

    #[test]
    fn describe_uses_gs_scheme() {
        assert_eq!(store().describe(), "gs://my-bucket");
    }
}
