//! Error taxonomy for comstar.

use url::Url;

/// comstar errors.
#[derive(Debug, thiserror::Error)]
pub enum ComstarError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("manifest not found: {0}")]
    ManifestNotFound(Url),

    #[error("invalid manifest at {url}: {reason}")]
    InvalidManifest { url: String, reason: String },

    #[error("invalid sha512 digest: {0}")]
    InvalidDigest(String),

    #[error("invalid manifest path: {0}")]
    InvalidPath(String),

    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("walk error: {0}")]
    Walk(#[from] ignore::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for comstar operations.
pub type Result<T> = std::result::Result<T, ComstarError>;
