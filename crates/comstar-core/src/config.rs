//! Runtime configuration.
//!
//! Defaults come from environment variables so the CLI and library agree
//! without a config file:
//!
//! | Variable | Default |
//! |---|---|
//! | `COMSTAR_JOBS` | `10` |
//! | `COMSTAR_HTTP_TIMEOUT_SECS` | `300` (idle read timeout) |
//! | `COMSTAR_CONNECT_TIMEOUT_SECS` | `30` |
//! | `COMSTAR_GCS_ENDPOINT` | `https://storage.googleapis.com` |
//! | `COMSTAR_GCS_TOKEN` / `GOOGLE_OAUTH_ACCESS_TOKEN` | unset |

use std::time::Duration;

/// Name of the manifest file written into every synced directory.
pub const MANIFEST_FILE_NAME: &str = "comstar.json";

/// Per-directory ignore file, gitignore syntax.
pub const IGNORE_FILE_NAME: &str = ".comstarignore";

pub const DEFAULT_JOBS: usize = 10;
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ComstarConfig {
    /// Maximum concurrent hash/transfer tasks.
    pub jobs: usize,
    /// Longest pause between reads before a transfer is abandoned.
    /// Transfers that keep making progress are never cut off.
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    /// Base URL of the GCS JSON API.
    pub gcs_endpoint: String,
    /// OAuth2 bearer token for GCS (optional for emulators).
    pub gcs_token: Option<String>,
    pub user_agent: String,
}

impl Default for ComstarConfig {
    fn default() -> Self {
        let jobs = std::env::var("COMSTAR_JOBS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_JOBS);
        let timeout_secs = env_secs("COMSTAR_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS);
        let connect_secs = env_secs("COMSTAR_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS);

        ComstarConfig {
            jobs,
            http_timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_secs),
            gcs_endpoint: std::env::var("COMSTAR_GCS_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_GCS_ENDPOINT.to_string()),
            gcs_token: std::env::var("COMSTAR_GCS_TOKEN")
                .or_else(|_| std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN"))
                .ok(),
            user_agent: format!("comstar/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn env_secs(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

impl ComstarConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Override the concurrency limit. Zero is clamped to one.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Shared HTTP client settings for manifest, file and GCS traffic.
    pub(crate) fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.http_timeout)
            .build()
    }

    pub fn with_gcs_endpoint(mut self, endpoint: &str) -> Self {
        self.gcs_endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_gcs_token(mut self, token: &str) -> Self {
        self.gcs_token = Some(token.to_string());
        self
    }
}
