//! Shared state threaded through every operation.

use crate::config::ComstarConfig;
use crate::error::Result;
use crate::events::Progress;
use crate::fetch::Fetcher;
use crate::tasks::Limiter;

/// Configuration, HTTP client and progress preference for one invocation.
#[derive(Debug, Clone)]
pub struct Context {
    config: ComstarConfig,
    fetcher: Fetcher,
    show_progress: bool,
}

impl Context {
    pub fn new(config: ComstarConfig) -> Result<Self> {
        let fetcher = Fetcher::new(&config)?;
        Ok(Context {
            config,
            fetcher,
            show_progress: false,
        })
    }

    /// Draw progress bars on stderr.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &ComstarConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub(crate) fn progress(&self, action: &str, total: usize) -> Progress {
        Progress::start(action, total as u64, self.show_progress)
    }

    pub(crate) fn limiter(&self) -> Limiter {
        Limiter::new(self.config.jobs)
    }
}
