//! Log output for the comstar binary.
//!
//! Logs always go to stderr; stdout is reserved for reports. Filtering comes
//! from `COMSTAR_LOG`, then `RUST_LOG`, and otherwise shows comstar's own
//! events at the requested level and only warnings from dependencies.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding an `EnvFilter` directive string.
pub const LOG_ENV: &str = "COMSTAR_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per event, fields flattened.
    Json,
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(format: LogFormat, level: Level) -> bool {
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter(level));
    let installed = match format {
        LogFormat::Text => registry.with(layer.compact()).try_init(),
        LogFormat::Json => registry.with(layer.json().flatten_event(true)).try_init(),
    };
    installed.is_ok()
}

fn filter(level: Level) -> EnvFilter {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("warn,comstar={level},comstar_core={level}")
}
