//! Progress events and the terminal reporter.
//!
//! File tasks push [`Event`]s into a bounded channel; a single reporter task
//! owns the indicatif bars. When progress display is off the same reporter
//! runs against a hidden draw target, so callers never branch on it.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::debug;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    FileStarted { name: String },
    FileProgress { name: String, bytes: u64 },
    FileDone { name: String },
    Close,
}

impl Event {
    pub fn file_started<S: Into<String>>(name: S) -> Self {
        Event::FileStarted { name: name.into() }
    }

    pub fn file_progress<S: Into<String>>(name: S, delta_bytes: u64) -> Self {
        Event::FileProgress {
            name: name.into(),
            bytes: delta_bytes,
        }
    }

    pub fn file_done<S: Into<String>>(name: S) -> Self {
        Event::FileDone { name: name.into() }
    }
}

/// Cloneable handle for emitting events from file tasks.
///
/// Sends never fail the caller: a reporter that already shut down just
/// means nobody is watching.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    pub async fn send(&self, event: Event) {
        let _ = self.tx.send(event).await;
    }

    pub async fn started(&self, name: &str) {
        self.send(Event::file_started(name)).await;
    }

    pub async fn progress(&self, name: &str, bytes: u64) {
        self.send(Event::file_progress(name, bytes)).await;
    }

    pub async fn done(&self, name: &str) {
        self.send(Event::file_done(name)).await;
    }
}

/// Totals observed by a reporter over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressStats {
    pub started: u64,
    pub done: u64,
    pub bytes: u64,
}

/// A running reporter for one phase (hashing, syncing, pushing).
pub struct Progress {
    events: EventSender,
    handle: JoinHandle<ProgressStats>,
}

impl Progress {
    /// Spawn a reporter titled `action` expecting `total` files.
    pub fn start(action: &str, total: u64, visible: bool) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(report(rx, action.to_string(), total, visible));
        Progress {
            events: EventSender { tx },
            handle,
        }
    }

    pub fn sender(&self) -> EventSender {
        self.events.clone()
    }

    /// Close the stream and wait for the reporter to tear down its bars.
    pub async fn finish(self) -> ProgressStats {
        self.events.send(Event::Close).await;
        drop(self.events);
        self.handle.await.unwrap_or_default()
    }
}

fn overall_bar(total: u64, action: &str) -> ProgressBar {
    let style = ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let pb = ProgressBar::new(total);
    pb.set_style(style);
    pb.set_message(action.to_string());
    pb
}

fn file_spinner() -> ProgressBar {
    let style = ProgressStyle::with_template(
        "  {spinner} {prefix}: {msg} ({bytes}, {binary_bytes_per_sec} {elapsed})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let pb = ProgressBar::new_spinner();
    pb.set_style(style);
    pb
}

async fn report(mut rx: Receiver<Event>, action: String, total: u64, visible: bool) -> ProgressStats {
    let mp = if visible {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };
    let overall = mp.add(overall_bar(total, &action));
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();
    let mut stats = ProgressStats::default();
    debug!(action = %action, total, "phase started");

    while let Some(event) = rx.recv().await {
        match event {
            Event::Close => break,
            Event::FileStarted { name } => {
                stats.started += 1;
                let pb = mp.insert_before(&overall, file_spinner());
                pb.set_prefix(stats.started.to_string());
                pb.set_message(name.clone());
                if visible {
                    pb.enable_steady_tick(Duration::from_millis(120));
                }
                bars.insert(name, pb);
            }
            Event::FileProgress { name, bytes } => {
                stats.bytes += bytes;
                if let Some(pb) = bars.get(&name) {
                    pb.inc(bytes);
                }
            }
            Event::FileDone { name } => {
                stats.done += 1;
                overall.inc(1);
                if let Some(pb) = bars.remove(&name) {
                    pb.finish_and_clear();
                    mp.remove(&pb);
                }
            }
        }
    }

    for (_, pb) in bars.drain() {
        pb.finish_and_clear();
        mp.remove(&pb);
    }
    overall.finish_and_clear();
    debug!(
        action = %action,
        done = stats.done,
        bytes = stats.bytes,
        "phase finished"
    );
    stats
}
