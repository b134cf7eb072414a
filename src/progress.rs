//! Scan, load, and index progress reporting.
//!
//! Long-running `zidx` commands (scanning a large collection, extracting every
//! PDF, indexing) report progress on **stderr** so stdout stays parseable.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Building document records for a collection.
    Scanning {
        collection: String,
        n: u64,
        total: u64,
    },
    /// Extracting attachment text.
    Loading { n: u64, total: u64 },
    /// Chunking and embedding documents into the index.
    Indexing { n: u64, total: u64 },
}

impl ProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            ProgressEvent::Scanning { .. } => "scanning",
            ProgressEvent::Loading { .. } => "loading",
            ProgressEvent::Indexing { .. } => "indexing",
        }
    }

    fn counts(&self) -> (u64, u64) {
        match self {
            ProgressEvent::Scanning { n, total, .. }
            | ProgressEvent::Loading { n, total }
            | ProgressEvent::Indexing { n, total } => (*n, *total),
        }
    }
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress: "scan ML Papers  scanning  12 / 1,204 documents".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let (n, total) = event.counts();
        let label = match &event {
            ProgressEvent::Scanning { collection, .. } => format!("scan {}", collection),
            ProgressEvent::Loading { .. } => "load".to_string(),
            ProgressEvent::Indexing { .. } => "index".to_string(),
        };
        let line = format!(
            "{}  {}  {} / {} documents\n",
            label,
            event.phase(),
            format_number(n),
            format_number(total)
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let (n, total) = event.counts();
        let mut obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase(),
            "n": n,
            "total": total,
        });
        if let ProgressEvent::Scanning { collection, .. } = &event {
            obj["collection"] = serde_json::Value::String(collection.clone());
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}
