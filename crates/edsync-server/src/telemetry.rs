//! Opt-in, content-free timing of the synchronization requests.
//!
//! Every handled request is counted per operation; aggregates are appended
//! to a JSONL file every `flush_every` requests and when an endpoint
//! disconnects.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::json;
use tracing::warn;

use crate::config::TelemetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryEvent {
    TrackStart,
    TrackStop,
    TrackSuspend,
    TrackResume,
    TrackMove,
    ContentChange,
    WorkingCopyContent,
    PomReconcile,
}

impl TelemetryEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetryEvent::TrackStart => "track_start",
            TelemetryEvent::TrackStop => "track_stop",
            TelemetryEvent::TrackSuspend => "track_suspend",
            TelemetryEvent::TrackResume => "track_resume",
            TelemetryEvent::TrackMove => "track_move",
            TelemetryEvent::ContentChange => "content_change",
            TelemetryEvent::WorkingCopyContent => "working_copy_content",
            TelemetryEvent::PomReconcile => "pom_reconcile",
        }
    }
}

#[derive(Debug, Default)]
struct Aggregate {
    count: u64,
    failures: u64,
    total_ms: u64,
    max_ms: u64,
}

#[derive(Debug, Default)]
struct Pending {
    aggregates: FxHashMap<TelemetryEvent, Aggregate>,
    requests: usize,
}

/// Request timings of the whole server; a no-op unless enabled.
pub struct Telemetry {
    target: Option<(PathBuf, usize)>,
    pending: Mutex<Pending>,
}

impl Telemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        let target = config
            .path
            .clone()
            .filter(|_| config.enabled)
            .map(|path| (path, config.flush_every.max(1)));
        Self {
            target,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn record(&self, event: TelemetryEvent, duration: Duration, succeeded: bool) {
        let Some((path, flush_every)) = &self.target else {
            return;
        };
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let mut pending = self.pending.lock();
        let aggregate = pending.aggregates.entry(event).or_default();
        aggregate.count += 1;
        if !succeeded {
            aggregate.failures += 1;
        }
        aggregate.total_ms = aggregate.total_ms.saturating_add(duration_ms);
        aggregate.max_ms = aggregate.max_ms.max(duration_ms);
        pending.requests += 1;
        if pending.requests >= *flush_every {
            append(path, &std::mem::take(&mut *pending));
        }
    }

    pub fn flush(&self) {
        let Some((path, _)) = &self.target else {
            return;
        };
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.requests > 0 {
            append(path, &pending);
        }
    }
}

fn append(path: &PathBuf, pending: &Pending) {
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!("Failed to create telemetry directory {}: {err}", parent.display());
            return;
        }
    }
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let operations: serde_json::Map<_, _> = pending
        .aggregates
        .iter()
        .map(|(event, aggregate)| {
            (
                event.as_str().to_string(),
                json!({
                    "count": aggregate.count,
                    "failures": aggregate.failures,
                    "total_ms": aggregate.total_ms,
                    "max_ms": aggregate.max_ms,
                }),
            )
        })
        .collect();
    let record = json!({
        "timestamp": timestamp,
        "version": env!("CARGO_PKG_VERSION"),
        "operations": operations,
    });
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{record}"));
    if let Err(err) = written {
        warn!("Failed to write telemetry to {}: {err}", path.display());
    }
}
