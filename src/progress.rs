//! Progress Reporter: one active listener per import id, fed by the importer.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Structured import progress, serialized as `{"type": "FILE_START", ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    FileStart {
        file: String,
        index: usize,
        total_files: usize,
        overall_percent: f64,
    },
    #[serde(rename_all = "camelCase")]
    ChunkProgress {
        file: String,
        index: usize,
        total_files: usize,
        chunk_index: usize,
        chunk_total: usize,
        overall_percent: f64,
    },
    #[serde(rename_all = "camelCase")]
    FileDone {
        file: String,
        index: usize,
        total_files: usize,
        overall_percent: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        total_files: usize,
        overall_percent: f64,
        message: String,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    /// `DONE` and `ERROR` end the stream for an import
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. } | ProgressEvent::Error { .. })
    }
}

pub type ListenerId = u64;

struct Listener {
    id: ListenerId,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

#[derive(Default)]
struct Registry {
    listeners: HashMap<String, Listener>,
    last_events: HashMap<String, ProgressEvent>,
    next_id: ListenerId,
}

/// Registry of progress listeners keyed by import id.
///
/// At most one listener per import; registering again replaces (and closes) the
/// previous one. Shared via `Arc` between the importer and the transport layer.
#[derive(Default)]
pub struct ProgressHub {
    registry: Mutex<Registry>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a listener. The most recent event, if any, is delivered first.
    pub fn register(&self, import_id: &str) -> (ListenerId, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;

        let last = registry.last_events.get(import_id).cloned();
        let finished = last.as_ref().is_some_and(|e| e.is_terminal());
        if let Some(event) = last {
            let _ = tx.send(event);
        }

        if finished {
            // tx drops here, so the receiver ends right after the replayed event
            registry.listeners.remove(import_id);
        } else if registry
            .listeners
            .insert(import_id.to_string(), Listener { id, tx })
            .is_some()
        {
            log::debug!("Replaced progress listener for import {}", import_id);
        }

        (id, rx)
    }

    /// Detach `listener`, unless it has already been replaced by a newer one
    pub fn unregister(&self, import_id: &str, listener: ListenerId) {
        let mut registry = self.lock();
        if registry.listeners.get(import_id).is_some_and(|l| l.id == listener) {
            registry.listeners.remove(import_id);
        }
    }

    /// Start a fresh run for `import_id`, forgetting a previous terminal event
    pub fn begin(&self, import_id: &str) {
        self.lock().last_events.remove(import_id);
    }

    /// Deliver an event. Ignored once the import has emitted `DONE` or `ERROR`.
    pub fn push(&self, import_id: &str, event: ProgressEvent) {
        let mut registry = self.lock();
        if registry.last_events.get(import_id).is_some_and(|e| e.is_terminal()) {
            log::debug!("Dropping progress event after terminal event for {}", import_id);
            return;
        }

        let terminal = event.is_terminal();
        let delivered = match registry.listeners.get(import_id) {
            Some(listener) => listener.tx.send(event.clone()).is_ok(),
            None => true,
        };
        if !delivered || terminal {
            registry.listeners.remove(import_id);
        }
        registry.last_events.insert(import_id.to_string(), event);
    }

    pub fn has_listener(&self, import_id: &str) -> bool {
        self.lock().listeners.contains_key(import_id)
    }

    pub fn last_event(&self, import_id: &str) -> Option<ProgressEvent> {
        self.lock().last_events.get(import_id).cloned()
    }
}

/// Overall completion in percent, never decreasing
#[derive(Debug, Clone)]
pub struct PercentTracker {
    total_files: usize,
    last: f64,
}

impl PercentTracker {
    pub fn new(total_files: usize) -> Self {
        Self { total_files, last: 0.0 }
    }

    /// `(files_done + fraction) / total_files`, as a percentage with two decimals
    pub fn at(&mut self, files_done: usize, fraction: f64) -> f64 {
        let raw = if self.total_files == 0 {
            100.0
        } else {
            (files_done as f64 + fraction.clamp(0.0, 1.0)) / self.total_files as f64 * 100.0
        };
        let rounded = (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0;
        self.last = self.last.max(rounded);
        self.last
    }
}
