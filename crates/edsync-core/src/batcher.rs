//! Dirty-region batcher, the editor-side counterpart of the working copy
//! store.
//!
//! Raw document changes are classified into [`DirtyRegion`]s and queued.
//! Every change re-arms one quiet-period timer per document; when it fires
//! the editor is saved (autosave) and the queue is drained in FIFO order,
//! one [`EditOperation`] per region.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::edit::EditOperation;

/// Quiet period editors install the batcher with.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutosaveMode {
    #[default]
    Activated,
    Suspended,
    Resuming,
    Deactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Insert,
    Remove,
}

/// One local mutation awaiting transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRegion {
    pub offset: usize,
    /// Inserted chars for INSERT, removed chars for REMOVE.
    pub length: usize,
    pub kind: RegionKind,
    pub text: Option<String>,
}

/// Raw change notification from the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub offset: usize,
    pub removed_char_count: usize,
    pub text: Option<String>,
}

impl DocumentChange {
    /// Splits the change into regions: an INSERT, a REMOVE, or a REMOVE
    /// followed by an INSERT at the same offset for a replacement.
    #[must_use]
    pub fn regions(&self) -> Vec<DirtyRegion> {
        let text = self.text.as_deref().filter(|text| !text.is_empty());
        let insert = |text: &str| DirtyRegion {
            offset: self.offset,
            length: text.chars().count(),
            kind: RegionKind::Insert,
            text: Some(text.to_string()),
        };
        let remove = DirtyRegion {
            offset: self.offset,
            length: self.removed_char_count,
            kind: RegionKind::Remove,
            text: None,
        };
        match text {
            Some(text) if self.removed_char_count == 0 => vec![insert(text)],
            None => vec![remove],
            Some(text) => vec![remove, insert(text)],
        }
    }
}

/// Editor document the batcher is installed on.
pub trait EditorDocument: Send + Sync {
    /// Workspace path of the document.
    fn file_location(&self) -> String;

    /// Owning project; regions are not transmitted while it is unknown.
    fn project_path(&self) -> Option<String>;

    fn is_dirty(&self) -> bool;

    fn save(&self);
}

/// Outgoing `track:editor-content-changes` channel.
pub trait EditSink: Send + Sync {
    fn send(&self, op: EditOperation);
}

/// Source of the "enable autosave" preference. `None` leaves the mode as is.
pub trait AutosavePreference: Send + Sync {
    fn autosave_enabled(&self) -> Option<bool>;
}

#[derive(Default)]
struct BatcherState {
    mode: AutosaveMode,
    queue: VecDeque<DirtyRegion>,
    timer: Option<CancellationToken>,
}

/// Queue state sits behind `state`; `outbox` is held across a whole
/// save-and-send so batches leave in the order they were popped. The editor
/// and the sink are only called with `state` released.
struct Shared {
    outbox: Mutex<()>,
    state: Mutex<BatcherState>,
    document: Arc<dyn EditorDocument>,
    sink: Arc<dyn EditSink>,
    preference: Arc<dyn AutosavePreference>,
    delay: Duration,
}

/// Batches the changes of one document. Timers run on the current Tokio
/// runtime.
pub struct DirtyRegionBatcher {
    shared: Arc<Shared>,
}

impl DirtyRegionBatcher {
    /// Installs a batcher on `document` and applies the current preference.
    pub fn install(
        document: Arc<dyn EditorDocument>,
        sink: Arc<dyn EditSink>,
        preference: Arc<dyn AutosavePreference>,
        delay: Duration,
    ) -> Self {
        let batcher = Self {
            shared: Arc::new(Shared {
                outbox: Mutex::new(()),
                state: Mutex::new(BatcherState::default()),
                document,
                sink,
                preference,
                delay,
            }),
        };
        batcher.on_preference_changed();
        batcher
    }

    #[must_use]
    pub fn mode(&self) -> AutosaveMode {
        self.shared.state.lock().mode
    }

    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.mode() == AutosaveMode::Activated
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Queues the regions of `change` and restarts the quiet period.
    pub fn on_document_change(&self, change: &DocumentChange) {
        let mut state = self.shared.state.lock();
        state.queue.extend(change.regions());
        if matches!(state.mode, AutosaveMode::Activated | AutosaveMode::Resuming) {
            self.shared.schedule(&mut state);
        }
    }

    /// Sends the whole document as one REPLACE_ALL, superseding queued
    /// regions.
    pub fn on_content_reloaded(&self, content: &str) {
        let _outbox = self.shared.outbox.lock();
        {
            let mut state = self.shared.state.lock();
            state.queue.clear();
            cancel_timer(&mut state);
        }
        let Some(project_path) = self.shared.document.project_path() else {
            debug!("no project for {}; reload not sent", self.shared.document.file_location());
            return;
        };
        self.shared.sink.send(EditOperation::replace_all(
            self.shared.document.file_location(),
            Some(project_path),
            content,
        ));
    }

    pub fn suspend(&self) {
        let mut state = self.shared.state.lock();
        state.mode = AutosaveMode::Suspended;
        cancel_timer(&mut state);
    }

    pub fn resume(&self) {
        self.shared.state.lock().mode = AutosaveMode::Resuming;
        self.on_preference_changed();
    }

    /// Re-evaluates the autosave preference.
    pub fn on_preference_changed(&self) {
        let Some(enabled) = self.shared.preference.autosave_enabled() else {
            return;
        };
        let mut state = self.shared.state.lock();
        if !enabled && state.mode != AutosaveMode::Deactivated {
            state.mode = AutosaveMode::Deactivated;
            cancel_timer(&mut state);
        } else if enabled && state.mode != AutosaveMode::Activated {
            state.mode = AutosaveMode::Activated;
            self.shared.schedule(&mut state);
        }
    }

    /// Drains the queue now, whatever the mode.
    pub fn flush(&self) {
        let _outbox = self.shared.outbox.lock();
        let ops = {
            let mut state = self.shared.state.lock();
            cancel_timer(&mut state);
            self.shared.drain(&mut state)
        };
        self.shared.transmit(ops);
    }

    /// Cancels the pending timer; queued regions are kept.
    pub fn uninstall(&self) {
        cancel_timer(&mut self.shared.state.lock());
    }
}

impl Drop for DirtyRegionBatcher {
    fn drop(&mut self) {
        self.uninstall();
    }
}

fn cancel_timer(state: &mut BatcherState) {
    if let Some(timer) = state.timer.take() {
        timer.cancel();
    }
}

impl Shared {
    fn schedule(self: &Arc<Self>, state: &mut BatcherState) {
        cancel_timer(state);
        let token = CancellationToken::new();
        state.timer = Some(token.clone());
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(shared.delay) => shared.fire(&token),
            }
        });
    }

    fn fire(&self, token: &CancellationToken) {
        let _outbox = self.outbox.lock();
        let (save, ops) = {
            let mut state = self.state.lock();
            if token.is_cancelled() {
                return;
            }
            state.timer = None;
            match state.mode {
                AutosaveMode::Activated => (true, self.drain(&mut state)),
                AutosaveMode::Resuming => (false, self.drain(&mut state)),
                AutosaveMode::Suspended | AutosaveMode::Deactivated => return,
            }
        };
        if save && self.document.is_dirty() {
            self.document.save();
        }
        self.transmit(ops);
    }

    fn transmit(&self, ops: Vec<EditOperation>) {
        for op in ops {
            self.sink.send(op);
        }
    }

    /// Pops every queued region as an edit operation, or none while the
    /// document has no project.
    fn drain(&self, state: &mut BatcherState) -> Vec<EditOperation> {
        if state.queue.is_empty() {
            return Vec::new();
        }
        let file_location = self.document.file_location();
        let Some(project_path) = self.document.project_path() else {
            debug!("no project for {file_location}; keeping {} regions", state.queue.len());
            return Vec::new();
        };
        let mut ops = Vec::with_capacity(state.queue.len());
        while let Some(region) = state.queue.pop_front() {
            let project = Some(project_path.clone());
            let op = match region.kind {
                RegionKind::Insert => EditOperation::insert(
                    file_location.as_str(),
                    project,
                    region.offset,
                    region.text.unwrap_or_default(),
                ),
                RegionKind::Remove => {
                    EditOperation::remove(file_location.as_str(), project, region.offset, region.length)
                }
            };
            ops.push(op);
        }
        ops
    }
}
