//! Working copy store.
//!
//! One authoritative buffer per path, persisted write-through to a shadow
//! file under `<project>/<shadow_dir>/`. Every path owns a slot behind its own
//! lock, so edits to one path apply in arrival order while unrelated paths
//! never contend. A slot removed from the map is marked retired; callers that
//! raced with the removal retry on a fresh slot.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::edit::{apply_edit, EditOperation};
use crate::error::{Result, SyncError};
use crate::events::{ContentUpdated, EventSender, SyncEvent};
use crate::hash::ContentHash;
use crate::path::{ancestors, is_within, normalize, project_of, shadow_file_name};
use crate::protocol::EndpointId;
use crate::settings::SyncSettings;
use crate::storage::Storage;

#[derive(Debug)]
struct WorkingCopy {
    project_path: String,
    content: String,
    shadow_path: String,
    /// Last shadow write failed; retried on the next mutation and before
    /// the copy is discarded.
    stale: bool,
}

#[derive(Default)]
struct Slot {
    copy: Option<WorkingCopy>,
    retired: bool,
}

/// Result of a successful [`WorkingCopyStore::apply_edit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub content: String,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardOutcome {
    /// Buffer and shadow were removed.
    Discarded,
    /// Content differs from the original file; buffer and shadow are kept.
    HasUnsavedChanges,
    /// No working copy existed.
    Absent,
}

pub struct WorkingCopyStore {
    storage: Arc<dyn Storage>,
    shadow_dir: String,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    events: EventSender,
}

impl WorkingCopyStore {
    pub fn new(storage: Arc<dyn Storage>, settings: &SyncSettings, events: EventSender) -> Self {
        let shadow_dir = settings.shadow_dir.trim_matches('/').to_string();
        Self {
            storage,
            shadow_dir,
            slots: DashMap::new(),
            events,
        }
    }

    /// Shadow location of `path` inside `project`.
    #[must_use]
    pub fn shadow_path(&self, project: &str, path: &str) -> String {
        format!("{project}/{}/{}", self.shadow_dir, shadow_file_name(path))
    }

    fn resolve_project(path: &str, explicit: Option<&str>) -> Result<String> {
        explicit
            .filter(|project| !project.is_empty())
            .and_then(normalize)
            .or_else(|| project_of(path))
            .ok_or_else(|| SyncError::NotFound(format!("project of {path}")))
    }

    /// Runs `f` on the live slot of `path`, creating it on demand. A slot
    /// left without a copy after a failure is removed again.
    fn with_slot<T>(&self, path: &str, f: impl FnOnce(&mut Slot) -> Result<T>) -> Result<T> {
        loop {
            let slot = self.slots.entry(path.to_string()).or_default().clone();
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }
            let result = f(&mut guard);
            if result.is_err() && guard.copy.is_none() {
                self.retire(path, &slot, &mut guard);
            }
            return result;
        }
    }

    fn existing_slot(&self, path: &str) -> Option<Arc<Mutex<Slot>>> {
        self.slots.get(path).map(|entry| entry.value().clone())
    }

    /// Removes the map entry of `path` if it still points at `slot`.
    fn retire(&self, path: &str, slot: &Arc<Mutex<Slot>>, guard: &mut Slot) {
        guard.retired = true;
        guard.copy = None;
        self.slots.remove_if(path, |_, current| Arc::ptr_eq(current, slot));
    }

    fn load(&self, path: &str, project: String) -> Result<WorkingCopy> {
        if !self.storage.is_dir(&project) {
            return Err(SyncError::NotFound(format!("project {project}")));
        }
        let shadow_path = self.shadow_path(&project, path);
        if let Some(content) = self.storage.read(&shadow_path)? {
            info!("recovered working copy of {path} from {shadow_path}");
            return Ok(WorkingCopy {
                project_path: project,
                content,
                shadow_path,
                stale: false,
            });
        }
        let content = self
            .storage
            .read(path)?
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        let mut copy = WorkingCopy {
            project_path: project,
            content,
            shadow_path,
            stale: true,
        };
        self.persist(path, &mut copy);
        Ok(copy)
    }

    fn persist(&self, path: &str, copy: &mut WorkingCopy) {
        match self.storage.write(&copy.shadow_path, &copy.content) {
            Ok(()) => copy.stale = false,
            Err(err) => {
                copy.stale = true;
                error!("failed to persist working copy of {path}; keeping it in memory: {err}");
            }
        }
    }

    /// Gets or creates the working copy of `path`.
    pub fn open(&self, path: &str, project_path: Option<&str>) -> Result<()> {
        self.with_slot(path, |slot| {
            if slot.copy.is_none() {
                let project = Self::resolve_project(path, project_path)?;
                slot.copy = Some(self.load(path, project)?);
            }
            Ok(())
        })
    }

    /// Current content of `path`: the in-memory buffer, else the shadow copy,
    /// else the original file. Without a buffer the shadow is looked up in
    /// every enclosing folder, innermost first, so copies of nested projects
    /// are found.
    pub fn get_content(&self, path: &str) -> Result<String> {
        if let Some(slot) = self.existing_slot(path) {
            let guard = slot.lock();
            if let Some(copy) = guard.copy.as_ref() {
                return Ok(copy.content.clone());
            }
        }
        for project in ancestors(path) {
            if let Some(content) = self.storage.read(&self.shadow_path(&project, path))? {
                return Ok(content);
            }
        }
        self.storage
            .read(path)?
            .ok_or_else(|| SyncError::NotFound(path.to_string()))
    }

    /// Applies `op` to the working copy of its file, creating the copy on
    /// first use. A content-updated event is emitted for every change, in
    /// the order the changes were applied.
    pub fn apply_edit(&self, endpoint: &EndpointId, op: &EditOperation) -> Result<EditOutcome> {
        let path = normalize(&op.file_location)
            .ok_or_else(|| SyncError::NotFound(op.file_location.clone()))?;
        self.with_slot(&path, |slot| self.apply_in_slot(endpoint, &path, op, slot))
    }

    fn apply_in_slot(
        &self,
        endpoint: &EndpointId,
        path: &str,
        op: &EditOperation,
        slot: &mut Slot,
    ) -> Result<EditOutcome> {
        match slot.copy.as_ref() {
            Some(copy) if !self.storage.is_dir(&copy.project_path) => {
                return Err(SyncError::Conflict(format!(
                    "project {} was removed while {path} was being edited",
                    copy.project_path
                )));
            }
            Some(_) => {}
            None => {
                let project = Self::resolve_project(path, op.project_path.as_deref())?;
                slot.copy = Some(self.load(path, project)?);
            }
        }
        let Some(copy) = slot.copy.as_mut() else {
            return Err(SyncError::NotFound(path.to_string()));
        };

        let Some(updated) = apply_edit(&copy.content, op)? else {
            if copy.stale {
                self.persist(path, copy);
            }
            return Ok(EditOutcome {
                content: copy.content.clone(),
                changed: false,
            });
        };
        copy.content = updated;
        self.persist(path, copy);

        let event = SyncEvent::ContentUpdated(ContentUpdated {
            endpoint: endpoint.clone(),
            path: path.to_string(),
            project_path: copy.project_path.clone(),
            edit: op.clone(),
            new_content: copy.content.clone(),
        });
        if self.events.send(event).is_err() {
            debug!("content update of {path} has no listener");
        }
        Ok(EditOutcome {
            content: copy.content.clone(),
            changed: true,
        })
    }

    /// Drops the working copy of `path` when it matches the original file.
    pub fn discard(&self, path: &str) -> Result<DiscardOutcome> {
        let Some(slot) = self.existing_slot(path) else {
            return Ok(DiscardOutcome::Absent);
        };
        let mut guard = slot.lock();
        if guard.retired {
            return Ok(DiscardOutcome::Absent);
        }
        let Some(copy) = guard.copy.as_mut() else {
            self.retire(path, &slot, &mut guard);
            return Ok(DiscardOutcome::Absent);
        };
        if copy.stale {
            self.persist(path, copy);
        }
        let original = self.storage.read(path)?;
        let unchanged = original
            .as_deref()
            .is_some_and(|original| ContentHash::of(original) == ContentHash::of(&copy.content));
        if !unchanged {
            info!("keeping working copy of {path}: it differs from the original file");
            return Ok(DiscardOutcome::HasUnsavedChanges);
        }
        self.storage.delete(&copy.shadow_path)?;
        self.retire(path, &slot, &mut guard);
        debug!("discarded working copy of {path}");
        Ok(DiscardOutcome::Discarded)
    }

    /// Relocates the working copy of `old_path` and its shadow to
    /// `new_path`. Returns `false` when `old_path` has no working copy.
    pub fn move_copy(&self, old_path: &str, new_path: &str) -> Result<bool> {
        if old_path == new_path {
            return Ok(false);
        }
        let Some(old_slot) = self.existing_slot(old_path) else {
            return Ok(false);
        };
        let new_slot = self.slots.entry(new_path.to_string()).or_default().clone();
        // Two-slot moves always lock in path order.
        let (mut old_guard, mut new_guard) = if old_path < new_path {
            let old_guard = old_slot.lock();
            (old_guard, new_slot.lock())
        } else {
            let new_guard = new_slot.lock();
            (old_slot.lock(), new_guard)
        };
        if new_guard.retired {
            drop((old_guard, new_guard));
            return self.move_copy(old_path, new_path);
        }
        if old_guard.retired || old_guard.copy.is_none() {
            if new_guard.copy.is_none() {
                self.retire(new_path, &new_slot, &mut new_guard);
            }
            return Ok(false);
        }
        let Some(mut copy) = old_guard.copy.take() else {
            return Ok(false);
        };

        let project = if is_within(new_path, &copy.project_path) {
            copy.project_path.clone()
        } else {
            project_of(new_path).unwrap_or_else(|| copy.project_path.clone())
        };
        let shadow_path = self.shadow_path(&project, new_path);
        if let Err(err) = self.storage.rename(&copy.shadow_path, &shadow_path) {
            warn!("failed to move shadow of {old_path}, rewriting it: {err}");
            if let Err(err) = self.storage.delete(&copy.shadow_path) {
                error!("stale shadow of {old_path} left behind: {err}");
            }
            copy.stale = true;
        }
        copy.project_path = project;
        copy.shadow_path = shadow_path;
        if copy.stale {
            self.persist(new_path, &mut copy);
        }
        if new_guard.copy.replace(copy).is_some() {
            warn!("working copy of {new_path} replaced by the one moved from {old_path}");
        }
        self.retire(old_path, &old_slot, &mut old_guard);
        Ok(true)
    }

    /// Whether `path` currently has an in-memory working copy.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.existing_slot(path)
            .is_some_and(|slot| slot.lock().copy.is_some())
    }
}
