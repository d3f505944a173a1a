//! `notify`-backed implementation of the watch seam.
//!
//! One non-recursive OS watch is armed per parent directory and shared by
//! every handle on files inside it; events for files nobody watches are
//! filtered out before they reach the synchronization core.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use edsync_core::path::normalize;
use edsync_core::{Result, SyncError, WatchEvent, WatchHandle, WatchService};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

#[derive(Default)]
struct WatchTable {
    next: u64,
    handles: FxHashMap<u64, String>,
    files: FxHashMap<String, usize>,
    dirs: FxHashMap<PathBuf, usize>,
}

pub struct NotifyWatchService {
    root: PathBuf,
    watcher: Mutex<RecommendedWatcher>,
    table: Arc<Mutex<WatchTable>>,
}

impl NotifyWatchService {
    /// Watches files below `root`, forwarding their events to `events`.
    pub fn new(root: &Path, events: UnboundedSender<WatchEvent>) -> notify::Result<Self> {
        let table = Arc::new(Mutex::new(WatchTable::default()));
        let callback_table = table.clone();
        let callback_root = root.to_path_buf();
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    warn!("file watcher error: {err}");
                    return;
                }
            };
            for (path, kind) in translate(&callback_root, &event) {
                if !callback_table.lock().files.contains_key(&path) {
                    continue;
                }
                let watch_event = match kind {
                    Translated::Changed => WatchEvent::changed(path),
                    Translated::Removed => WatchEvent::removed(path),
                };
                if events.send(watch_event).is_err() {
                    debug!("watch event receiver is gone");
                    return;
                }
            }
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            watcher: Mutex::new(watcher),
            table,
        })
    }

    fn location(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize(path).ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        Ok(self.root.join(&normalized[1..]))
    }
}

impl WatchService for NotifyWatchService {
    fn watch(&self, path: &str) -> Result<WatchHandle> {
        let location = self.location(path)?;
        let dir = location
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        let normalized = normalize(path).ok_or_else(|| SyncError::NotFound(path.to_string()))?;

        // The OS watch is armed outside the table lock; the notify thread
        // takes the table lock from its callback.
        let mut watcher = self.watcher.lock();
        let first_in_dir = !self.table.lock().dirs.contains_key(&dir);
        if first_in_dir {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|err| {
                    SyncError::ServerFailure(format!("failed to watch '{}': {err}", dir.display()))
                })?;
        }
        let mut table = self.table.lock();
        *table.dirs.entry(dir).or_default() += 1;
        *table.files.entry(normalized.clone()).or_default() += 1;
        table.next += 1;
        let id = table.next;
        table.handles.insert(id, normalized);
        Ok(WatchHandle(id))
    }

    fn unwatch(&self, handle: WatchHandle) {
        let mut watcher = self.watcher.lock();
        let released_dir = {
            let mut table = self.table.lock();
            let Some(path) = table.handles.remove(&handle.0) else {
                return;
            };
            release(&mut table.files, &path);
            let Ok(location) = self.location(&path) else {
                return;
            };
            let Some(dir) = location.parent().map(Path::to_path_buf) else {
                return;
            };
            release(&mut table.dirs, &dir).then_some(dir)
        };
        if let Some(dir) = released_dir {
            if let Err(err) = watcher.unwatch(&dir) {
                debug!("failed to unwatch '{}': {err}", dir.display());
            }
        }
    }
}

/// Decrements a refcount; `true` when it reached zero.
fn release<K: std::hash::Hash + Eq>(counts: &mut FxHashMap<K, usize>, key: &K) -> bool {
    let Some(count) = counts.get_mut(key) else {
        return false;
    };
    *count -= 1;
    if *count == 0 {
        counts.remove(key);
        return true;
    }
    false
}

/// Watch service used when filesystem watching is disabled.
#[derive(Debug, Default)]
pub struct DisabledWatchService {
    next: Mutex<u64>,
}

impl WatchService for DisabledWatchService {
    fn watch(&self, _path: &str) -> Result<WatchHandle> {
        let mut next = self.next.lock();
        *next += 1;
        Ok(WatchHandle(*next))
    }

    fn unwatch(&self, _handle: WatchHandle) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Translated {
    Changed,
    Removed,
}

/// Maps a raw notify event onto workspace paths below `root`.
fn translate(root: &Path, event: &Event) -> Vec<(String, Translated)> {
    let kind = match event.kind {
        EventKind::Access(_) => return Vec::new(),
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            Some(Translated::Changed)
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            Some(Translated::Removed)
        }
        // Renames without a direction: decided by what is on disk now.
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Any | EventKind::Other => None,
        EventKind::Modify(_) => Some(Translated::Changed),
    };
    event
        .paths
        .iter()
        .filter_map(|path| {
            let kind = kind.unwrap_or_else(|| {
                if path.exists() {
                    Translated::Changed
                } else {
                    Translated::Removed
                }
            });
            Some((workspace_path(root, path)?, kind))
        })
        .collect()
}

fn workspace_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                out.push('/');
                out.push_str(&segment.to_string_lossy());
            }
            _ => return None,
        }
    }
    (!out.is_empty()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use std::fs;
    use tokio::sync::mpsc;

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn translates_event_kinds() {
        let root = PathBuf::from("/ws");
        let file = root.join("demo").join("a.txt");
        assert_eq!(
            translate(&root, &event(EventKind::Create(CreateKind::File), &file)),
            vec![("/demo/a.txt".to_string(), Translated::Changed)]
        );
        assert_eq!(
            translate(
                &root,
                &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &file)
            ),
            vec![("/demo/a.txt".to_string(), Translated::Changed)]
        );
        assert_eq!(
            translate(&root, &event(EventKind::Remove(RemoveKind::File), &file)),
            vec![("/demo/a.txt".to_string(), Translated::Removed)]
        );
        assert_eq!(
            translate(
                &root,
                &event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &file)
            ),
            vec![("/demo/a.txt".to_string(), Translated::Removed)]
        );
        assert!(translate(&root, &event(EventKind::Access(AccessKind::Any), &file)).is_empty());
    }

    #[test]
    fn ambiguous_rename_checks_the_disk() {
        let root = temp_dir("edsync-watch-rename");
        let present = root.join("present.txt");
        fs::write(&present, "x").expect("write");
        let gone = root.join("gone.txt");
        let rename = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        let raw = Event::new(rename)
            .add_path(gone.clone())
            .add_path(present.clone());
        assert_eq!(
            translate(&root, &raw),
            vec![
                ("/gone.txt".to_string(), Translated::Removed),
                ("/present.txt".to_string(), Translated::Changed),
            ]
        );
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn paths_outside_root_are_ignored() {
        let root = PathBuf::from("/ws");
        let raw = event(EventKind::Create(CreateKind::File), Path::new("/elsewhere/a.txt"));
        assert!(translate(&root, &raw).is_empty());
        assert_eq!(workspace_path(&root, Path::new("/ws")), None);
    }

    #[tokio::test]
    async fn refcounts_shared_directory_watches() {
        let root = temp_dir("edsync-watch-refcount");
        fs::create_dir_all(root.join("demo")).expect("mkdir");
        let (sender, _receiver) = mpsc::unbounded_channel();
        let service = NotifyWatchService::new(&root, sender).expect("watcher");

        let first = service.watch("/demo/a.txt").expect("watch a");
        let second = service.watch("/demo/b.txt").expect("watch b");
        assert_ne!(first, second);
        assert_eq!(service.table.lock().dirs.len(), 1);

        service.unwatch(first);
        assert_eq!(service.table.lock().dirs.len(), 1);
        service.unwatch(second);
        assert!(service.table.lock().dirs.is_empty());
        assert!(service.table.lock().files.is_empty());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn missing_directory_fails_to_watch() {
        let root = temp_dir("edsync-watch-missing");
        let (sender, _receiver) = mpsc::unbounded_channel();
        let service = NotifyWatchService::new(&root, sender).expect("watcher");
        let err = service.watch("/nope/a.txt").expect_err("missing dir");
        assert_eq!(err.class().code(), 500);
        assert!(service.table.lock().dirs.is_empty());
        fs::remove_dir_all(root).ok();
    }
}
