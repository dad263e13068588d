//! Watch descriptor bookkeeping and event dispatch.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing::trace;

use crate::WATCH_CHANNEL_SIZE;
use crate::event::{ChangeKind, WatchEvent};

#[derive(Debug)]
struct WatchEntry {
    path: PathBuf,
    tx: broadcast::Sender<WatchEvent>,
}

/// Maps watch descriptors to paths and subscribers.
///
/// Generic over the descriptor type so dispatch can be driven without the
/// kernel. A CREATE on a path eats exactly one MODIFY that immediately follows
/// it on the same path.
#[derive(Debug)]
pub struct WatchTable<K> {
    entries: HashMap<K, WatchEntry>,
    by_path: HashMap<PathBuf, K>,
    last_created: Option<PathBuf>,
    all: broadcast::Sender<WatchEvent>,
}

impl<K: Hash + Eq + Clone> WatchTable<K> {
    /// Create an empty table.
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(WATCH_CHANNEL_SIZE);
        Self {
            entries: HashMap::new(),
            by_path: HashMap::new(),
            last_created: None,
            all,
        }
    }

    /// Register a watch and return a subscription to its events.
    ///
    /// Watching an already watched path subscribes to the existing entry.
    pub fn insert(&mut self, key: K, path: &Path) -> broadcast::Receiver<WatchEvent> {
        let path = normalize(path);
        if let Some(entry) = self.entries.get(&key) {
            return entry.tx.subscribe();
        }
        let (tx, rx) = broadcast::channel(WATCH_CHANNEL_SIZE);
        self.by_path.insert(path.clone(), key.clone());
        self.entries.insert(key, WatchEntry { path, tx });
        rx
    }

    /// Subscribe to events of every watch.
    pub fn subscribe_all(&self) -> broadcast::Receiver<WatchEvent> {
        self.all.subscribe()
    }

    /// Descriptor watching `path`, if any.
    pub fn key_for(&self, path: &Path) -> Option<&K> {
        self.by_path.get(&normalize(path))
    }

    /// Check if `path` is watched.
    pub fn contains(&self, path: &Path) -> bool {
        self.key_for(path).is_some()
    }

    /// Forget the watch on `path`.
    pub fn remove_path(&mut self, path: &Path) -> Option<K> {
        let key = self.by_path.remove(&normalize(path))?;
        self.entries.remove(&key);
        Some(key)
    }

    /// Forget the watch with descriptor `key`.
    pub fn remove_key(&mut self, key: &K) -> Option<PathBuf> {
        let entry = self.entries.remove(key)?;
        self.by_path.remove(&entry.path);
        Some(entry.path)
    }

    /// Forget every watch on `root` or below it.
    pub fn remove_tree(&mut self, root: &Path) -> Vec<K> {
        let root = normalize(root);
        let doomed: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(&root))
            .cloned()
            .collect();
        doomed
            .iter()
            .filter_map(|p| self.remove_path(p))
            .collect()
    }

    /// Number of active watches.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no watch is active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatch one raw record.
    ///
    /// Returns the event sent to subscribers, or `None` when the record
    /// belongs to no known watch or was eaten by coalescing.
    pub fn dispatch(
        &mut self,
        key: &K,
        kind: ChangeKind,
        name: Option<&OsStr>,
        is_dir: bool,
    ) -> Option<WatchEvent> {
        let Some(entry) = self.entries.get(key) else {
            trace!(%kind, "event for unknown watch");
            return None;
        };

        let path = match name {
            Some(name) if !name.is_empty() => entry.path.join(name),
            _ => entry.path.clone(),
        };

        if kind == ChangeKind::Modify && self.last_created.as_deref() == Some(path.as_path()) {
            self.last_created = None;
            trace!(path = %path.display(), "modify after create coalesced");
            return None;
        }
        self.last_created = (kind == ChangeKind::Create).then(|| path.clone());

        let event = WatchEvent::new(path, kind, is_dir);
        // Sends fail only when nobody listens.
        let _ = entry.tx.send(event.clone());
        let _ = self.all.send(event.clone());

        if kind == ChangeKind::DeleteSelf {
            self.remove_key(key);
        }
        Some(event)
    }
}

impl<K: Hash + Eq + Clone> Default for WatchTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_modify_coalesced() {
        let mut table = WatchTable::new();
        let mut rx = table.insert(1u32, Path::new("/media/disk1"));

        let created = table.dispatch(&1, ChangeKind::Create, Some(OsStr::new("a.jpg")), false);
        let modified = table.dispatch(&1, ChangeKind::Modify, Some(OsStr::new("a.jpg")), false);

        assert_eq!(created.unwrap().path, PathBuf::from("/media/disk1/a.jpg"));
        assert!(modified.is_none());
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Create);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_only_one_modify_eaten() {
        let mut table = WatchTable::new();
        table.insert(1u32, Path::new("/d"));

        table.dispatch(&1, ChangeKind::Create, Some(OsStr::new("f")), false);
        assert!(table.dispatch(&1, ChangeKind::Modify, Some(OsStr::new("f")), false).is_none());
        assert!(table.dispatch(&1, ChangeKind::Modify, Some(OsStr::new("f")), false).is_some());
    }

    #[test]
    fn test_modify_of_other_path_not_eaten() {
        let mut table = WatchTable::new();
        table.insert(1u32, Path::new("/d"));

        table.dispatch(&1, ChangeKind::Create, Some(OsStr::new("f")), false);
        assert!(table.dispatch(&1, ChangeKind::Modify, Some(OsStr::new("g")), false).is_some());
        // The intervening event broke the pair.
        assert!(table.dispatch(&1, ChangeKind::Modify, Some(OsStr::new("f")), false).is_some());
    }

    #[test]
    fn test_catch_all_receives_every_watch() {
        let mut table = WatchTable::new();
        table.insert(1u32, Path::new("/a"));
        table.insert(2u32, Path::new("/b"));
        let mut all = table.subscribe_all();

        table.dispatch(&1, ChangeKind::Delete, Some(OsStr::new("x")), false);
        table.dispatch(&2, ChangeKind::Attrib, None, true);

        assert_eq!(all.try_recv().unwrap().path, PathBuf::from("/a/x"));
        assert_eq!(all.try_recv().unwrap().path, PathBuf::from("/b"));
    }

    #[test]
    fn test_delete_self_removes_watch() {
        let mut table = WatchTable::new();
        table.insert(7u32, Path::new("/gone"));

        let event = table.dispatch(&7, ChangeKind::DeleteSelf, None, true);
        assert!(event.is_some());
        assert!(table.is_empty());
        assert!(table.dispatch(&7, ChangeKind::Modify, None, true).is_none());
    }

    #[test]
    fn test_remove_tree() {
        let mut table = WatchTable::new();
        table.insert(1u32, Path::new("/m/a"));
        table.insert(2u32, Path::new("/m/a/b"));
        table.insert(3u32, Path::new("/m/ab"));

        let mut removed = table.remove_tree(Path::new("/m/a/"));
        removed.sort();
        assert_eq!(removed, [1, 2]);
        assert!(table.contains(Path::new("/m/ab")));
    }
}
