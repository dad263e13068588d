//! Crawl work queues.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use beacon_core::Item;
use strum::Display;

/// Phase of a crawler's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CrawlPhase {
    Idle,
    Scanning,
    Checking,
    Updating,
    Stopped,
}

/// Queues of one crawler plus the set of directories already watched.
#[derive(Debug, Default)]
pub struct CrawlState {
    /// Directories pending listing.
    pub scan_dirs: VecDeque<Item>,
    /// Items pending mtime check.
    pub check_mtime: VecDeque<Item>,
    /// Items pending metadata update, with the live mtime to store.
    pub pending_update: VecDeque<(Item, i64)>,
    /// Directories already listed and watched.
    pub monitoring: HashSet<PathBuf>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase implied by the queues: the first non-empty queue wins.
    pub fn phase(&self) -> CrawlPhase {
        if !self.scan_dirs.is_empty() {
            CrawlPhase::Scanning
        } else if !self.check_mtime.is_empty() {
            CrawlPhase::Checking
        } else if !self.pending_update.is_empty() {
            CrawlPhase::Updating
        } else {
            CrawlPhase::Idle
        }
    }

    /// Seed a crawl with a root item.
    pub fn append(&mut self, item: Item) {
        if item.is_dir() {
            self.scan_dirs.push_back(item.clone());
        }
        self.check_mtime.push_back(item);
    }

    /// Check if a directory is listed or waiting to be listed.
    pub fn is_known_dir(&self, path: &Path) -> bool {
        self.monitoring.contains(path) || self.scan_dirs.iter().any(|d| d.path() == path)
    }

    /// Check if an item is waiting for its mtime check.
    pub fn is_checking(&self, filename: &str) -> bool {
        self.check_mtime.iter().any(|i| i.filename == filename)
    }

    /// Drop everything queued for `root` or below it.
    pub fn forget_tree(&mut self, root: &Path) {
        self.scan_dirs.retain(|i| !i.path().starts_with(root));
        self.check_mtime.retain(|i| !i.path().starts_with(root));
        self.pending_update.retain(|(i, _)| !i.path().starts_with(root));
        self.monitoring.retain(|p| !p.starts_with(root));
    }

    /// Empty the work queues. The monitoring set is kept.
    pub fn clear(&mut self) {
        self.scan_dirs.clear();
        self.check_mtime.clear();
        self.pending_update.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_follows_queue_priority() {
        let mut state = CrawlState::new();
        assert_eq!(state.phase(), CrawlPhase::Idle);

        state.append(Item::new_dir("/m", None));
        assert_eq!(state.phase(), CrawlPhase::Scanning);

        state.scan_dirs.clear();
        assert_eq!(state.phase(), CrawlPhase::Checking);

        let item = state.check_mtime.pop_front().unwrap();
        state.pending_update.push_back((item, 1));
        assert_eq!(state.phase(), CrawlPhase::Updating);

        state.clear();
        assert_eq!(state.phase(), CrawlPhase::Idle);
    }

    #[test]
    fn test_forget_tree() {
        let mut state = CrawlState::new();
        state.append(Item::new_dir("/m/a", None));
        state.append(Item::new_file("/m/a/x.jpg", None));
        state.append(Item::new_file("/m/ab.jpg", None));
        state.monitoring.insert(PathBuf::from("/m/a"));

        state.forget_tree(Path::new("/m/a"));

        assert!(state.scan_dirs.is_empty());
        assert_eq!(state.check_mtime.len(), 1);
        assert!(state.is_checking("/m/ab.jpg"));
        assert!(!state.is_known_dir(Path::new("/m/a")));
    }
}
