//! Directory listing and live mtime lookup.
//!
//! The functions here block and are run on the blocking pool.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use beacon_core::{Item, dir_filename};

/// One visible entry of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl DirEntryInfo {
    fn filename(&self) -> String {
        if self.is_dir {
            dir_filename(&self.path)
        } else {
            self.path.to_string_lossy().into_owned()
        }
    }
}

/// List the visible entries of `dir`, sorted by path.
pub fn read_listing(dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        // Entries can vanish between readdir and stat.
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        let is_dir = if file_type.is_symlink() {
            path.is_dir()
        } else {
            file_type.is_dir()
        };
        entries.push(DirEntryInfo { path, is_dir });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Merge stored children of `dir` with its live listing.
///
/// Returns the children present on disk, reusing stored rows where they
/// exist and creating unsaved items (mtime 0) otherwise, plus the stored rows
/// whose entry is gone.
pub fn merge_listing(
    dir: &Item,
    stored: Vec<Item>,
    listing: Vec<DirEntryInfo>,
) -> (Vec<Item>, Vec<Item>) {
    let mut stored: HashMap<String, Item> = stored
        .into_iter()
        .map(|item| (item.filename.clone(), item))
        .collect();

    let present = listing
        .into_iter()
        .map(|entry| {
            stored.remove(&entry.filename()).unwrap_or_else(|| {
                let item = if entry.is_dir {
                    Item::new_dir(&entry.path, dir.id.clone())
                } else {
                    Item::new_file(&entry.path, dir.id.clone())
                };
                Item {
                    media: dir.media.clone(),
                    ..item
                }
            })
        })
        .collect();

    let mut vanished: Vec<Item> = stored.into_values().collect();
    vanished.sort_by(|a, b| a.filename.cmp(&b.filename));
    (present, vanished)
}

/// Modification time in whole seconds.
pub fn mtime_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Live mtime of each item, `None` where the entry is gone or unreadable.
///
/// Directories use their own mtime. A file's mtime is the sum of the mtimes
/// of all entries in its directory whose name starts with the file's stem,
/// so sidecar files (`a.jpg` + `a.xml`) invalidate the item too. Unrelated
/// files sharing the prefix are counted as well; this approximation is kept
/// for compatibility with existing indexes.
pub fn live_mtimes(items: &[Item]) -> Vec<Option<i64>> {
    let mut listings: HashMap<PathBuf, Option<Vec<PathBuf>>> = HashMap::new();
    items
        .iter()
        .map(|item| {
            let path = item.path();
            let metadata = fs::metadata(path).ok()?;
            if item.is_dir() || metadata.is_dir() {
                return Some(mtime_secs(&metadata));
            }

            let parent = path.parent()?;
            let stem = path.file_stem()?.to_string_lossy().into_owned();
            let siblings = listings
                .entry(parent.to_path_buf())
                .or_insert_with(|| sibling_paths(parent))
                .as_ref()?;
            Some(
                siblings
                    .iter()
                    .filter(|p| {
                        p.file_name()
                            .is_some_and(|n| n.to_string_lossy().starts_with(&stem))
                    })
                    .filter_map(|p| fs::metadata(p).ok())
                    .map(|m| mtime_secs(&m))
                    .sum(),
            )
        })
        .collect()
}

fn sibling_paths(dir: &Path) -> Option<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).ok()?;
    Some(entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
}
