//! In-memory store with optional JSON snapshot persistence.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CommitSummary, Database, DatabaseError, MediaRecord, MediaRow, ReadLock};
use crate::filter::{ParentRef, QueryFilter};
use crate::item::{Attributes, Item, ItemId};
use crate::media::{MediaContent, MediaId};

const SNAPSHOT_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    next_id: u64,
    items: BTreeMap<u64, Item>,
    media: BTreeMap<MediaId, MediaRow>,
    #[serde(skip)]
    by_filename: HashMap<String, u64>,
}

impl Tables {
    fn reindex(&mut self) {
        self.by_filename = self
            .items
            .iter()
            .map(|(id, item)| (item.filename.clone(), *id))
            .collect();
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn resolve_parent(&self, parent: &ParentRef) -> Option<u64> {
        match parent {
            ParentRef::Id(id) => Some(id.id),
            ParentRef::Path(path) => self.by_filename.get(path).copied(),
        }
    }

    fn remove_tree(&mut self, root: u64) -> usize {
        let mut stack = vec![root];
        let mut removed = 0;
        while let Some(id) = stack.pop() {
            if let Some(item) = self.items.remove(&id) {
                self.by_filename.remove(&item.filename);
                removed += 1;
            }
            stack.extend(
                self.items
                    .iter()
                    .filter(|(_, child)| child.parent.as_ref().is_some_and(|p| p.id == id))
                    .map(|(child_id, _)| *child_id),
            );
        }
        removed
    }
}

/// Index store kept in memory.
///
/// When opened on a directory, every commit writes `index.json` atomically,
/// so the last committed state survives a crash.
#[derive(Debug)]
pub struct MemoryDatabase {
    directory: PathBuf,
    snapshot: Option<PathBuf>,
    tables: RwLock<Tables>,
    uncommitted: AtomicUsize,
    read_lock: ReadLock,
}

impl MemoryDatabase {
    /// Create a volatile store rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            snapshot: None,
            tables: RwLock::new(Tables::default()),
            uncommitted: AtomicUsize::new(0),
            read_lock: ReadLock::new(),
        }
    }

    /// Open a persistent store in `directory`, loading the last snapshot.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|source| DatabaseError::Snapshot {
            path: directory.clone(),
            source,
        })?;

        let snapshot = directory.join(SNAPSHOT_FILE);
        let mut tables = match std::fs::read(&snapshot) {
            Ok(bytes) => serde_json::from_slice::<Tables>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(source) => {
                return Err(DatabaseError::Snapshot {
                    path: snapshot,
                    source,
                });
            }
        };
        tables.reindex();
        info!(
            path = %snapshot.display(),
            items = tables.items.len(),
            media = tables.media.len(),
            "opened index"
        );

        Ok(Self {
            directory,
            snapshot: Some(snapshot),
            tables: RwLock::new(tables),
            uncommitted: AtomicUsize::new(0),
            read_lock: ReadLock::new(),
        })
    }

    /// Number of item rows.
    pub fn len(&self) -> usize {
        self.tables.read().items.len()
    }

    /// Check if the store has no item rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch(&self, n: usize) {
        self.uncommitted.fetch_add(n, Ordering::AcqRel);
    }

    fn write_snapshot(&self, path: &Path) -> Result<(), DatabaseError> {
        let bytes = serde_json::to_vec(&*self.tables.read())?;
        let snapshot_err = |source| DatabaseError::Snapshot {
            path: path.to_path_buf(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.directory).map_err(snapshot_err)?;
        tmp.write_all(&bytes).map_err(snapshot_err)?;
        tmp.as_file().sync_all().map_err(snapshot_err)?;
        tmp.persist(path).map_err(|e| snapshot_err(e.error))?;
        Ok(())
    }
}

impl Database for MemoryDatabase {
    fn query(&self, filter: &QueryFilter) -> Result<Vec<Item>, DatabaseError> {
        let tables = self.tables.read();
        let parent = match &filter.parent {
            Some(parent) => match tables.resolve_parent(parent) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let mut items: Vec<Item> = tables
            .items
            .values()
            .filter(|item| {
                parent.is_none_or(|pid| item.parent.as_ref().is_some_and(|p| p.id == pid))
            })
            .filter(|item| filter.matches_fields(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(items)
    }

    fn add_object(&self, mut item: Item) -> Result<Item, DatabaseError> {
        let mut tables = self.tables.write();
        let existing = tables.by_filename.get(&item.filename).copied();
        let id = match existing {
            Some(existing) => existing,
            None => tables.allocate(),
        };
        item.id = Some(ItemId::new(item.kind.clone(), id));
        tables.by_filename.insert(item.filename.clone(), id);
        tables.items.insert(id, item.clone());
        drop(tables);

        self.touch(1);
        Ok(item)
    }

    fn update_object(&self, item: &Item) -> Result<(), DatabaseError> {
        let id = item.id.as_ref().ok_or_else(|| DatabaseError::NotPersisted {
            filename: item.filename.clone(),
        })?;

        let mut tables = self.tables.write();
        let Some(stored) = tables.items.get_mut(&id.id) else {
            return Err(DatabaseError::UnknownItem { id: id.clone() });
        };
        let previous = std::mem::replace(stored, item.clone());
        stored.id = Some(ItemId::new(item.kind.clone(), id.id));
        if previous.filename != item.filename {
            tables.by_filename.remove(&previous.filename);
            tables.by_filename.insert(item.filename.clone(), id.id);
        }
        drop(tables);

        self.touch(1);
        Ok(())
    }

    fn delete_object(&self, id: &ItemId) -> Result<(), DatabaseError> {
        let removed = self.tables.write().remove_tree(id.id);
        if removed == 0 {
            return Err(DatabaseError::UnknownItem { id: id.clone() });
        }
        debug!(%id, removed, "deleted rows");
        self.touch(removed);
        Ok(())
    }

    fn commit(&self) -> Result<CommitSummary, DatabaseError> {
        let changes = self.uncommitted.swap(0, Ordering::AcqRel);
        if changes > 0 {
            if let Some(path) = &self.snapshot {
                self.write_snapshot(path)?;
            }
        }
        Ok(CommitSummary { changes })
    }

    fn query_media(&self, name: &MediaId) -> Result<Option<MediaRecord>, DatabaseError> {
        let tables = self.tables.read();
        let Some(row) = tables.media.get(name) else {
            return Ok(None);
        };
        let root = tables
            .items
            .values()
            .find(|item| item.parent.is_none() && item.is_dir() && item.media.as_ref() == Some(name))
            .cloned();
        Ok(Some(MediaRecord {
            row: row.clone(),
            root,
        }))
    }

    fn add_media(
        &self,
        name: &MediaId,
        content: MediaContent,
        attributes: Attributes,
    ) -> Result<MediaRow, DatabaseError> {
        let mut tables = self.tables.write();
        if tables.media.contains_key(name) {
            return Err(DatabaseError::DuplicateMedia { id: name.clone() });
        }
        let row = MediaRow {
            db_id: tables.allocate(),
            name: name.clone(),
            content,
            attributes,
        };
        tables.media.insert(name.clone(), row.clone());
        drop(tables);

        self.touch(1);
        Ok(row)
    }

    fn get_directory(&self) -> &Path {
        &self.directory
    }

    fn read_lock(&self) -> &ReadLock {
        &self.read_lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded() -> (MemoryDatabase, Item) {
        let db = MemoryDatabase::new("/tmp");
        let root = db.add_object(Item::new_dir("/media/disk1", None)).unwrap();
        (db, root)
    }

    #[test]
    fn test_query_by_parent_path() {
        let (db, root) = seeded();
        db.add_object(Item::new_file("/media/disk1/b.jpg", root.id.clone()))
            .unwrap();
        db.add_object(Item::new_file("/media/disk1/a.jpg", root.id.clone()))
            .unwrap();

        let items = db
            .query(&QueryFilter::new().parent_path("/media/disk1"))
            .unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name()).collect();
        assert_eq!(names, ["a.jpg", "b.jpg"]);

        let none = db
            .query(&QueryFilter::new().parent_path("/media/other"))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_add_existing_filename_reuses_row() {
        let (db, root) = seeded();
        let first = db
            .add_object(Item::new_file("/media/disk1/a.jpg", root.id.clone()))
            .unwrap();
        let second = db
            .add_object(Item::new_file("/media/disk1/a.jpg", root.id.clone()))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn test_delete_is_recursive() {
        let (db, root) = seeded();
        let sub = db
            .add_object(Item::new_dir("/media/disk1/sub", root.id.clone()))
            .unwrap();
        db.add_object(Item::new_file("/media/disk1/sub/x.mp3", sub.id.clone()))
            .unwrap();

        db.delete_object(sub.id.as_ref().unwrap()).unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.delete_object(sub.id.as_ref().unwrap()).is_err());
    }

    #[test]
    fn test_update_requires_row() {
        let db = MemoryDatabase::new("/tmp");
        let err = db
            .update_object(&Item::new_file("/a.jpg", None))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotPersisted { .. }));
    }

    #[test]
    fn test_commit_counts_changes() {
        let (db, _) = seeded();
        assert_eq!(db.commit().unwrap().changes, 1);
        assert!(db.commit().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let db = MemoryDatabase::open(temp.path()).unwrap();
            db.add_object(Item::new_dir("/media/disk1", None)).unwrap();
            db.add_media(&MediaId::new("disk1"), MediaContent::File, Attributes::new())
                .unwrap();
            db.commit().unwrap();
            // Uncommitted rows are lost.
            db.add_object(Item::new_dir("/media/disk2", None)).unwrap();
        }

        let db = MemoryDatabase::open(temp.path()).unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.query_media(&MediaId::new("disk1")).unwrap().is_some());
        let next = db.add_object(Item::new_dir("/media/disk3", None)).unwrap();
        assert_eq!(next.id.unwrap().id, 3);
    }
}
