//! Backing store interface.
//!
//! The relational engine itself is an external collaborator. Everything in
//! beacon talks to it through the narrow [`Database`] trait; the
//! [`MemoryDatabase`] implementation backs tests and single-host deployments.

mod lock;
mod memory;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::QueryFilter;
use crate::item::{Attributes, Item, ItemId};
use crate::media::{MediaContent, MediaId};

pub use lock::{ReadLease, ReadLock};
pub use memory::MemoryDatabase;

/// Errors raised by the backing store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Update or delete of an item that has no row.
    #[error("Item has no database row: {filename}")]
    NotPersisted { filename: String },

    /// Row does not exist.
    #[error("Unknown item: {id}")]
    UnknownItem { id: ItemId },

    /// Media row already exists.
    #[error("Media already registered: {id}")]
    DuplicateMedia { id: MediaId },

    /// Snapshot could not be read or written.
    #[error("Snapshot I/O at {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be encoded or decoded.
    #[error("Snapshot format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Persisted media row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRow {
    /// Row number.
    pub db_id: u64,
    /// Stable identity.
    pub name: MediaId,
    /// Kind of content.
    pub content: MediaContent,
    /// Free-form media information (label, disc title, ...).
    #[serde(default)]
    pub attributes: Attributes,
}

/// Result of [`Database::query_media`].
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    pub row: MediaRow,
    /// Root directory item of the media, if one was created.
    pub root: Option<Item>,
}

/// Outcome of a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Number of row changes made durable by this commit.
    pub changes: usize,
}

impl CommitSummary {
    /// Check if the commit changed anything.
    pub fn is_empty(&self) -> bool {
        self.changes == 0
    }
}

/// Narrow interface to the index store.
pub trait Database: Send + Sync {
    /// Items matching `filter`, sorted by filename.
    fn query(&self, filter: &QueryFilter) -> Result<Vec<Item>, DatabaseError>;

    /// Create a row and return the item with its id set.
    fn add_object(&self, item: Item) -> Result<Item, DatabaseError>;

    /// Overwrite the row of a persisted item.
    fn update_object(&self, item: &Item) -> Result<(), DatabaseError>;

    /// Delete a row and every row below it.
    fn delete_object(&self, id: &ItemId) -> Result<(), DatabaseError>;

    /// Make pending changes durable.
    fn commit(&self) -> Result<CommitSummary, DatabaseError>;

    /// Look up a media row and its root directory.
    fn query_media(&self, name: &MediaId) -> Result<Option<MediaRecord>, DatabaseError>;

    /// Create a media row.
    fn add_media(
        &self,
        name: &MediaId,
        content: MediaContent,
        attributes: Attributes,
    ) -> Result<MediaRow, DatabaseError>;

    /// Directory the store keeps its files in.
    fn get_directory(&self) -> &Path;

    /// Cooperative read lock shared by readers and writers.
    fn read_lock(&self) -> &ReadLock;
}
