//! Dispatched change events.

use std::path::PathBuf;

use strum::Display;

/// Kind of change reported for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    CloseWrite,
    Attrib,
    Delete,
    DeleteSelf,
    MovedFrom,
    MovedTo,
    /// The kernel queue overflowed; events were lost.
    Overflow,
}

impl ChangeKind {
    /// Check if the path no longer exists after this change.
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Delete | Self::DeleteSelf | Self::MovedFrom)
    }
}

/// One change on one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Affected path (watched directory joined with the entry name).
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Whether the affected entry is a directory.
    pub is_dir: bool,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            kind,
            is_dir,
        }
    }
}
