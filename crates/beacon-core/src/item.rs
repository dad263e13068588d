//! Indexed item types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::media::MediaId;

/// Type tag of an indexed item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    /// Directory.
    Dir,
    /// Plain file no parser recognized.
    File,
    /// Media-specific type produced by a parser (`image`, `video`, ...).
    Media(CompactString),
}

impl ItemType {
    /// Create a media-specific type tag.
    pub fn media(name: impl Into<CompactString>) -> Self {
        let name = name.into();
        match name.as_str() {
            "dir" => Self::Dir,
            "file" => Self::File,
            _ => Self::Media(name),
        }
    }

    /// Get the type tag as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Dir => "dir",
            Self::File => "file",
            Self::Media(name) => name.as_str(),
        }
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ItemType {
    fn from(value: String) -> Self {
        Self::media(value)
    }
}

impl From<&str> for ItemType {
    fn from(value: &str) -> Self {
        Self::media(value)
    }
}

impl From<ItemType> for String {
    fn from(value: ItemType) -> Self {
        value.as_str().to_string()
    }
}

/// Database identity of a persisted item: type tag plus row number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId {
    /// Type tag of the row.
    pub kind: ItemType,
    /// Row number, unique across all types.
    pub id: u64,
}

impl ItemId {
    /// Create a new item id.
    pub fn new(kind: ItemType, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A single attribute value produced by a parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Free-form parser output keyed by attribute name.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Normalize a directory path so that it ends with `/`.
pub fn dir_filename(path: impl AsRef<Path>) -> String {
    let mut name = path.as_ref().to_string_lossy().into_owned();
    if !name.ends_with('/') {
        name.push('/');
    }
    name
}

/// One indexed file or directory.
///
/// `mtime` holds the value observed at the last full re-index. For files it
/// is the sum of the mtimes of every sibling sharing the file's stem, so that
/// sidecar metadata files invalidate the item as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Database identity, `None` until persisted.
    pub id: Option<ItemId>,

    /// Parent directory identity (back-reference only).
    pub parent: Option<ItemId>,

    /// Absolute path. Directories end with `/`.
    pub filename: String,

    /// Stored modification time in seconds.
    pub mtime: i64,

    /// Type tag.
    pub kind: ItemType,

    /// Media the item lives on.
    pub media: Option<MediaId>,

    /// Parser output.
    #[serde(default)]
    pub attributes: Attributes,
}

impl Item {
    /// Create an unsaved directory item.
    pub fn new_dir(path: impl AsRef<Path>, parent: Option<ItemId>) -> Self {
        Self {
            id: None,
            parent,
            filename: dir_filename(path),
            mtime: 0,
            kind: ItemType::Dir,
            media: None,
            attributes: Attributes::new(),
        }
    }

    /// Create an unsaved file item.
    pub fn new_file(path: impl AsRef<Path>, parent: Option<ItemId>) -> Self {
        Self {
            id: None,
            parent,
            filename: path.as_ref().to_string_lossy().into_owned(),
            mtime: 0,
            kind: ItemType::File,
            media: None,
            attributes: Attributes::new(),
        }
    }

    /// Attach the item to a media.
    pub fn with_media(mut self, media: MediaId) -> Self {
        self.media = Some(media);
        self
    }

    /// Check if this item is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Check if this item has a database row.
    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Filesystem path of the item.
    pub fn path(&self) -> &Path {
        Path::new(self.filename.trim_end_matches('/'))
    }

    /// Base name without any trailing slash.
    pub fn name(&self) -> &str {
        let trimmed = self.filename.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// URL used to order and identify query results.
    pub fn url(&self) -> String {
        format!("file://{}", self.filename)
    }

    /// Look up a parser attribute.
    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }
}
