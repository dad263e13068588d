//! Query filters.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::item::{AttrValue, Attributes, Item, ItemId, ItemType, dir_filename};
use crate::media::MediaId;

/// Reference to a parent directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentRef {
    /// Parent by database identity.
    Id(ItemId),
    /// Parent by directory path (normalized to end with `/`).
    Path(String),
}

/// Conjunction of equality constraints on items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default)]
    pub parent: Option<ParentRef>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub kind: Option<ItemType>,
    #[serde(default)]
    pub media: Option<MediaId>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl QueryFilter {
    /// Create a filter matching every item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to children of a parent item.
    pub fn parent(mut self, id: ItemId) -> Self {
        self.parent = Some(ParentRef::Id(id));
        self
    }

    /// Restrict to children of a directory path.
    pub fn parent_path(mut self, path: impl AsRef<Path>) -> Self {
        self.parent = Some(ParentRef::Path(dir_filename(path)));
        self
    }

    /// Restrict to one filename.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Restrict to one type.
    pub fn kind(mut self, kind: impl Into<ItemType>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Restrict to one media.
    pub fn media(mut self, media: MediaId) -> Self {
        self.media = Some(media);
        self
    }

    /// Require an attribute value.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Check every constraint except `parent`, which needs the backing store
    /// to resolve.
    pub fn matches_fields(&self, item: &Item) -> bool {
        if self.filename.as_ref().is_some_and(|f| *f != item.filename) {
            return false;
        }
        if self.kind.as_ref().is_some_and(|k| *k != item.kind) {
            return false;
        }
        if self.media.is_some() && self.media != item.media {
            return false;
        }
        self.attributes
            .iter()
            .all(|(name, value)| item.attributes.get(name) == Some(value))
    }
}
