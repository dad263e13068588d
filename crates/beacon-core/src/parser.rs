//! Metadata extraction interface.

use std::path::PathBuf;

use thiserror::Error;

use crate::item::{Attributes, Item, ItemType};
use crate::schema::SchemaError;

/// Metadata extracted from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Type the item should be stored as.
    pub kind: ItemType,
    /// Extracted attributes.
    pub attributes: Attributes,
}

impl Metadata {
    pub fn new(kind: impl Into<ItemType>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Attributes::new(),
        }
    }
}

/// Errors raised by a parser for a single item.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt media file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Invalid metadata: {0}")]
    Schema(#[from] SchemaError),
}

/// Extracts metadata for one item.
///
/// Implementations may block; callers run them on the blocking pool.
pub trait Parser: Send + Sync {
    /// Parse one item. `Ok(None)` means no parser recognized the file and it
    /// is stored as a plain file.
    fn parse(&self, item: &Item) -> Result<Option<Metadata>, ParseError>;
}
