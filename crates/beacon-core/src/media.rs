//! Storage unit types.

use std::fmt;
use std::path::PathBuf;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::item::ItemId;

/// Stable content key of a media (volume UUID, disc id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaId(pub CompactString);

impl MediaId {
    /// Create a media id.
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The id as a single path component, used to name overlay directories.
    pub fn file_name(&self) -> String {
        self.0.trim_start_matches('/').replace('/', "_")
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Kind of content a media carries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaContent {
    /// Local or removable filesystem.
    #[default]
    File,
    /// Audio compact disc without a filesystem.
    Cdda,
    /// Video DVD.
    Dvd,
}

/// One physical or logical storage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    /// Stable identity; `None` until identified.
    pub id: Option<MediaId>,

    /// Block device path, if any.
    pub device: Option<PathBuf>,

    /// Local directory the media is mounted on.
    pub mountpoint: PathBuf,

    /// Writable side-store for items with no native home.
    pub overlay: Option<PathBuf>,

    /// Kind of content.
    pub content: MediaContent,

    /// Database row number once identified.
    pub db_id: Option<u64>,

    /// Root directory item once identified.
    pub root: Option<ItemId>,
}

impl Media {
    /// Create an unidentified media for a device and mountpoint.
    pub fn new(device: Option<PathBuf>, mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            device,
            mountpoint: mountpoint.into(),
            overlay: None,
            content: MediaContent::File,
            db_id: None,
            root: None,
        }
    }

    /// Check if a stable identity is known.
    pub fn is_identified(&self) -> bool {
        self.id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_media_content_names() {
        assert_eq!(MediaContent::Cdda.to_string(), "cdda");
        assert_eq!(MediaContent::from_str("file").unwrap(), MediaContent::File);
    }

    #[test]
    fn test_file_name_has_no_separators() {
        assert_eq!(MediaId::new("/media/disk1").file_name(), "media_disk1");
        assert_eq!(MediaId::new("cdda:06019002").file_name(), "cdda:06019002");
    }

    #[test]
    fn test_new_media_is_unidentified() {
        let media = Media::new(Some(PathBuf::from("/dev/sdb1")), "/media/usb");
        assert!(!media.is_identified());
        assert_eq!(media.content, MediaContent::File);
    }
}
