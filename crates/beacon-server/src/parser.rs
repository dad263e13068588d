//! Extension-based parser.

use std::collections::HashMap;
use std::fs;

use beacon_core::{Item, Metadata, ParseError, Parser};

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "avi", "mkv", "wmv", "webm", "flv", "mpg", "mpeg", "ts", "m2ts",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "ogg", "oga", "opus", "wma", "m4a", "aiff",
];

/// Classifies files by extension and records their size.
///
/// Stands in for real metadata extraction: it never reads file contents.
#[derive(Debug, Clone)]
pub struct ExtensionParser {
    kinds: HashMap<&'static str, &'static str>,
}

impl ExtensionParser {
    pub fn new() -> Self {
        let kinds = [
            ("image", IMAGE_EXTENSIONS),
            ("video", VIDEO_EXTENSIONS),
            ("audio", AUDIO_EXTENSIONS),
        ]
        .into_iter()
        .flat_map(|(kind, extensions)| extensions.iter().map(move |ext| (*ext, kind)))
        .collect();
        Self { kinds }
    }
}

impl Default for ExtensionParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for ExtensionParser {
    fn parse(&self, item: &Item) -> Result<Option<Metadata>, ParseError> {
        let path = item.path();
        let Some(kind) = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .and_then(|ext| self.kinds.get(ext.as_str()).copied())
        else {
            return Ok(None);
        };

        let size = fs::metadata(path)
            .map_err(|source| ParseError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let mut metadata = Metadata::new(kind);
        metadata.attributes.insert("size".into(), size.into());
        Ok(Some(metadata))
    }
}
