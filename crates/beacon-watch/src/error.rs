//! Error types for change notification.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The kernel facility cannot be opened at all.
    #[error("Kernel change notification unavailable: {0}")]
    Unavailable(#[source] std::io::Error),

    /// A single path could not be watched.
    #[error("Cannot watch {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path has no watch.
    #[error("Path is not watched: {path}")]
    NotWatched { path: PathBuf },
}

impl WatchError {
    /// Check if the error means no watch backend exists.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
