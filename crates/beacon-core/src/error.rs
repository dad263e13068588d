//! Error types for index operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::database::DatabaseError;
use crate::media::MediaId;
use crate::parser::ParseError;
use crate::schema::SchemaError;

/// Errors that can occur while indexing or serving queries.
#[derive(Debug, Error)]
pub enum BeaconError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing store failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Metadata extraction failure.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Parser output did not match its type.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Media is not registered.
    #[error("Unknown media: {id}")]
    UnknownMedia { id: MediaId },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl BeaconError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Check if the error means the path vanished.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_error_io() {
        let err = BeaconError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, BeaconError::PermissionDenied { .. }));

        let err = BeaconError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
    }
}
