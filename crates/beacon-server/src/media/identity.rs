//! Stable media identity.

use std::fs;
use std::path::{Path, PathBuf};

use beacon_core::MediaId;
use tracing::warn;

const DISK_DIR: &str = "/dev/disk";

/// How a media was identified, most durable first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaIdentity {
    /// Filesystem UUID.
    Uuid(String),
    /// Filesystem label.
    Label(String),
    /// Raw block device path. Changes across re-plugs.
    Device(PathBuf),
}

impl MediaIdentity {
    /// Resolve the identity of a block device.
    pub fn resolve(device: &Path) -> Self {
        Self::resolve_in(Path::new(DISK_DIR), device)
    }

    /// Resolve against a custom `by-uuid` / `by-label` directory tree.
    pub fn resolve_in(disk_dir: &Path, device: &Path) -> Self {
        let target = fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());
        if let Some(uuid) = link_name(&disk_dir.join("by-uuid"), &target) {
            return Self::Uuid(uuid);
        }
        if let Some(label) = link_name(&disk_dir.join("by-label"), &target) {
            return Self::Label(label);
        }
        warn!(device = %device.display(), "no durable id, identifying media by device path");
        Self::Device(device.to_path_buf())
    }

    /// Check if the identity may change across re-plugs.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Device(_))
    }

    pub fn media_id(&self) -> MediaId {
        match self {
            Self::Uuid(uuid) => MediaId::new(uuid.as_str()),
            Self::Label(label) => MediaId::new(format!("label:{label}")),
            Self::Device(path) => MediaId::new(path.to_string_lossy().into_owned()),
        }
    }
}

/// Name of the link in `dir` that resolves to `target`.
fn link_name(dir: &Path, target: &Path) -> Option<String> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .find(|entry| fs::canonicalize(entry.path()).is_ok_and(|p| p == target))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
}
