//! Polled devices.
//!
//! Drives that raise no events (CD-ROMs) are probed on a timer. Probing
//! blocks, so every probe call runs on the blocking pool.

mod cdrom;
mod poller;

use std::path::{Path, PathBuf};

use beacon_core::{Attributes, MediaContent, MediaId};
use thiserror::Error;

pub use cdrom::CdromDrive;
pub use poller::{DeviceChange, DeviceMonitor, DevicePoller};

/// Errors raised while probing a drive.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{request} failed on {path}: {source}")]
    Ioctl {
        path: PathBuf,
        request: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("No disc in {path}")]
    NoDisc { path: PathBuf },

    #[error("Unreadable table of contents on {path}")]
    BadToc { path: PathBuf },

    #[error("Drive probing is not supported on this platform")]
    Unsupported,

    #[error("Probe task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Tray state of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DriveStatus {
    NoDisc,
    DiscPresent,
}

/// Result of a full disc scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscScan {
    pub content: MediaContent,
    /// Media information stored with the media row.
    pub attributes: Attributes,
    /// Attributes of each track, in track order.
    pub tracks: Vec<Attributes>,
}

/// Blocking access to one drive.
pub trait DriveProbe: Send + Sync + 'static {
    /// Device path.
    fn device(&self) -> &Path;

    /// Current tray state.
    fn status(&self) -> Result<DriveStatus, DeviceError>;

    /// Stable identity of the inserted disc.
    fn identify(&self) -> Result<MediaId, DeviceError>;

    /// Read the disc structure. May take seconds.
    fn scan(&self) -> Result<DiscScan, DeviceError>;
}
