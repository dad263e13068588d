//! Change notification for beacon.
//!
//! This crate turns kernel file-change events into per-path subscriptions and
//! debounces work on files that are still being written.
//!
//! # Overview
//!
//! - [`INotify`] wraps the kernel facility. Construction fails with
//!   [`WatchError::Unavailable`] when it is missing, which callers treat as
//!   the signal to fall back to periodic re-scans.
//! - [`WatchTable`] maps watch descriptors to paths and subscribers and eats
//!   the MODIFY the kernel reports right after a CREATE of the same path.
//! - [`BurstHandler`] tracks growing files and throttles expensive follow-up
//!   work on them.
//!
//! # Example
//!
//! ```rust,no_run
//! use beacon_watch::INotify;
//!
//! # async fn demo() -> Result<(), beacon_watch::WatchError> {
//! let inotify = INotify::new()?;
//! let mut events = inotify.watch("/media/disk1".as_ref())?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?} {}", event.kind, event.path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod burst;
mod error;
mod event;
mod table;
mod watcher;

pub use burst::BurstHandler;
pub use error::WatchError;
pub use event::{ChangeKind, WatchEvent};
pub use watcher::INotify;
pub use table::WatchTable;

/// Capacity of per-watch and catch-all event channels.
pub const WATCH_CHANNEL_SIZE: usize = 256;
