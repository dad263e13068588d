//! Kernel change notification.

use std::path::Path;

use tokio::sync::broadcast;

use crate::error::WatchError;
use crate::event::WatchEvent;

#[cfg(target_os = "linux")]
pub use linux::INotify;

#[cfg(not(target_os = "linux"))]
pub use unsupported::INotify;

#[cfg(target_os = "linux")]
mod linux {
    use std::sync::Arc;

    use ::inotify::{EventMask, Inotify, WatchDescriptor, WatchMask, Watches};
    use parking_lot::Mutex;
    use tokio::task::JoinHandle;
    use tokio_stream::StreamExt;
    use tracing::{debug, warn};

    use super::*;
    use crate::event::ChangeKind;
    use crate::table::WatchTable;

    const EVENT_BUFFER_SIZE: usize = 4096;

    /// Per-path change notification backed by inotify.
    ///
    /// Raw records are read by a background task, resolved to their watch and
    /// dispatched through a [`WatchTable`].
    pub struct INotify {
        watches: Mutex<Watches>,
        table: Arc<Mutex<WatchTable<WatchDescriptor>>>,
        reader: JoinHandle<()>,
    }

    impl INotify {
        /// Mask used by [`INotify::watch`].
        pub const DEFAULT_MASK: WatchMask = WatchMask::CREATE
            .union(WatchMask::MODIFY)
            .union(WatchMask::CLOSE_WRITE)
            .union(WatchMask::DELETE)
            .union(WatchMask::DELETE_SELF)
            .union(WatchMask::MOVED_FROM)
            .union(WatchMask::MOVED_TO);

        /// Open the kernel facility. Must be called inside a tokio runtime.
        pub fn new() -> Result<Self, WatchError> {
            let inotify = Inotify::init().map_err(WatchError::Unavailable)?;
            let watches = inotify.watches();
            let stream = inotify
                .into_event_stream([0u8; EVENT_BUFFER_SIZE])
                .map_err(WatchError::Unavailable)?;

            let table = Arc::new(Mutex::new(WatchTable::new()));
            let reader = tokio::spawn({
                let table = Arc::clone(&table);
                async move {
                    let mut stream = Box::pin(stream);
                    while let Some(record) = stream.next().await {
                        let record = match record {
                            Ok(record) => record,
                            Err(e) => {
                                warn!(error = %e, "inotify read failed, stopping watcher");
                                break;
                            }
                        };
                        let Some(kind) = change_kind(record.mask) else {
                            if record.mask.contains(EventMask::IGNORED) {
                                table.lock().remove_key(&record.wd);
                            }
                            continue;
                        };
                        table.lock().dispatch(
                            &record.wd,
                            kind,
                            record.name.as_deref(),
                            record.mask.contains(EventMask::ISDIR),
                        );
                    }
                }
            });

            Ok(Self {
                watches: Mutex::new(watches),
                table,
                reader,
            })
        }

        /// Watch `path` with the default mask.
        pub fn watch(&self, path: &Path) -> Result<broadcast::Receiver<WatchEvent>, WatchError> {
            self.watch_with_mask(path, Self::DEFAULT_MASK)
        }

        /// Watch `path` and subscribe to its events.
        pub fn watch_with_mask(
            &self,
            path: &Path,
            mask: WatchMask,
        ) -> Result<broadcast::Receiver<WatchEvent>, WatchError> {
            let wd = self
                .watches
                .lock()
                .add(path, mask)
                .map_err(|source| WatchError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!(path = %path.display(), "watching");
            Ok(self.table.lock().insert(wd, path))
        }

        /// Remove the watch on `path`.
        pub fn ignore(&self, path: &Path) -> Result<(), WatchError> {
            let wd = self
                .table
                .lock()
                .remove_path(path)
                .ok_or_else(|| WatchError::NotWatched {
                    path: path.to_path_buf(),
                })?;
            self.release(wd);
            Ok(())
        }

        /// Remove every watch on `root` or below it.
        pub fn ignore_tree(&self, root: &Path) -> usize {
            let removed = self.table.lock().remove_tree(root);
            let count = removed.len();
            for wd in removed {
                self.release(wd);
            }
            count
        }

        /// Check if `path` is watched.
        pub fn is_watched(&self, path: &Path) -> bool {
            self.table.lock().contains(path)
        }

        /// Subscribe to events of every watch.
        pub fn subscribe_all(&self) -> broadcast::Receiver<WatchEvent> {
            self.table.lock().subscribe_all()
        }

        fn release(&self, wd: WatchDescriptor) {
            // The kernel drops watches of deleted paths on its own.
            if let Err(e) = self.watches.lock().remove(wd) {
                debug!(error = %e, "watch already gone");
            }
        }
    }

    impl Drop for INotify {
        fn drop(&mut self) {
            self.reader.abort();
        }
    }

    impl std::fmt::Debug for INotify {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("INotify")
                .field("watches", &self.table.lock().len())
                .finish()
        }
    }

    fn change_kind(mask: EventMask) -> Option<ChangeKind> {
        let kind = if mask.contains(EventMask::Q_OVERFLOW) {
            ChangeKind::Overflow
        } else if mask.contains(EventMask::CREATE) {
            ChangeKind::Create
        } else if mask.contains(EventMask::MODIFY) {
            ChangeKind::Modify
        } else if mask.contains(EventMask::CLOSE_WRITE) {
            ChangeKind::CloseWrite
        } else if mask.contains(EventMask::ATTRIB) {
            ChangeKind::Attrib
        } else if mask.contains(EventMask::DELETE_SELF) {
            ChangeKind::DeleteSelf
        } else if mask.contains(EventMask::DELETE) {
            ChangeKind::Delete
        } else if mask.contains(EventMask::MOVED_FROM) {
            ChangeKind::MovedFrom
        } else if mask.contains(EventMask::MOVED_TO) {
            ChangeKind::MovedTo
        } else {
            return None;
        };
        Some(kind)
    }

}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;

    /// Placeholder on platforms without inotify; construction always fails
    /// so callers fall back to periodic re-scans.
    #[derive(Debug)]
    pub struct INotify {
        _private: (),
    }

    impl INotify {
        pub fn new() -> Result<Self, WatchError> {
            Err(WatchError::Unavailable(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "inotify is only available on Linux",
            )))
        }

        pub fn watch(&self, path: &Path) -> Result<broadcast::Receiver<WatchEvent>, WatchError> {
            Err(WatchError::NotWatched {
                path: path.to_path_buf(),
            })
        }

        pub fn ignore(&self, path: &Path) -> Result<(), WatchError> {
            Err(WatchError::NotWatched {
                path: path.to_path_buf(),
            })
        }

        pub fn ignore_tree(&self, _root: &Path) -> usize {
            0
        }

        pub fn is_watched(&self, _path: &Path) -> bool {
            false
        }

        pub fn subscribe_all(&self) -> broadcast::Receiver<WatchEvent> {
            broadcast::channel(1).1
        }
    }
}
