//! Server to client notifications.

use tokio::sync::broadcast;

use crate::error::BeaconError;
use crate::filter::QueryFilter;
use crate::item::Item;

/// Push events observed by monitoring clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// A commit changed the index.
    Changed,
    /// A crawl cycle finished without changing anything.
    Checked,
    /// Crawl progress through the mtime-check queue.
    Progress { pos: usize, total: usize },
}

/// Read side of the server as seen by clients.
pub trait QueryBackend: Send + Sync {
    /// Run a query and return items sorted by filename.
    fn query(&self, filter: &QueryFilter) -> Result<Vec<Item>, BeaconError>;

    /// Subscribe to push notifications.
    fn subscribe(&self) -> broadcast::Receiver<ServerEvent>;
}
