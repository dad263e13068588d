//! Registry of known media.

use std::path::Path;
use std::sync::Arc;

use beacon_core::{BeaconError, Media, MediaId};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

use super::mountpoint::Mountpoint;
use crate::crawler::CrawlContext;

/// Process-wide map of media id to mountpoint.
///
/// Created at service start and connected once the store exists; mountpoints
/// cannot be added before [`MediaList::connect`].
#[derive(Debug, Default)]
pub struct MediaList {
    context: RwLock<Option<CrawlContext>>,
    mounts: DashMap<MediaId, Arc<Mountpoint>>,
    /// Serializes concurrent adds of one id.
    adding: DashMap<MediaId, Arc<Mutex<()>>>,
}

impl MediaList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the context new mountpoints crawl with.
    pub fn connect(&self, ctx: CrawlContext) {
        *self.context.write() = Some(ctx);
    }

    pub fn is_connected(&self) -> bool {
        self.context.read().is_some()
    }

    /// Register `media` under `id` and load it.
    ///
    /// Adding an id that is already registered returns the existing
    /// mountpoint.
    pub async fn add(&self, media: Media, id: MediaId) -> Result<Arc<Mountpoint>, BeaconError> {
        if let Some(existing) = self.get(&id) {
            return Ok(existing);
        }

        let gate = Arc::clone(self.adding.entry(id.clone()).or_default().value());
        let added = {
            let _adding = gate.lock().await;
            self.add_locked(media, &id).await
        };
        // Last one out drops the gate; waiters still hold a clone.
        self.adding
            .remove_if(&id, |_, entry| Arc::strong_count(entry) <= 2);
        added
    }

    async fn add_locked(&self, media: Media, id: &MediaId) -> Result<Arc<Mountpoint>, BeaconError> {
        if let Some(existing) = self.get(id) {
            return Ok(existing);
        }
        let ctx = self
            .context
            .read()
            .clone()
            .ok_or_else(|| BeaconError::Other {
                message: "media list is not connected".to_string(),
            })?;

        let mountpoint = Arc::new(Mountpoint::new(media, ctx));
        mountpoint.load(id.clone()).await?;
        info!(media = %id, mountpoint = %mountpoint.mountpoint().display(), "media added");

        self.mounts.insert(id.clone(), Arc::clone(&mountpoint));
        Ok(mountpoint)
    }

    /// Unregister a media and stop its crawler. Removing an unknown id is a
    /// no-op.
    pub async fn remove(&self, id: &MediaId) -> Option<Arc<Mountpoint>> {
        let (_, mountpoint) = self.mounts.remove(id)?;
        mountpoint.stop().await;
        info!(media = %id, "media removed");
        Some(mountpoint)
    }

    pub fn get(&self, id: &MediaId) -> Option<Arc<Mountpoint>> {
        self.mounts.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Mountpoint bound to a block device.
    pub fn by_device(&self, device: &Path) -> Option<Arc<Mountpoint>> {
        self.mounts
            .iter()
            .find(|entry| entry.value().device().as_deref() == Some(device))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Most specific mountpoint that contains `dirname`.
    pub fn mountpoint(&self, dirname: &Path) -> Option<Arc<Mountpoint>> {
        self.mounts
            .iter()
            .filter(|entry| dirname.starts_with(entry.value().mountpoint()))
            .max_by_key(|entry| entry.value().mountpoint().components().count())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every registered media.
    pub fn list(&self) -> Vec<Media> {
        let mut media: Vec<Media> = self.mounts.iter().map(|e| e.value().media()).collect();
        media.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
        media
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Stop every crawler and forget all media.
    pub async fn shutdown(&self) {
        let all: Vec<Arc<Mountpoint>> = self.mounts.iter().map(|e| Arc::clone(e.value())).collect();
        self.mounts.clear();
        for mountpoint in all {
            mountpoint.stop().await;
        }
    }
}
