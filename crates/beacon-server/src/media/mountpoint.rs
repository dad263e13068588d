//! Binding of a media to a local directory and its crawler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use beacon_core::{Attributes, BeaconError, Item, Media, MediaId, dir_filename};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::crawler::{CrawlContext, Crawler};

/// One storage unit and the crawler that keeps its items current.
///
/// A mountpoint starts unidentified; [`Mountpoint::load`] binds it to a
/// stable media id, registering the media and its root directory on first
/// sight.
#[derive(Debug)]
pub struct Mountpoint {
    media: RwLock<Media>,
    controller: Arc<Controller>,
    crawler: Crawler,
    overlay_root: PathBuf,
    write_authority: bool,
}

impl Mountpoint {
    /// Create a mountpoint and start its crawler. Must be called within a
    /// tokio runtime.
    pub fn new(media: Media, ctx: CrawlContext) -> Self {
        let overlay_root = ctx.config.overlay_root();
        let write_authority = ctx.config.write_authority;
        let controller = Arc::clone(&ctx.controller);
        Self {
            media: RwLock::new(media),
            controller,
            crawler: Crawler::spawn(ctx),
            overlay_root,
            write_authority,
        }
    }

    /// Snapshot of the media state.
    pub fn media(&self) -> Media {
        self.media.read().clone()
    }

    /// Stable id, once loaded.
    pub fn id(&self) -> Option<MediaId> {
        self.media.read().id.clone()
    }

    /// Local directory the media is mounted on.
    pub fn mountpoint(&self) -> PathBuf {
        self.media.read().mountpoint.clone()
    }

    /// Block device, if any.
    pub fn device(&self) -> Option<PathBuf> {
        self.media.read().device.clone()
    }

    pub fn crawler(&self) -> &Crawler {
        &self.crawler
    }

    /// Bind the mountpoint to the media identified by `name`.
    ///
    /// Looks up the media row; if there is none and this process has write
    /// authority, creates the row and an empty root directory. Ensures the
    /// overlay directory exists. Returns `false` without doing anything if
    /// `name` is already the current identity.
    pub async fn load(&self, name: MediaId) -> Result<bool, BeaconError> {
        let (current, content, mountpoint) = {
            let media = self.media.read();
            (media.id.clone(), media.content, media.mountpoint.clone())
        };
        if current.as_ref() == Some(&name) {
            debug!(media = %name, "media already loaded");
            return Ok(false);
        }

        let (row, root) = match self.controller.media_record(&name)? {
            Some(record) => (Some(record.row), record.root),
            None if self.write_authority => {
                info!(media = %name, mountpoint = %mountpoint.display(), "registering new media");
                let row = self.controller.add_media(&name, content, Attributes::new())?;
                (Some(row), None)
            }
            None => {
                warn!(media = %name, "unknown media and no write authority");
                (None, None)
            }
        };

        let root = match root {
            Some(root) => Some(self.rebase(&name, root, &mountpoint).await?),
            None if self.write_authority => {
                let root = Item::new_dir(&mountpoint, None).with_media(name.clone());
                Some(self.controller.insert(root).await?)
            }
            None => None,
        };

        let overlay = self.overlay_root.join(name.file_name());
        tokio::fs::create_dir_all(&overlay)
            .await
            .map_err(|e| BeaconError::io(&overlay, e))?;
        self.controller.commit()?;

        let mut media = self.media.write();
        media.id = Some(name);
        media.overlay = Some(overlay);
        media.root = root.and_then(|r| r.id);
        if let Some(row) = row {
            media.db_id = Some(row.db_id);
            media.content = row.content;
        }
        info!(media = ?media.id, mountpoint = %media.mountpoint.display(), "media loaded");
        Ok(true)
    }

    /// Follow a media remounted on another directory than the one its root
    /// was recorded under.
    async fn rebase(&self, name: &MediaId, root: Item, mountpoint: &Path) -> Result<Item, BeaconError> {
        let target = dir_filename(mountpoint);
        if root.filename == target {
            return Ok(root);
        }
        if !self.write_authority {
            warn!(media = %name, root = %root.filename, "media remounted, no write authority to move it");
            return Ok(root);
        }

        info!(media = %name, from = %root.filename, to = %target, "media remounted");
        self.controller.rebase(name, &root.filename, &target).await?;
        Ok(self
            .controller
            .lookup(&target)?
            .unwrap_or(root))
    }

    /// Root directory item of the loaded media.
    pub fn root(&self) -> Result<Option<Item>, BeaconError> {
        let Some(id) = self.id() else {
            return Ok(None);
        };
        Ok(self
            .controller
            .media_record(&id)?
            .and_then(|record| record.root))
    }

    /// Crawl `directory` and keep it current.
    pub fn monitor(&self, directory: Item) {
        self.crawler.append(directory);
    }

    /// Crawl the whole media. Returns `false` if no root is known yet.
    pub fn monitor_root(&self) -> Result<bool, BeaconError> {
        let Some(root) = self.root()? else {
            return Ok(false);
        };
        self.monitor(root);
        Ok(true)
    }

    /// Stop the crawler after committing its pending work.
    pub async fn stop(&self) {
        self.crawler.stop().await;
    }
}
