//! Service registry and request dispatch.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use beacon_core::{
    BeaconConfig, BeaconError, Database, Item, Media, MediaContent, MediaId, MediaRow, Parser,
    QueryBackend, QueryFilter, SchemaRegistry, ServerEvent, dir_filename,
};
use beacon_watch::INotify;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::EVENT_CHANNEL_SIZE;
use crate::channels::ChannelCache;
use crate::controller::Controller;
use crate::crawler::{CrawlContext, CrawlScheduler};
use crate::device::{DeviceChange, DeviceMonitor, DevicePoller, DriveProbe};
use crate::hardware::{CommandHardware, CommandThumbnailer, HardwareClient, Thumbnailer};
use crate::media::{MediaIdentity, MediaList, Mountpoint};

/// Methods a client can call on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ServerRequest {
    /// Items matching a filter.
    Query { filter: QueryFilter },
    /// A device or plain directory became available at `mountpoint`.
    DeviceAdd {
        device: Option<PathBuf>,
        mountpoint: PathBuf,
    },
    /// Forget a media and stop its crawler.
    DeviceRemove { id: MediaId },
    /// The media in a drive changed; `None` means the drive is empty.
    DeviceChanged {
        device: PathBuf,
        media: Option<MediaId>,
    },
    DeviceMount { device: PathBuf },
    DeviceEject { id: MediaId },
    MediaInformation { id: MediaId },
    /// Crawl a directory inside a known media and keep it current.
    Monitor { directory: PathBuf },
}

/// Replies to [`ServerRequest`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum ServerResponse {
    Items(Vec<Item>),
    Media(Option<Media>),
    MediaInfo(Option<MediaRow>),
    Done,
}

/// Owns the controller, the media registry and every device monitor.
pub struct BeaconService {
    config: BeaconConfig,
    controller: Arc<Controller>,
    media: MediaList,
    inotify: Option<Arc<INotify>>,
    channels: Mutex<ChannelCache>,
    devices: Mutex<Vec<DeviceMonitor>>,
    this: Weak<Self>,
}

impl BeaconService {
    /// Start a service with the system `mount`/`eject` programs as hardware
    /// client. Must be called inside a tokio runtime.
    pub fn new(
        config: BeaconConfig,
        db: Arc<dyn Database>,
        parser: Arc<dyn Parser>,
    ) -> Arc<Self> {
        Self::with_hardware(config, db, parser, Some(Arc::new(CommandHardware::new())))
    }

    /// Start a service with an explicit hardware client. The thumbnailer is
    /// the configured program, if any.
    pub fn with_hardware(
        config: BeaconConfig,
        db: Arc<dyn Database>,
        parser: Arc<dyn Parser>,
        hardware: Option<Arc<dyn HardwareClient>>,
    ) -> Arc<Self> {
        let thumbnailer = config
            .thumbnailer
            .as_ref()
            .map(|program| Arc::new(CommandThumbnailer::new(program)) as Arc<dyn Thumbnailer>);
        Self::with_collaborators(config, db, parser, hardware, thumbnailer)
    }

    /// Start a service with every collaborator given explicitly.
    pub fn with_collaborators(
        config: BeaconConfig,
        db: Arc<dyn Database>,
        parser: Arc<dyn Parser>,
        hardware: Option<Arc<dyn HardwareClient>>,
        thumbnailer: Option<Arc<dyn Thumbnailer>>,
    ) -> Arc<Self> {
        let controller = Controller::with_collaborators(
            db,
            parser,
            SchemaRegistry::with_defaults(),
            hardware,
            config.commit_delay,
        );

        let inotify = if config.watch {
            match INotify::new() {
                Ok(inotify) => Some(Arc::new(inotify)),
                Err(e) => {
                    warn!(error = %e, "kernel watches unavailable, falling back to periodic re-scans");
                    None
                }
            }
        } else {
            debug!("kernel watches disabled");
            None
        };

        let mut ctx = CrawlContext::new(Arc::clone(&controller), config.clone())
            .with_inotify(inotify.clone())
            .with_scheduler(CrawlScheduler::from_config(&config));
        if let Some(thumbnailer) = thumbnailer {
            ctx = ctx.with_thumbnailer(thumbnailer);
        }
        let media = MediaList::new();
        media.connect(ctx);

        let channels = match &config.channels_file {
            Some(path) => ChannelCache::load(path),
            None => ChannelCache::new(config.database_dir.join("channels.xml")),
        };

        info!(
            directory = %config.database_dir.display(),
            watching = inotify.is_some(),
            "beacon service started"
        );
        Arc::new_cyclic(|this| Self {
            config,
            controller,
            media,
            inotify,
            channels: Mutex::new(channels),
            devices: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn media(&self) -> &MediaList {
        &self.media
    }

    /// Whether crawlers get kernel change events.
    pub fn is_watching(&self) -> bool {
        self.inotify.is_some()
    }

    pub fn channels(&self) -> &Mutex<ChannelCache> {
        &self.channels
    }

    /// Server events for one client.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.controller.subscribe()
    }

    /// Register a plain directory as a media and crawl it.
    pub async fn add_directory(&self, path: &Path) -> Result<Arc<Mountpoint>, BeaconError> {
        self.add_media(None, path).await
    }

    async fn add_media(
        &self,
        device: Option<PathBuf>,
        mountpoint: &Path,
    ) -> Result<Arc<Mountpoint>, BeaconError> {
        let mountpoint = tokio::fs::canonicalize(mountpoint)
            .await
            .map_err(|e| BeaconError::io(mountpoint, e))?;
        let id = match &device {
            Some(device) => {
                let device = device.clone();
                tokio::task::spawn_blocking(move || MediaIdentity::resolve(&device).media_id())
                    .await
                    .map_err(|e| BeaconError::Other {
                        message: format!("identity task failed: {e}"),
                    })?
            }
            None => MediaId::new(mountpoint.to_string_lossy().into_owned()),
        };

        let mp = self.media.add(Media::new(device, mountpoint), id).await?;
        if !mp.monitor_root()? {
            debug!(media = ?mp.id(), "no root to crawl");
        }
        Ok(mp)
    }

    /// Follow a drive's media focus.
    async fn device_changed(
        &self,
        device: PathBuf,
        media: Option<MediaId>,
    ) -> Result<Option<Media>, BeaconError> {
        let current = self.media.by_device(&device);
        if let Some(mp) = &current {
            if mp.id().is_some() && mp.id() == media {
                return Ok(Some(mp.media()));
            }
            if let Some(old) = mp.id() {
                self.media.remove(&old).await;
            }
        }

        let Some(id) = media else {
            info!(device = %device.display(), "drive emptied");
            return Ok(None);
        };

        // A disc with an overlay root is browsable without a mount.
        let mounted = current
            .as_ref()
            .filter(|mp| mp.media().content == MediaContent::File);
        let mountpoint = match (mounted, self.controller.media_record(&id)?) {
            (Some(mp), _) => mp.mountpoint(),
            (None, Some(record)) => match record.root {
                Some(root) => root.path().to_path_buf(),
                None => {
                    debug!(media = %id, "media has no root yet, waiting for mount");
                    return Ok(None);
                }
            },
            (None, None) => {
                debug!(media = %id, "unknown media, waiting for mount");
                return Ok(None);
            }
        };

        let mp = self
            .media
            .add(Media::new(Some(device), mountpoint), id)
            .await?;
        if mp.media().content == MediaContent::File {
            mp.monitor_root()?;
        }
        Ok(Some(mp.media()))
    }

    async fn monitor(&self, directory: &Path) -> Result<(), BeaconError> {
        let mp = self.media.mountpoint(directory).ok_or_else(|| BeaconError::Other {
            message: format!("{} is not on a known media", directory.display()),
        })?;

        let item = match self.controller.lookup(&dir_filename(directory))? {
            Some(item) => item,
            None => {
                let parent = match directory.parent() {
                    Some(parent) => self
                        .controller
                        .lookup(&dir_filename(parent))?
                        .and_then(|p| p.id),
                    None => None,
                };
                let item = Item::new_dir(directory, parent);
                match mp.id() {
                    Some(id) => item.with_media(id),
                    None => item,
                }
            }
        };
        mp.monitor(item);
        Ok(())
    }

    /// Dispatch one request.
    pub async fn handle(&self, request: ServerRequest) -> Result<ServerResponse, BeaconError> {
        debug!(?request, "request");
        match request {
            ServerRequest::Query { filter } => Ok(ServerResponse::Items(self.controller.query(&filter)?)),
            ServerRequest::DeviceAdd { device, mountpoint } => {
                let mp = self.add_media(device, &mountpoint).await?;
                Ok(ServerResponse::Media(Some(mp.media())))
            }
            ServerRequest::DeviceRemove { id } => {
                let removed = self.media.remove(&id).await;
                Ok(ServerResponse::Media(removed.map(|mp| mp.media())))
            }
            ServerRequest::DeviceChanged { device, media } => {
                Ok(ServerResponse::Media(self.device_changed(device, media).await?))
            }
            ServerRequest::DeviceMount { device } => {
                self.controller.mount(&device).await?;
                Ok(ServerResponse::Done)
            }
            ServerRequest::DeviceEject { id } => {
                let mp = self
                    .media
                    .get(&id)
                    .ok_or(BeaconError::UnknownMedia { id })?;
                self.controller.eject(&mp.media()).await?;
                Ok(ServerResponse::Done)
            }
            ServerRequest::MediaInformation { id } => {
                Ok(ServerResponse::MediaInfo(self.controller.media_information(&id)?))
            }
            ServerRequest::Monitor { directory } => {
                self.monitor(&directory).await?;
                Ok(ServerResponse::Done)
            }
        }
    }

    /// Poll a drive and follow its media focus until shutdown.
    pub fn spawn_device_poller<P: DriveProbe>(&self, probe: P) {
        let (tx, mut rx) = mpsc::channel::<DeviceChange>(EVENT_CHANNEL_SIZE);
        let poller = DevicePoller::new(probe, Arc::clone(&self.controller), self.config.overlay_root());
        info!(device = %poller.device().display(), "polling drive");
        let monitor = poller.start(self.config.device_poll_interval, tx);

        let this = self.this.clone();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                let Some(service) = this.upgrade() else { break };
                let request = ServerRequest::DeviceChanged {
                    device: change.device,
                    media: change.media,
                };
                if let Err(e) = service.handle(request).await {
                    warn!(error = %e, "device change not applied");
                }
            }
        });

        self.devices.lock().push(monitor);
    }

    /// Stop every poller and crawler, then flush pending writes.
    pub async fn shutdown(&self) {
        let devices: Vec<DeviceMonitor> = self.devices.lock().drain(..).collect();
        for monitor in devices {
            monitor.stop().await;
        }
        self.media.shutdown().await;
        if let Err(e) = self.controller.flush().await {
            warn!(error = %e, "final commit failed");
        }
        info!("beacon service stopped");
    }
}

impl std::fmt::Debug for BeaconService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconService")
            .field("controller", &self.controller)
            .field("media", &self.media.len())
            .field("watching", &self.inotify.is_some())
            .finish()
    }
}
