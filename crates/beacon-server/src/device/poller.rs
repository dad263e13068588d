//! Timer-driven media detection for one drive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Attributes, BeaconError, Item, ItemType, MediaContent, MediaId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DeviceError, DiscScan, DriveProbe, DriveStatus};
use crate::controller::Controller;

/// Media focus change on a drive. `media` is `None` when the drive is empty
/// or its disc could not be identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChange {
    pub device: PathBuf,
    pub media: Option<MediaId>,
}

/// Polls one drive and registers discs the index has not seen yet.
///
/// Probe calls block and always run on the blocking pool. A poll whose
/// status matches the previous one does nothing else.
pub struct DevicePoller<P: DriveProbe> {
    probe: Arc<P>,
    controller: Arc<Controller>,
    overlay_root: PathBuf,
    last_status: Option<DriveStatus>,
    cancel: CancellationToken,
}

impl<P: DriveProbe> DevicePoller<P> {
    pub fn new(probe: P, controller: Arc<Controller>, overlay_root: impl Into<PathBuf>) -> Self {
        Self {
            probe: Arc::new(probe),
            controller,
            overlay_root: overlay_root.into(),
            last_status: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn device(&self) -> &Path {
        self.probe.device()
    }

    /// Check the drive once. Returns a change only when the tray state moved
    /// since the previous poll.
    pub async fn poll_once(&mut self) -> Option<DeviceChange> {
        let status = match self.probe(|p| p.status()).await {
            Ok(status) => status,
            Err(e) => {
                debug!(device = %self.device().display(), error = %e, "drive status unavailable");
                return None;
            }
        };
        if self.last_status == Some(status) {
            return None;
        }
        self.last_status = Some(status);

        let media = match status {
            DriveStatus::NoDisc => {
                info!(device = %self.device().display(), "disc removed");
                None
            }
            DriveStatus::DiscPresent => self.resolve().await,
        };
        if self.cancel.is_cancelled() {
            return None;
        }
        Some(DeviceChange {
            device: self.device().to_path_buf(),
            media,
        })
    }

    /// Identify the inserted disc, registering it on first sight.
    ///
    /// Any failure reads as an empty drive for this round; the next poll
    /// tries again.
    async fn resolve(&mut self) -> Option<MediaId> {
        let resolved = self.try_resolve().await;
        if resolved.is_none() {
            self.last_status = Some(DriveStatus::NoDisc);
        }
        resolved
    }

    async fn try_resolve(&self) -> Option<MediaId> {
        let id = match self.probe(|p| p.identify()).await {
            Ok(id) => id,
            Err(e) => {
                warn!(device = %self.device().display(), error = %e, "cannot identify disc, treating drive as empty");
                return None;
            }
        };

        match self.controller.media_record(&id) {
            Ok(Some(_)) => {
                debug!(device = %self.device().display(), media = %id, "known disc inserted");
                return Some(id);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(media = %id, error = %e, "media lookup failed");
                return None;
            }
        }

        let scan = match self.probe(|p| p.scan()).await {
            Ok(scan) => scan,
            Err(e) => {
                warn!(device = %self.device().display(), media = %id, error = %e, "disc scan failed");
                return None;
            }
        };
        if self.cancel.is_cancelled() {
            return None;
        }

        match self.register(&id, scan).await {
            Ok(()) => Some(id),
            Err(e) => {
                warn!(media = %id, error = %e, "cannot register disc");
                None
            }
        }
    }

    /// Store a new media. Discs with a track structure get a root directory
    /// in the overlay and one item per track.
    ///
    /// The media row is written last, so a disc is either fully registered
    /// or not known at all.
    async fn register(&self, id: &MediaId, scan: DiscScan) -> Result<(), BeaconError> {
        let track_count = scan.tracks.len();
        let has_tracks = scan.content == MediaContent::Cdda || track_count > 0;
        let kind = ItemType::media("track_cdda");
        for attributes in &scan.tracks {
            self.controller.schema().validate(&kind, attributes)?;
        }

        let root = if has_tracks {
            let overlay = self.overlay_root.join(id.file_name());
            tokio::fs::create_dir_all(&overlay)
                .await
                .map_err(|e| BeaconError::io(&overlay, e))?;

            let root = self
                .controller
                .insert(Item::new_dir(&overlay, None).with_media(id.clone()))
                .await?;
            if let Err(e) = self.insert_tracks(id, &root, &overlay, scan.tracks).await {
                self.controller.delete(&root)?;
                return Err(e);
            }
            Some(root)
        } else {
            None
        };

        if let Err(e) = self.controller.add_media(id, scan.content, scan.attributes) {
            if let Some(root) = &root {
                self.controller.delete(root)?;
            }
            return Err(e);
        }
        self.controller.commit()?;
        info!(media = %id, tracks = track_count, "registered new disc");
        Ok(())
    }

    async fn insert_tracks(
        &self,
        id: &MediaId,
        root: &Item,
        overlay: &Path,
        tracks: Vec<Attributes>,
    ) -> Result<(), BeaconError> {
        let kind = ItemType::media("track_cdda");
        for (n, attributes) in tracks.into_iter().enumerate() {
            let mut track = Item::new_file(overlay.join(format!("track{:02}", n + 1)), root.id.clone())
                .with_media(id.clone());
            track.kind = kind.clone();
            track.attributes = attributes;
            self.controller.insert(track).await?;
        }
        Ok(())
    }

    async fn probe<T, F>(&self, op: F) -> Result<T, DeviceError>
    where
        T: Send + 'static,
        F: FnOnce(&P) -> Result<T, DeviceError> + Send + 'static,
    {
        let probe = Arc::clone(&self.probe);
        tokio::task::spawn_blocking(move || op(&*probe)).await?
    }

    /// Poll every `interval` on a background task, sending each change to
    /// `changes`. The task ends when the monitor is stopped or dropped, or
    /// when the receiver goes away.
    pub fn start(mut self, interval: Duration, changes: mpsc::Sender<DeviceChange>) -> DeviceMonitor {
        let cancel = self.cancel.clone();
        let device = self.device().to_path_buf();
        let task = tokio::spawn(async move {
            let cancel = self.cancel.clone();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(change) = self.poll_once().await else { continue };
                        if changes.send(change).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(device = %self.device().display(), "device polling stopped");
        });
        DeviceMonitor {
            device,
            cancel,
            task: Some(task),
        }
    }
}

impl<P: DriveProbe> std::fmt::Debug for DevicePoller<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePoller")
            .field("device", &self.device())
            .field("last_status", &self.last_status)
            .finish()
    }
}

/// Handle to a running [`DevicePoller`].
#[derive(Debug)]
pub struct DeviceMonitor {
    device: PathBuf,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DeviceMonitor {
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Stop polling. A scan in flight finishes but its result is dropped.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use beacon_core::{Attributes, Database, MemoryDatabase, QueryFilter};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    use crate::parser::ExtensionParser;

    struct FakeDrive {
        device: PathBuf,
        status: Arc<Mutex<DriveStatus>>,
        id: Arc<Mutex<Option<MediaId>>>,
        scans: Arc<AtomicUsize>,
        broken: Arc<AtomicBool>,
        invalid: Arc<AtomicBool>,
    }

    impl DriveProbe for FakeDrive {
        fn device(&self) -> &Path {
            &self.device
        }

        fn status(&self) -> Result<DriveStatus, DeviceError> {
            Ok(*self.status.lock())
        }

        fn identify(&self) -> Result<MediaId, DeviceError> {
            self.id.lock().clone().ok_or_else(|| DeviceError::BadToc {
                path: self.device.clone(),
            })
        }

        fn scan(&self) -> Result<DiscScan, DeviceError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                return Err(DeviceError::BadToc {
                    path: self.device.clone(),
                });
            }
            let invalid = self.invalid.load(Ordering::SeqCst);
            let tracks = (1..=3)
                .map(|n| {
                    let mut attributes = Attributes::new();
                    attributes.insert("trackno".into(), i64::from(n).into());
                    attributes.insert("length".into(), 180.0_f64.into());
                    if invalid && n == 3 {
                        attributes.insert("bogus".into(), true.into());
                    }
                    attributes
                })
                .collect();
            Ok(DiscScan {
                content: MediaContent::Cdda,
                attributes: Attributes::new(),
                tracks,
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        db: Arc<MemoryDatabase>,
        status: Arc<Mutex<DriveStatus>>,
        id: Arc<Mutex<Option<MediaId>>>,
        scans: Arc<AtomicUsize>,
        broken: Arc<AtomicBool>,
        invalid: Arc<AtomicBool>,
        poller: DevicePoller<FakeDrive>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(MemoryDatabase::new(dir.path()));
        let controller = Controller::new(db.clone(), Arc::new(ExtensionParser::new()), Duration::from_millis(10));
        let status = Arc::new(Mutex::new(DriveStatus::NoDisc));
        let id = Arc::new(Mutex::new(None));
        let scans = Arc::new(AtomicUsize::new(0));
        let broken = Arc::new(AtomicBool::new(false));
        let invalid = Arc::new(AtomicBool::new(false));
        let drive = FakeDrive {
            device: PathBuf::from("/dev/cdrom"),
            status: status.clone(),
            id: id.clone(),
            scans: scans.clone(),
            broken: broken.clone(),
            invalid: invalid.clone(),
        };
        let poller = DevicePoller::new(drive, controller, dir.path().join("overlay"));
        Fixture {
            _dir: dir,
            db,
            status,
            id,
            scans,
            broken,
            invalid,
            poller,
        }
    }

    #[tokio::test]
    async fn test_unchanged_status_is_noop() {
        let mut f = fixture();
        let first = f.poller.poll_once().await.unwrap();
        assert_eq!(first.media, None);
        assert!(f.poller.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn test_new_disc_is_registered_once() {
        let mut f = fixture();
        let disc = MediaId::new("cdda:06019002");
        f.poller.poll_once().await;

        *f.id.lock() = Some(disc.clone());
        *f.status.lock() = DriveStatus::DiscPresent;
        let change = f.poller.poll_once().await.unwrap();
        assert_eq!(change.media, Some(disc.clone()));
        assert_eq!(change.device, PathBuf::from("/dev/cdrom"));

        let record = f.db.query_media(&disc).unwrap().unwrap();
        assert_eq!(record.row.content, MediaContent::Cdda);
        let root = record.root.unwrap();
        let tracks = f
            .db
            .query(&QueryFilter::new().parent(root.id.clone().unwrap()))
            .unwrap();
        assert_eq!(tracks.len(), 3);
        assert!(tracks[0].filename.ends_with("track01"));
        assert_eq!(tracks[0].kind, ItemType::media("track_cdda"));

        *f.status.lock() = DriveStatus::NoDisc;
        assert_eq!(f.poller.poll_once().await.unwrap().media, None);

        *f.status.lock() = DriveStatus::DiscPresent;
        assert_eq!(f.poller.poll_once().await.unwrap().media, Some(disc));
        assert_eq!(f.scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unidentified_disc_reads_as_empty() {
        let mut f = fixture();
        *f.status.lock() = DriveStatus::DiscPresent;
        assert_eq!(f.poller.poll_once().await.unwrap().media, None);

        *f.id.lock() = Some(MediaId::new("cdda:0a0b0c0d"));
        let change = f.poller.poll_once().await.unwrap();
        assert_eq!(change.media, Some(MediaId::new("cdda:0a0b0c0d")));
    }

    #[tokio::test]
    async fn test_failed_scan_is_retried() {
        let mut f = fixture();
        let disc = MediaId::new("cdda:00000002");
        *f.id.lock() = Some(disc.clone());
        *f.status.lock() = DriveStatus::DiscPresent;
        f.broken.store(true, Ordering::SeqCst);
        assert_eq!(f.poller.poll_once().await.unwrap().media, None);

        f.broken.store(false, Ordering::SeqCst);
        let change = f.poller.poll_once().await.unwrap();
        assert_eq!(change.media, Some(disc.clone()));
        assert_eq!(f.scans.load(Ordering::SeqCst), 2);
        assert!(f.db.query_media(&disc).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_track_leaves_disc_unregistered() {
        let mut f = fixture();
        let disc = MediaId::new("cdda:00000003");
        *f.id.lock() = Some(disc.clone());
        *f.status.lock() = DriveStatus::DiscPresent;
        f.invalid.store(true, Ordering::SeqCst);
        assert_eq!(f.poller.poll_once().await.unwrap().media, None);
        assert!(f.db.query_media(&disc).unwrap().is_none());
        assert!(f.db.is_empty());

        f.invalid.store(false, Ordering::SeqCst);
        let change = f.poller.poll_once().await.unwrap();
        assert_eq!(change.media, Some(disc.clone()));
        let root = f.db.query_media(&disc).unwrap().unwrap().root.unwrap();
        let tracks = f
            .db
            .query(&QueryFilter::new().parent(root.id.unwrap()))
            .unwrap();
        assert_eq!(tracks.len(), 3);
    }

    #[tokio::test]
    async fn test_background_polling() {
        let f = fixture();
        let (tx, mut rx) = mpsc::channel(4);
        let monitor = f.poller.start(Duration::from_millis(5), tx);
        assert_eq!(monitor.device(), Path::new("/dev/cdrom"));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.media, None);

        *f.id.lock() = Some(MediaId::new("cdda:00000001"));
        *f.status.lock() = DriveStatus::DiscPresent;
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.media, Some(MediaId::new("cdda:00000001")));

        monitor.stop().await;
    }
}
