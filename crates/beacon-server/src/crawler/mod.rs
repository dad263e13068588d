//! Incremental crawler.
//!
//! A [`Crawler`] keeps the items of one directory subtree consistent with the
//! filesystem. Each crawler runs as its own task: directory listings and
//! mtime checks are done in small time-sliced steps, and kernel change events
//! feed changed paths back into the queues. Without a watch backend the
//! crawler re-scans its roots periodically instead.

mod listing;
mod schedule;
mod state;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use beacon_core::{BeaconConfig, Item};
use beacon_watch::{BurstHandler, INotify};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::controller::Controller;
use crate::hardware::Thumbnailer;

pub use listing::{DirEntryInfo, live_mtimes, merge_listing, read_listing};
pub use schedule::{ActiveGuard, CrawlScheduler};
pub use state::{CrawlPhase, CrawlState};

use worker::CrawlWorker;

/// Everything a crawler needs from its service.
#[derive(Clone)]
pub struct CrawlContext {
    pub controller: Arc<Controller>,
    /// Kernel watch backend; `None` selects periodic re-scans.
    pub inotify: Option<Arc<INotify>>,
    pub scheduler: CrawlScheduler,
    pub thumbnailer: Option<Arc<dyn Thumbnailer>>,
    pub config: BeaconConfig,
}

impl CrawlContext {
    pub fn new(controller: Arc<Controller>, config: BeaconConfig) -> Self {
        Self {
            controller,
            inotify: None,
            scheduler: CrawlScheduler::from_config(&config),
            thumbnailer: None,
            config,
        }
    }

    pub fn with_inotify(mut self, inotify: Option<Arc<INotify>>) -> Self {
        self.inotify = inotify;
        self
    }

    pub fn with_scheduler(mut self, scheduler: CrawlScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        self.thumbnailer = Some(thumbnailer);
        self
    }
}

impl std::fmt::Debug for CrawlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlContext")
            .field("watching", &self.inotify.is_some())
            .field("scheduler", &self.scheduler)
            .field("thumbnailer", &self.thumbnailer.is_some())
            .finish()
    }
}

#[derive(Debug)]
enum CrawlCommand {
    Append(Item),
    Recheck(PathBuf),
    Rescan,
    Stop,
}

/// Observable state of a crawler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStatus {
    pub phase: CrawlPhase,
    /// Number of finished crawl cycles.
    pub cycles: u64,
}

/// Handle to a running crawler task.
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct Crawler {
    commands: mpsc::UnboundedSender<CrawlCommand>,
    status: watch::Receiver<CrawlStatus>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Crawler {
    /// Start a crawler task. Must be called within a tokio runtime.
    pub fn spawn(ctx: CrawlContext) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(CrawlStatus {
            phase: CrawlPhase::Idle,
            cycles: 0,
        });

        let recheck = commands.clone();
        let burst = BurstHandler::new(move |path| {
            let _ = recheck.send(CrawlCommand::Recheck(path.to_path_buf()));
        })
        .with_throttle(ctx.config.throttle_every);

        let cancel = CancellationToken::new();
        let worker = CrawlWorker::new(ctx, Arc::new(burst), status_tx);
        let task = tokio::spawn(worker.run(rx, cancel.clone()));

        Self {
            commands,
            status,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Seed the crawl with a root item and start a cycle if idle.
    pub fn append(&self, item: Item) {
        let _ = self.commands.send(CrawlCommand::Append(item));
    }

    /// Re-check every root.
    pub fn rescan(&self) {
        let _ = self.commands.send(CrawlCommand::Rescan);
    }

    /// Current phase.
    pub fn phase(&self) -> CrawlPhase {
        self.status.borrow().phase
    }

    /// Number of finished crawl cycles.
    pub fn cycles(&self) -> u64 {
        self.status.borrow().cycles
    }

    /// Wait until more than `after` cycles have finished. Returns `false` if
    /// the crawler stopped first.
    pub async fn wait_cycle(&self, after: u64) -> bool {
        let mut status = self.status.clone();
        status
            .wait_for(|s| s.cycles > after || s.phase == CrawlPhase::Stopped)
            .await
            .map(|s| s.cycles > after)
            .unwrap_or(false)
    }

    /// Append `item` and wait for the cycle that covers it to finish.
    pub async fn crawl(&self, item: Item) -> bool {
        let after = self.cycles();
        self.append(item);
        self.wait_cycle(after).await
    }

    /// Finish the current cycle and end the task.
    pub async fn stop(&self) {
        let _ = self.commands.send(CrawlCommand::Stop);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Crawler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
