//! Crawl state machine driven by one task.

use std::path::Path;
use std::sync::Arc;

use beacon_core::{Item, QueryBackend, QueryFilter, ServerEvent, dir_filename};
use beacon_watch::{BurstHandler, ChangeKind, WatchEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::listing::{live_mtimes, merge_listing, read_listing};
use super::schedule::ActiveGuard;
use super::state::{CrawlPhase, CrawlState};
use super::{CrawlCommand, CrawlContext, CrawlStatus};

pub(super) struct CrawlWorker {
    ctx: CrawlContext,
    state: CrawlState,
    roots: Vec<Item>,
    burst: Arc<BurstHandler>,
    active: Option<ActiveGuard>,
    /// Items checked in the current cycle.
    checked: usize,
    /// Updates and deletes in the current cycle.
    changes: usize,
    cycles: u64,
    stopped: bool,
    rescan_at: Option<Instant>,
    status: watch::Sender<CrawlStatus>,
}

impl CrawlWorker {
    pub(super) fn new(
        ctx: CrawlContext,
        burst: Arc<BurstHandler>,
        status: watch::Sender<CrawlStatus>,
    ) -> Self {
        Self {
            ctx,
            state: CrawlState::new(),
            roots: Vec::new(),
            burst,
            active: None,
            checked: 0,
            changes: 0,
            cycles: 0,
            stopped: false,
            rescan_at: None,
            status,
        }
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<CrawlCommand>,
        cancel: CancellationToken,
    ) {
        let mut events = self.ctx.inotify.as_ref().map(|i| i.subscribe_all());
        let burst_task = self
            .burst
            .start(self.ctx.config.burst_interval, cancel.child_token());
        let mut next_step = Instant::now();

        loop {
            let busy = self.active.is_some();
            let rescan_at = self.rescan_at;

            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(CrawlCommand::Append(item)) => self.append(item),
                    Some(CrawlCommand::Recheck(path)) => self.recheck(&path, false),
                    Some(CrawlCommand::Rescan) => self.rescan(),
                    Some(CrawlCommand::Stop) | None => break,
                },
                event = next_event(&mut events) => match event {
                    Ok(event) => self.on_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "watch events lost, rescanning");
                        self.rescan();
                    }
                    Err(RecvError::Closed) => events = None,
                },
                _ = tokio::time::sleep_until(next_step), if busy => {
                    self.step().await;
                    next_step = Instant::now() + self.ctx.scheduler.interval(self.state.phase());
                }
                _ = tokio::time::sleep_until(rescan_at.unwrap_or_else(Instant::now)), if rescan_at.is_some() => {
                    self.rescan();
                }
            }
            self.publish_status();
        }

        self.stop().await;
        burst_task.abort();
    }

    fn is_fallback(&self) -> bool {
        self.ctx.inotify.is_none()
    }

    fn phase(&self) -> CrawlPhase {
        if self.stopped {
            CrawlPhase::Stopped
        } else if self.active.is_none() {
            CrawlPhase::Idle
        } else {
            self.state.phase()
        }
    }

    fn publish_status(&self) {
        let next = CrawlStatus {
            phase: self.phase(),
            cycles: self.cycles,
        };
        self.status.send_if_modified(|status| {
            let modified = *status != next;
            *status = next;
            modified
        });
    }

    fn start(&mut self) {
        if self.active.is_some() {
            return;
        }
        trace!("crawl cycle started");
        self.active = Some(self.ctx.scheduler.activate());
        self.rescan_at = None;
        self.checked = 0;
        self.changes = 0;
    }

    pub(super) fn append(&mut self, item: Item) {
        debug!(path = %item.filename, "crawl root appended");
        if !self.roots.iter().any(|r| r.filename == item.filename) {
            self.roots.push(item.clone());
        }
        self.state.append(item);
        self.start();
    }

    /// Run one bounded unit of work.
    pub(super) async fn step(&mut self) {
        match self.state.phase() {
            CrawlPhase::Scanning => self.scan_step().await,
            CrawlPhase::Checking => self.check_step().await,
            CrawlPhase::Updating => self.update_step().await,
            CrawlPhase::Idle | CrawlPhase::Stopped => {}
        }
        if self.state.phase() == CrawlPhase::Idle {
            self.finished().await;
        }
    }

    async fn scan_step(&mut self) {
        let Some(dir) = self.state.scan_dirs.pop_front() else {
            return;
        };
        let dir = if dir.is_saved() {
            dir
        } else {
            match self.ctx.controller.insert(dir).await {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(error = %e, "cannot create directory row");
                    return;
                }
            }
        };
        let Some(id) = dir.id.clone() else {
            return;
        };

        let path = dir.path().to_path_buf();
        if self.state.monitoring.insert(path.clone()) {
            if let Some(inotify) = &self.ctx.inotify {
                if let Err(e) = inotify.watch(&path) {
                    warn!(path = %path.display(), error = %e, "cannot watch directory");
                }
            }
        }

        let stored = match self.ctx.controller.query(&QueryFilter::new().parent(id)) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot list stored children");
                return;
            }
        };
        let listing = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || read_listing(&path)).await
        };
        let listing = match listing {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => {
                debug!(path = %path.display(), error = %e, "cannot list directory");
                return;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "listing task failed");
                return;
            }
        };

        let (present, vanished) = merge_listing(&dir, stored, listing);
        trace!(
            path = %path.display(),
            present = present.len(),
            vanished = vanished.len(),
            "directory scanned"
        );

        for item in vanished {
            self.remove_item(&item);
        }
        for child in present {
            if child.is_dir() {
                if self.state.is_known_dir(child.path()) {
                    continue;
                }
                self.state.scan_dirs.push_back(child.clone());
            }
            self.state.check_mtime.push_back(child);
        }
    }

    async fn check_step(&mut self) {
        let remaining = self.state.check_mtime.len();
        let count = if remaining < self.ctx.config.mtime_drain_threshold {
            remaining
        } else {
            remaining.min(self.ctx.config.mtime_batch)
        };
        let batch: Vec<Item> = self.state.check_mtime.drain(..count).collect();

        let checked = tokio::task::spawn_blocking(move || {
            let mtimes = live_mtimes(&batch);
            (batch, mtimes)
        })
        .await;
        let (batch, mtimes) = match checked {
            Ok(checked) => checked,
            Err(e) => {
                warn!(error = %e, "mtime check task failed");
                return;
            }
        };

        for (item, live) in batch.into_iter().zip(mtimes) {
            match live {
                Some(mtime) if mtime != item.mtime => {
                    trace!(path = %item.filename, stored = item.mtime, live = mtime, "mtime changed");
                    self.state.pending_update.push_back((item, mtime));
                }
                Some(_) => {}
                None => trace!(path = %item.filename, "vanished before mtime check"),
            }
        }

        self.checked += count;
        self.ctx.controller.publish(ServerEvent::Progress {
            pos: self.checked,
            total: self.checked + self.state.check_mtime.len(),
        });
    }

    async fn update_step(&mut self) {
        let Some((item, mtime)) = self.state.pending_update.pop_front() else {
            return;
        };
        if self.ctx.controller.parse(item, mtime).await {
            self.changes += 1;
        }
    }

    /// End a cycle: empty the queues, commit, and in fallback mode arm the
    /// re-scan timer.
    pub(super) async fn finished(&mut self) {
        let Some(guard) = self.active.take() else {
            return;
        };
        self.state.clear();

        if let Err(e) = self.ctx.controller.flush().await {
            warn!(error = %e, "commit after crawl failed");
        }
        if self.changes == 0 {
            self.ctx.controller.publish(ServerEvent::Checked);
        }
        info!(
            checked = self.checked,
            changes = self.changes,
            "crawl cycle finished"
        );

        if self.is_fallback() && !self.stopped {
            self.rescan_at = Some(Instant::now() + self.ctx.config.rescan_interval);
        }
        self.cycles += 1;
        drop(guard);
    }

    async fn stop(&mut self) {
        self.finished().await;
        self.stopped = true;
        self.rescan_at = None;
        self.publish_status();
        debug!("crawler stopped");
    }

    /// Re-check every root from scratch.
    fn rescan(&mut self) {
        self.rescan_at = None;
        self.state.monitoring.clear();
        let roots: Vec<Item> = self
            .roots
            .iter()
            .map(|root| match self.ctx.controller.lookup(&root.filename) {
                Ok(Some(stored)) => stored,
                _ => root.clone(),
            })
            .collect();
        debug!(roots = roots.len(), "rescanning");
        for root in roots {
            self.state.append(root);
        }
        self.start();
    }

    async fn on_event(&mut self, event: WatchEvent) {
        if event.kind == ChangeKind::Overflow {
            warn!("watch queue overflowed, rescanning");
            self.rescan();
            return;
        }
        if !self.is_monitored(&event.path) {
            return;
        }

        let metadata = tokio::fs::metadata(&event.path).await;
        let Ok(metadata) = metadata else {
            self.on_removed(&event.path);
            return;
        };
        let is_dir = metadata.is_dir();

        if event.kind == ChangeKind::Modify && !is_dir && self.burst.is_growing(&event.path) {
            if self.burst.should_trigger(&event.path) {
                if let Some(thumbnailer) = &self.ctx.thumbnailer {
                    thumbnailer.request(&event.path);
                }
            }
            trace!(path = %event.path.display(), "growing file deferred");
            return;
        }
        if event.kind == ChangeKind::CloseWrite {
            self.burst.remove(&event.path);
        }
        self.recheck(&event.path, is_dir);
    }

    fn is_monitored(&self, path: &Path) -> bool {
        self.state.monitoring.contains(path)
            || path
                .parent()
                .is_some_and(|parent| self.state.monitoring.contains(parent))
    }

    /// Queue a changed path for an mtime check.
    pub(super) fn recheck(&mut self, path: &Path, is_dir: bool) {
        let filename = if is_dir {
            dir_filename(path)
        } else {
            path.to_string_lossy().into_owned()
        };
        if self.state.is_checking(&filename) {
            return;
        }
        let Some(item) = self.item_for_path(path, &filename, is_dir) else {
            debug!(path = %path.display(), "change outside the index");
            return;
        };

        if is_dir && !self.state.is_known_dir(path) {
            self.state.scan_dirs.push_back(item.clone());
        }
        self.state.check_mtime.push_back(item);
        self.start();
    }

    fn item_for_path(&self, path: &Path, filename: &str, is_dir: bool) -> Option<Item> {
        let controller = &self.ctx.controller;
        match controller.lookup(filename) {
            Ok(Some(item)) => return Some(item),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "lookup failed");
                return None;
            }
        }

        let parent = controller.lookup(&dir_filename(path.parent()?)).ok()??;
        let item = if is_dir {
            Item::new_dir(path, parent.id.clone())
        } else {
            Item::new_file(path, parent.id.clone())
        };
        Some(Item {
            media: parent.media,
            ..item
        })
    }

    fn on_removed(&mut self, path: &Path) {
        let file = path.to_string_lossy().into_owned();
        let dir = dir_filename(path);
        for filename in [file, dir] {
            if let Ok(Some(item)) = self.ctx.controller.lookup(&filename) {
                self.remove_item(&item);
            }
        }
        self.state.forget_tree(path);
        self.burst.remove(path);
    }

    fn remove_item(&mut self, item: &Item) {
        debug!(path = %item.filename, "removing vanished item");
        if let Err(e) = self.ctx.controller.delete(item) {
            warn!(path = %item.filename, error = %e, "delete failed");
            return;
        }
        self.changes += 1;
        if item.is_dir() {
            if let Some(inotify) = &self.ctx.inotify {
                inotify.ignore_tree(item.path());
            }
            self.state.forget_tree(item.path());
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<WatchEvent>>,
) -> Result<WatchEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
