//! Write batching facade over the index store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use beacon_core::{
    Attributes, BeaconError, CommitSummary, Database, Item, ItemId, ItemType, Media,
    MediaContent, MediaId, MediaRecord, MediaRow, Metadata, ParseError, Parser, QueryBackend,
    QueryFilter, SchemaRegistry, ServerEvent,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::EVENT_CHANNEL_SIZE;
use crate::hardware::HardwareClient;

#[derive(Debug, Clone)]
enum PendingOp {
    Update(Item),
    Delete { filename: String, id: ItemId },
}

impl PendingOp {
    fn filename(&self) -> &str {
        match self {
            PendingOp::Update(item) => &item.filename,
            PendingOp::Delete { filename, .. } => filename,
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    /// Writes keyed by sequence number, in request order.
    ops: IndexMap<u64, PendingOp>,
    /// Sequence number of the latest write per filename.
    latest: HashMap<String, u64>,
    next: u64,
    /// A flush task is scheduled.
    armed: bool,
}

impl Pending {
    fn push(&mut self, op: PendingOp) {
        let seq = self.next;
        self.next += 1;
        self.latest.insert(op.filename().to_string(), seq);
        self.ops.insert(seq, op);
    }

    /// Queue an update. Consecutive updates of one filename coalesce; an
    /// update after a queued delete is queued behind it as a new row.
    fn update(&mut self, mut item: Item) {
        let queued = self
            .latest
            .get(&item.filename)
            .and_then(|seq| self.ops.get_mut(seq));
        match queued {
            Some(PendingOp::Update(queued)) => *queued = item,
            Some(PendingOp::Delete { .. }) => {
                item.id = None;
                self.push(PendingOp::Update(item));
            }
            None => self.push(PendingOp::Update(item)),
        }
    }

    /// Drop every write at or below `filename`.
    fn forget(&mut self, filename: &str) {
        self.ops.retain(|_, op| !is_within(op.filename(), filename));
        self.latest.retain(|name, _| !is_within(name, filename));
    }

    fn drain(&mut self) -> Vec<PendingOp> {
        self.latest.clear();
        self.ops.drain(..).map(|(_, op)| op).collect()
    }
}

/// Server-side owner of all index writes.
///
/// Item updates are collected and flushed in one batch `commit_delay` after
/// the first of them arrives. Deletes bypass the batch. Writers never block
/// on the store's read lock: they wait for it asynchronously.
pub struct Controller {
    db: Arc<dyn Database>,
    parser: Arc<dyn Parser>,
    schema: SchemaRegistry,
    hardware: Option<Arc<dyn HardwareClient>>,
    pending: Mutex<Pending>,
    commit_delay: Duration,
    events: broadcast::Sender<ServerEvent>,
    this: Weak<Self>,
}

impl Controller {
    /// Create a controller with the default schema and no hardware client.
    pub fn new(db: Arc<dyn Database>, parser: Arc<dyn Parser>, commit_delay: Duration) -> Arc<Self> {
        Self::with_collaborators(db, parser, SchemaRegistry::with_defaults(), None, commit_delay)
    }

    /// Create a controller with every collaborator given explicitly.
    pub fn with_collaborators(
        db: Arc<dyn Database>,
        parser: Arc<dyn Parser>,
        schema: SchemaRegistry,
        hardware: Option<Arc<dyn HardwareClient>>,
        commit_delay: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Arc::new_cyclic(|this| Self {
            db,
            parser,
            schema,
            hardware,
            pending: Mutex::new(Pending::default()),
            commit_delay,
            events,
            this: this.clone(),
        })
    }

    /// The backing store.
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Registered item types.
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Run the parser on `item` and queue the result with `mtime` as its new
    /// stored mtime.
    ///
    /// Directories skip the parser. A failed or invalid parse is logged and
    /// leaves the stored item untouched, so the next change detection retries
    /// it. Returns whether an update was queued.
    pub async fn parse(&self, mut item: Item, mtime: i64) -> bool {
        if !item.is_dir() {
            let parser = Arc::clone(&self.parser);
            let probe = item.clone();
            let parsed = match tokio::task::spawn_blocking(move || parser.parse(&probe)).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = %item.filename, error = %e, "parser task failed");
                    return false;
                }
            };

            match parsed.and_then(|metadata| self.check(metadata)) {
                Ok(Some(metadata)) => {
                    item.kind = metadata.kind;
                    item.attributes = metadata.attributes;
                }
                Ok(None) => {
                    item.kind = ItemType::File;
                    item.attributes.clear();
                }
                Err(e) => {
                    warn!(path = %item.filename, error = %e, "parse failed, item left stale");
                    return false;
                }
            }
        }

        item.mtime = mtime;
        self.update(item);
        true
    }

    fn check(&self, metadata: Option<Metadata>) -> Result<Option<Metadata>, ParseError> {
        if let Some(metadata) = &metadata {
            self.schema.validate(&metadata.kind, &metadata.attributes)?;
        }
        Ok(metadata)
    }

    /// Queue an item write. The first queued write schedules a flush.
    ///
    /// Must be called within a tokio runtime.
    pub fn update(&self, item: Item) {
        trace!(path = %item.filename, "update queued");
        let mut pending = self.pending.lock();
        pending.update(item);
        self.schedule(&mut pending);
    }

    /// Delete an item and everything below it.
    ///
    /// Pending writes for those items are dropped. While readers hold the
    /// store's read lock the delete is queued instead, ahead of any update
    /// requested after it.
    pub fn delete(&self, item: &Item) -> Result<(), BeaconError> {
        let mut pending = self.pending.lock();
        pending.forget(&item.filename);

        let Some(id) = item.id.clone() else {
            return Ok(());
        };

        if self.db.read_lock().is_locked() {
            debug!(path = %item.filename, "index read-locked, delete queued");
            pending.push(PendingOp::Delete {
                filename: item.filename.clone(),
                id,
            });
        } else {
            self.db.delete_object(&id)?;
            debug!(path = %item.filename, "deleted");
        }
        self.schedule(&mut pending);
        Ok(())
    }

    /// Create a row right away and return the saved item.
    ///
    /// Used where an id is needed before children can reference it.
    pub async fn insert(&self, item: Item) -> Result<Item, BeaconError> {
        self.wait_unlocked().await;
        Ok(self.db.add_object(item)?)
    }

    /// Apply every pending write in request order and commit.
    pub async fn flush(&self) -> Result<CommitSummary, BeaconError> {
        self.wait_unlocked().await;

        let ops: Vec<PendingOp> = {
            let mut pending = self.pending.lock();
            pending.armed = false;
            pending.drain()
        };
        if !ops.is_empty() {
            debug!(count = ops.len(), "flushing pending writes");
        }
        for op in ops {
            if let Err(e) = self.apply(op) {
                warn!(error = %e, "pending write failed");
            }
        }
        self.commit()
    }

    fn apply(&self, op: PendingOp) -> Result<(), BeaconError> {
        match op {
            PendingOp::Update(item) if item.is_saved() => self.db.update_object(&item)?,
            PendingOp::Update(item) => {
                self.db.add_object(item)?;
            }
            PendingOp::Delete { id, .. } => self.db.delete_object(&id)?,
        }
        Ok(())
    }

    /// Commit the store, announcing a change to clients if rows changed.
    pub fn commit(&self) -> Result<CommitSummary, BeaconError> {
        let summary = self.db.commit()?;
        if !summary.is_empty() {
            debug!(changes = summary.changes, "committed");
            self.publish(ServerEvent::Changed);
        }
        Ok(summary)
    }

    fn schedule(&self, pending: &mut Pending) {
        if pending.armed {
            return;
        }
        pending.armed = true;

        let this = self.this.clone();
        let delay = self.commit_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = this.upgrade() else { return };
            if let Err(e) = this.flush().await {
                warn!(error = %e, "batched commit failed");
            }
        });
    }

    async fn wait_unlocked(&self) {
        let lock = self.db.read_lock();
        while lock.is_locked() {
            trace!("waiting for index readers");
            lock.unlocked().await;
        }
    }

    /// Look up the stored item with `filename`.
    pub fn lookup(&self, filename: &str) -> Result<Option<Item>, BeaconError> {
        let mut items = self.db.query(&QueryFilter::new().filename(filename))?;
        Ok(items.pop())
    }

    /// Move every item of `media` stored below `from` to the same place below
    /// `to`. Both are directory filenames. Returns the number of moved rows.
    pub async fn rebase(&self, media: &MediaId, from: &str, to: &str) -> Result<usize, BeaconError> {
        self.wait_unlocked().await;
        self.pending.lock().forget(from);

        let mut moved = 0;
        for mut item in self.db.query(&QueryFilter::new().media(media.clone()))? {
            let Some(rest) = item.filename.strip_prefix(from) else {
                continue;
            };
            item.filename = format!("{to}{rest}");
            self.db.update_object(&item)?;
            moved += 1;
        }
        debug!(%media, from, to, moved, "media rebased");
        Ok(moved)
    }

    /// Look up a media row and its root directory.
    pub fn media_record(&self, id: &MediaId) -> Result<Option<MediaRecord>, BeaconError> {
        Ok(self.db.query_media(id)?)
    }

    /// Create a media row.
    pub fn add_media(
        &self,
        id: &MediaId,
        content: MediaContent,
        attributes: Attributes,
    ) -> Result<MediaRow, BeaconError> {
        Ok(self.db.add_media(id, content, attributes)?)
    }

    /// Persisted information about a media.
    pub fn media_information(&self, id: &MediaId) -> Result<Option<MediaRow>, BeaconError> {
        Ok(self.media_record(id)?.map(|record| record.row))
    }

    /// Mount a block device through the hardware client.
    pub async fn mount(&self, device: &Path) -> Result<(), BeaconError> {
        self.hardware()?.mount(device).await
    }

    /// Eject a media through the hardware client.
    pub async fn eject(&self, media: &Media) -> Result<(), BeaconError> {
        let device = media.device.as_deref().ok_or_else(|| BeaconError::Other {
            message: format!("media at {} has no device", media.mountpoint.display()),
        })?;
        self.hardware()?.eject(device).await
    }

    fn hardware(&self) -> Result<&Arc<dyn HardwareClient>, BeaconError> {
        self.hardware.as_ref().ok_or_else(|| BeaconError::Other {
            message: "no hardware monitor connected".to_string(),
        })
    }

    /// Send an event to every subscriber.
    pub fn publish(&self, event: ServerEvent) {
        // Fails only when nobody listens.
        let _ = self.events.send(event);
    }
}

impl QueryBackend for Controller {
    fn query(&self, filter: &QueryFilter) -> Result<Vec<Item>, BeaconError> {
        let _lease = self.db.read_lock().acquire();
        Ok(self.db.query(filter)?)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("directory", &self.db.get_directory())
            .field("pending", &self.pending.lock().ops.len())
            .field("commit_delay", &self.commit_delay)
            .finish()
    }
}

fn is_within(name: &str, filename: &str) -> bool {
    name == filename || (filename.ends_with('/') && name.starts_with(filename))
}
