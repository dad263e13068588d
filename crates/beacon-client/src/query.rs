//! Live query view.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{BeaconError, Item, QueryBackend, QueryFilter, ServerEvent};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::QUERY_CHANNEL_SIZE;

/// Cached result item. Reconciliation mutates it in place, so holders see
/// updates without re-reading the list.
pub type SharedItem = Arc<RwLock<Item>>;

/// Notifications emitted by a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEvent {
    /// The result list changed.
    Changed,
    /// The result list matches the server.
    UpToDate,
    /// Server crawl progress.
    Progress { pos: usize, total: usize },
}

struct QueryInner {
    backend: Arc<dyn QueryBackend>,
    filter: QueryFilter,
    results: RwLock<Vec<SharedItem>>,
    events: broadcast::Sender<QueryEvent>,
}

impl QueryInner {
    fn fetch(&self) -> Result<Vec<Item>, BeaconError> {
        let mut items = self.backend.query(&self.filter)?;
        items.sort_by_cached_key(Item::url);
        Ok(items)
    }

    fn emit(&self, event: QueryEvent) {
        let _ = self.events.send(event);
    }

    /// Bring the cached list in line with a fresh fetch. Returns whether
    /// anything was inserted, removed or mutated.
    fn reconcile(&self) -> Result<bool, BeaconError> {
        let fresh = self.fetch()?;

        let mut results = self.results.write();
        let mut by_url: HashMap<String, SharedItem> = results
            .iter()
            .map(|shared| (shared.read().url(), Arc::clone(shared)))
            .collect();
        let mut changed = fresh.len() != results.len();
        let mut next = Vec::with_capacity(fresh.len());

        for (pos, item) in fresh.into_iter().enumerate() {
            let url = item.url();
            let in_place = results.get(pos).filter(|old| old.read().url() == url);
            let shared = match in_place {
                Some(old) => Arc::clone(old),
                None => {
                    changed = true;
                    match by_url.remove(&url) {
                        Some(existing) => existing,
                        None => {
                            trace!(%url, "new result");
                            next.push(Arc::new(RwLock::new(item)));
                            continue;
                        }
                    }
                }
            };

            {
                let mut cached = shared.write();
                if cached.mtime != item.mtime || cached.id != item.id {
                    *cached = item;
                    changed = true;
                }
            }
            next.push(shared);
        }

        *results = next;
        Ok(changed)
    }

    fn changed(&self) {
        match self.reconcile() {
            Ok(changed) => {
                if changed {
                    self.emit(QueryEvent::Changed);
                }
                self.emit(QueryEvent::UpToDate);
            }
            Err(e) => warn!(error = %e, "query refresh failed"),
        }
    }

    fn checked(&self) {
        self.emit(QueryEvent::UpToDate);
    }
}

/// Client-held view of a query that stays current while monitored.
///
/// Results are ordered by URL. Readers always see either the previous or
/// the reconciled list, never a mix.
pub struct Query {
    inner: Arc<QueryInner>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Query {
    /// Run `filter` once and cache the results.
    pub fn new(backend: Arc<dyn QueryBackend>, filter: QueryFilter) -> Result<Self, BeaconError> {
        let (events, _) = broadcast::channel(QUERY_CHANNEL_SIZE);
        let inner = QueryInner {
            backend,
            filter,
            results: RwLock::new(Vec::new()),
            events,
        };
        let items = inner.fetch()?;
        *inner.results.write() = items
            .into_iter()
            .map(|item| Arc::new(RwLock::new(item)))
            .collect();

        Ok(Self {
            inner: Arc::new(inner),
            monitor: Mutex::new(None),
        })
    }

    pub fn filter(&self) -> &QueryFilter {
        &self.inner.filter
    }

    /// Shared handles to the cached results.
    pub fn items(&self) -> Vec<SharedItem> {
        self.inner.results.read().clone()
    }

    /// Copy of the cached results.
    pub fn snapshot(&self) -> Vec<Item> {
        self.inner
            .results
            .read()
            .iter()
            .map(|shared| shared.read().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.results.read().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.inner.events.subscribe()
    }

    /// Reconcile with the server now. Emits [`QueryEvent::Changed`] if the
    /// list changed, then [`QueryEvent::UpToDate`].
    pub fn refresh(&self) -> Result<bool, BeaconError> {
        let changed = self.inner.reconcile()?;
        if changed {
            self.inner.emit(QueryEvent::Changed);
        }
        self.inner.emit(QueryEvent::UpToDate);
        Ok(changed)
    }

    /// The server confirmed nothing changed.
    pub fn checked(&self) {
        self.inner.checked();
    }

    /// Start or stop following server notifications. While stopped the
    /// cached list goes stale. Starting requires a tokio runtime.
    pub fn monitor(&self, on: bool) {
        let mut monitor = self.monitor.lock();
        if !on {
            if let Some(task) = monitor.take() {
                task.abort();
                debug!("query monitoring stopped");
            }
            return;
        }
        if monitor.is_some() {
            return;
        }

        let mut events = self.inner.backend.subscribe();
        let inner = Arc::clone(&self.inner);
        *monitor = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ServerEvent::Changed) => inner.changed(),
                    Ok(ServerEvent::Checked) => inner.checked(),
                    Ok(ServerEvent::Progress { pos, total }) => {
                        inner.emit(QueryEvent::Progress { pos, total });
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "server events lagged, refreshing");
                        inner.changed();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        debug!("query monitoring started");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        if let Some(task) = self.monitor.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.inner.filter)
            .field("len", &self.len())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}
