//! Debounce for files that are still being written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default n for [`BurstHandler::should_trigger`].
pub const DEFAULT_THROTTLE_EVERY: u32 = 10;

type Callback = Box<dyn Fn(&Path) + Send + Sync>;

#[derive(Debug, Default)]
struct BurstState {
    /// Tracked names and whether they grew since the last poll.
    growing: HashMap<PathBuf, bool>,
    /// Attempts seen by the throttled gate.
    attempts: HashMap<PathBuf, u32>,
}

/// Tracks growing files and fires a callback once per poll for each file
/// that grew.
///
/// The first sample of a name only starts tracking it; growth is confirmed
/// from the second sample on.
pub struct BurstHandler {
    state: Mutex<BurstState>,
    callback: Callback,
    throttle_every: u32,
}

impl BurstHandler {
    /// Create a handler invoking `callback` for growing files.
    pub fn new(callback: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(BurstState::default()),
            callback: Box::new(callback),
            throttle_every: DEFAULT_THROTTLE_EVERY,
        }
    }

    /// Fire the throttled gate on every n-th attempt.
    pub fn with_throttle(mut self, every: u32) -> Self {
        self.throttle_every = every.max(1);
        self
    }

    /// Record a sample of `name`. Returns `false` the first time a name is
    /// seen and `true` on every later sample.
    pub fn is_growing(&self, name: &Path) -> bool {
        let mut state = self.state.lock();
        match state.growing.get_mut(name) {
            Some(needed) => {
                *needed = true;
                true
            }
            None => {
                state.growing.insert(name.to_path_buf(), false);
                false
            }
        }
    }

    /// Invoke the callback once for every name that grew since the last poll.
    ///
    /// Clears the grew-flags but keeps tracking. Returns the number of
    /// callbacks fired.
    pub fn poll(&self) -> usize {
        let due: Vec<PathBuf> = {
            let mut state = self.state.lock();
            state
                .growing
                .iter_mut()
                .filter(|(_, needed)| **needed)
                .map(|(name, needed)| {
                    *needed = false;
                    name.clone()
                })
                .collect()
        };

        for name in &due {
            trace!(path = %name.display(), "growing file due");
            (self.callback)(name);
        }
        due.len()
    }

    /// Gate for work more expensive than a poll. The first attempt for a name
    /// always passes; later attempts pass when the attempt count is a
    /// multiple of the throttle.
    pub fn should_trigger(&self, name: &Path) -> bool {
        let mut state = self.state.lock();
        let attempts = state.attempts.entry(name.to_path_buf()).or_insert(0);
        *attempts += 1;
        *attempts == 1 || *attempts % self.throttle_every == 0
    }

    /// Stop tracking `name`.
    pub fn remove(&self, name: &Path) {
        let mut state = self.state.lock();
        state.growing.remove(name);
        state.attempts.remove(name);
    }

    /// Number of tracked names.
    pub fn tracked(&self) -> usize {
        self.state.lock().growing.len()
    }

    /// Poll every `interval` until cancelled or the handler is dropped.
    pub fn start(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let handler: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(handler) = handler.upgrade() else { break };
                        handler.poll();
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for BurstHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurstHandler")
            .field("state", &*self.state.lock())
            .field("throttle_every", &self.throttle_every)
            .finish()
    }
}
