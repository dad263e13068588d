//! Fair time slicing across concurrent crawlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use beacon_core::BeaconConfig;

use super::state::CrawlPhase;

/// Step timer shared by every crawler of a service.
///
/// The step interval is the base timer divided by the number of active
/// crawlers, so N concurrent crawls each get a bounded slice instead of
/// starving one another.
#[derive(Debug, Clone)]
pub struct CrawlScheduler {
    active: Arc<AtomicUsize>,
    parse_timer: Duration,
    update_timer: Duration,
}

impl CrawlScheduler {
    pub fn new(parse_timer: Duration, update_timer: Duration) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            parse_timer,
            update_timer,
        }
    }

    pub fn from_config(config: &BeaconConfig) -> Self {
        Self::new(config.parse_timer, config.update_timer)
    }

    /// Number of crawlers currently between start and finish.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Count a crawler as active until the guard is dropped.
    pub fn activate(&self) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Delay before the next step of a crawler in `phase`.
    pub fn interval(&self, phase: CrawlPhase) -> Duration {
        let base = match phase {
            CrawlPhase::Updating => self.update_timer,
            _ => self.parse_timer,
        };
        base / self.active().max(1) as u32
    }
}

/// Marks one crawler as active.
#[derive(Debug)]
pub struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
