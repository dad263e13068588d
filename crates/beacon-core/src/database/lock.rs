//! Cooperative read lock.
//!
//! Readers hold a [`ReadLease`] while they iterate large result sets. Writers
//! never block the thread on it: they check [`ReadLock::is_locked`] and, if
//! set, await [`ReadLock::unlocked`] before retrying.

use std::sync::Arc;

use tokio::sync::watch;

/// Advisory lock counting active readers.
#[derive(Debug, Clone)]
pub struct ReadLock {
    holders: Arc<watch::Sender<usize>>,
}

impl ReadLock {
    /// Create an unlocked read lock.
    pub fn new() -> Self {
        let (holders, _) = watch::channel(0);
        Self {
            holders: Arc::new(holders),
        }
    }

    /// Take a read lease. The lock is held until every lease is dropped.
    pub fn acquire(&self) -> ReadLease {
        self.holders.send_modify(|n| *n += 1);
        ReadLease {
            holders: Arc::clone(&self.holders),
        }
    }

    /// Check if any reader holds a lease.
    pub fn is_locked(&self) -> bool {
        *self.holders.borrow() > 0
    }

    /// Wait until no reader holds a lease.
    pub async fn unlocked(&self) {
        let mut rx = self.holders.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ReadLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII read lease.
#[derive(Debug)]
pub struct ReadLease {
    holders: Arc<watch::Sender<usize>>,
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.holders.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lease_counts() {
        let lock = ReadLock::new();
        assert!(!lock.is_locked());

        let a = lock.acquire();
        let b = lock.acquire();
        assert!(lock.is_locked());

        drop(a);
        assert!(lock.is_locked());
        drop(b);
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_unlocked_wakes_waiter() {
        let lock = ReadLock::new();
        let lease = lock.acquire();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.unlocked().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(lease);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
