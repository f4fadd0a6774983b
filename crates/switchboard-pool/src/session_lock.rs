//! Per-session acquisition lock
//!
//! A keyed async mutex: at most one acquisition per session runs at a time,
//! later callers queue in FIFO order. Entries are created on demand and
//! dropped again once no task holds or waits on them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
pub(crate) struct SessionLocks {
    locks: Arc<LockMap>,
}

impl SessionLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for any in-flight acquisition of `session_id`, then hold the lock
    pub(crate) async fn acquire(&self, session_id: &str) -> SessionGuard {
        let mutex = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;

        SessionGuard {
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
            session_id: session_id.to_string(),
        }
    }

    /// Wait until every acquisition currently in flight has settled
    pub(crate) async fn wait_all(&self) {
        let pending: Vec<Arc<Mutex<()>>> = self
            .locks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for mutex in pending {
            drop(mutex.lock().await);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Held for the duration of one session-scoped operation
#[derive(Debug)]
pub(crate) struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Unlock first so the strong count only reflects waiters.
        self.guard.take();
        self.locks
            .remove_if(&self.session_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_entry_removed_when_uncontended() {
        let locks = SessionLocks::new();
        {
            let _guard = locks.acquire("s1").await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_same_session_is_serialized() {
        let locks = Arc::new(SessionLocks::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire("shared-session").await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_wait_all_waits_for_holder() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.acquire("s1").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.wait_all().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
