use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::chat::SessionId;

/// Table of per-session mutexes.
///
/// Entries are created on first use and never evicted; the session cap keeps
/// the table bounded.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &SessionId) -> Arc<Mutex<()>> {
        // Clone out of the shard before awaiting on the mutex
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: &SessionId) -> OwnedMutexGuard<()> {
        self.lock_for(id).lock_owned().await
    }

    /// Run `f` while holding the lock for `id`.
    pub async fn with_lock<F, Fut, T>(&self, id: &SessionId, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(id).await;
        f().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_id_never_overlaps() {
        let locks = SessionLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                locks
                    .with_lock(&id("shared"), || async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks = SessionLocks::new();
        let _held = locks.acquire(&id("a")).await;

        let other = tokio::time::timeout(
            Duration::from_millis(100),
            locks.with_lock(&id("b"), || async { 7 }),
        )
        .await;
        assert_eq!(other.unwrap(), 7);

        let same = tokio::time::timeout(Duration::from_millis(20), locks.acquire(&id("a"))).await;
        assert!(same.is_err());
    }
}
