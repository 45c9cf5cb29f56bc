//! The lock manager: cooperative, process-local mutual exclusion keyed by
//! account id, with deadlock-free multi-account acquisition.
//!
//! Keys are created lazily on first use and retained for the process
//! lifetime. Acquisition always sorts the requested id set into a single
//! canonical total order before taking any lock, and release happens in
//! reverse order as each guard drops; every caller using the same order is
//! what makes concurrent transfers A->B and B->A serialize instead of
//! deadlocking.
//!
//! **Limitation**: these locks are process-local. Horizontal replication of
//! this engine requires a distributed lock (or single-writer sharding)
//! keyed by account id with the same canonical-order discipline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::account::AccountId;

/// A registry of per-account mutexes, shared across the engine via `Arc`.
#[derive(Default)]
pub struct LockManager {
    registry: StdMutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl LockManager {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        LockManager {
            registry: StdMutex::new(HashMap::new()),
        }
    }

    fn entry_for(&self, id: AccountId) -> Arc<Mutex<()>> {
        let mut registry = self.registry.lock().expect("lock registry poisoned");
        registry.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquires exclusive access to every id in `ids` (deduplicated, sorted
    /// into canonical order), invokes `work`, then releases all locks;
    /// guards drop in reverse acquisition order automatically.
    ///
    /// `ids` may be empty (a no-op) or contain duplicates (deduplicated
    /// before acquiring, since a single account never needs to lock itself
    /// twice).
    pub async fn with_lock<F, Fut, T>(&self, ids: &[AccountId], work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut ordered: Vec<AccountId> = ids.to_vec();
        ordered.sort_unstable_by_key(|id| id.0);
        ordered.dedup();

        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(ordered.len());
        for id in &ordered {
            let mutex = self.entry_for(*id);
            guards.push(mutex.lock_owned().await);
        }

        let result = work().await;

        // Guards are dropped here, in the reverse order they were pushed,
        // i.e. reverse of canonical acquisition order.
        drop(guards);
        result
    }

    /// Drops any registry entries whose semaphore is currently uncontended,
    /// bounding the registry's working set. Safe to call at any time: an
    /// entry that is actually in use is held by an `Arc` clone elsewhere and
    /// survives the removal of the registry's own reference.
    pub fn evict_unwatched(&self) {
        let mut registry = self.registry.lock().expect("lock registry poisoned");
        registry.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn serializes_overlapping_lock_sets() {
        let manager = Arc::new(LockManager::new());
        let a = AccountId::new();
        let b = AccountId::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            let counter = counter.clone();
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .with_lock(&[a, b], || async {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reversed_id_order_still_serializes() {
        // A->B and B->A requests both lock {a, b}; canonical ordering inside
        // with_lock means the caller's argument order does not matter.
        let manager = Arc::new(LockManager::new());
        let a = AccountId::new();
        let b = AccountId::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let m1 = manager.clone();
        let c1 = concurrent.clone();
        let x1 = max_concurrent.clone();
        let h1 = tokio::spawn(async move {
            m1.with_lock(&[a, b], || async {
                let now = c1.fetch_add(1, Ordering::SeqCst) + 1;
                x1.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                c1.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        });
        let m2 = manager.clone();
        let c2 = concurrent.clone();
        let x2 = max_concurrent.clone();
        let h2 = tokio::spawn(async move {
            m2.with_lock(&[b, a], || async {
                let now = c2.fetch_add(1, Ordering::SeqCst) + 1;
                x2.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                c2.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        });
        h1.await.unwrap();
        h2.await.unwrap();
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
