//! Per-key async locks.
//!
//! [`KeyedLocks`] hands out one async mutex per key so that read-modify-write
//! cycles on the same participant are serialized while unrelated
//! participants proceed in parallel. Slots are created on demand and removed
//! once the last holder or waiter lets go.

use std::collections::HashMap;
use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// A map of lazily created async mutexes, one per key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// The returned guard releases the key when dropped.
    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        // If this future is dropped while waiting, the slot must not outlive
        // it. `acquire` is declared last so it drops first, taking its slot
        // reference with it before the prune runs.
        let mut abandoned = AbandonedWait {
            locks: self,
            key: key.clone(),
            armed: true,
        };
        let mut acquire = pin!(slot.lock_owned());
        let guard = acquire.as_mut().await;
        abandoned.armed = false;
        KeyGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Drop the slot for `key` if nobody holds or awaits it.
    fn prune(&self, key: &K) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        if slots
            .get(key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(key);
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.slots.lock().map_or(0, |slots| slots.len())
    }
}

/// Exclusive access to one key of a [`KeyedLocks`] map.
#[derive(Debug)]
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        // Release the mutex first so the slot's refcount reflects only the map
        // and any waiters.
        drop(self.guard.take());
        self.locks.prune(&self.key);
    }
}

/// Prunes the slot when a `lock` future is cancelled mid-wait.
struct AbandonedWait<'a, K: Eq + Hash + Clone> {
    locks: &'a KeyedLocks<K>,
    key: K,
    armed: bool,
}

impl<K: Eq + Hash + Clone> Drop for AbandonedWait<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            self.locks.prune(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn slot_removed_after_release() {
        let locks: KeyedLocks<u64> = KeyedLocks::new();
        {
            let _guard = locks.lock(1).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks: KeyedLocks<u64> = KeyedLocks::new();
        let _a = locks.lock(1).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(2)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn same_key_waits_for_holder() {
        let locks: Arc<KeyedLocks<u64>> = Arc::new(KeyedLocks::new());
        let guard = locks.lock(7).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock(7)).await;
        assert!(blocked.is_err(), "second lock on the same key must wait");

        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_millis(50), locks.lock(7)).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_no_slot() {
        let locks: Arc<KeyedLocks<u64>> = Arc::new(KeyedLocks::new());
        let guard = locks.lock(3).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _held = locks.lock(3).await;
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(locks.active(), 1);

        // The waiter is woken by the release but cancelled before it runs.
        drop(guard);
        waiter.abort();
        assert!(waiter.await.is_err_and(|e| e.is_cancelled()));
        assert_eq!(locks.active(), 0);
    }
}
