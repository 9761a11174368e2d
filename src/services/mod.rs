// Session lifecycle
pub mod opname_sessions;

// Change ledger
pub mod asset_changes;

// BAP generation
pub mod reports;

use dashmap::DashMap;
use sea_orm::{DbErr, SqlErr};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes handed out per key, e.g. per session id.
///
/// Entries live only while someone holds or waits on them; the last
/// [`KeyedGuard`] to drop removes its key.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key of a [`KeyedLocks`].
#[derive(Debug)]
pub struct KeyedGuard<'a, K: Eq + Hash> {
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // Release first so the map holds the only remaining reference.
        drop(self.guard.take());
        // `remove_if` and `entry` share the shard lock, so a task that has
        // already cloned the mutex keeps the entry alive.
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Per-session locks shared by the session and ledger services.
pub type SessionLocks = Arc<KeyedLocks<i64>>;

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::<i64>::new());
        let guard = locks.lock(1).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        let _other = locks.lock(2).await;
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn released_keys_are_removed() {
        let locks = KeyedLocks::<i64>::new();
        let held = locks.lock(1).await;
        drop(locks.lock(2).await);
        assert_eq!(locks.len(), 1);
        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn queued_waiter_keeps_the_entry() {
        let locks = Arc::new(KeyedLocks::<i64>::new());
        let guard = locks.lock(7).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(7).await;
                locks.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert_eq!(locks.len(), 1);

        assert_eq!(waiter.await.unwrap(), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn contended_keys_leave_nothing_behind() {
        let locks = Arc::new(KeyedLocks::<i64>::new());
        let workers: Vec<_> = (0..64)
            .map(|i| {
                let locks = locks.clone();
                tokio::spawn(async move {
                    let _guard = locks.lock(i % 4).await;
                    tokio::task::yield_now().await;
                })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }
        assert!(locks.is_empty());
    }
}
