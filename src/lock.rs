//! Keyed async mutexes that serialize producers per input.
//!
//! The registry hands one shared [`AsyncLockSet`] to all callers; holding
//! the key's lock around `try_get` / `register` collapses concurrent misses
//! for the same input into a single producer.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::error::RegistryError;

/// Trait for lock-set keys.
pub trait LockKey: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

// Blanket implementation for all types that satisfy the bounds
impl<T> LockKey for T where T: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

/// Behavior when a task re-enters a key it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReentryMode {
    /// Re-entry from the same task is a contract violation and fails with
    /// [`RegistryError::ReentrantLock`].
    #[default]
    CheckedFail,
}

struct LockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Holders plus waiters; the entry leaves the map when this drops to zero.
    guests: AtomicUsize,
    holder: Mutex<Option<tokio::task::Id>>,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            guests: AtomicUsize::new(0),
            holder: Mutex::new(None),
        }
    }
}

/// A map of async mutexes, one per key, created on demand and removed when
/// the last guest leaves.
pub struct AsyncLockSet<K: LockKey> {
    reentry_mode: ReentryMode,
    entries: Mutex<HashMap<K, Arc<LockEntry>, ahash::RandomState>>,
}

impl<K: LockKey> AsyncLockSet<K> {
    /// An empty lock set with the given re-entry behavior.
    pub fn new(reentry_mode: ReentryMode) -> Self {
        Self {
            reentry_mode,
            entries: Mutex::new(HashMap::with_hasher(ahash::RandomState::new())),
        }
    }

    /// Suspend until the lock for `key` is held.
    ///
    /// The returned guard releases the lock on drop. Cancelling `cancel`
    /// while waiting surfaces [`RegistryError::Cancelled`]; re-entering a
    /// key held by the current task surfaces
    /// [`RegistryError::ReentrantLock`].
    pub async fn acquire(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<LockSetGuard<'_, K>, RegistryError> {
        let entry = {
            let mut entries = self.entries.lock();
            if let Some(existing) = entries.get(&key) {
                match self.reentry_mode {
                    ReentryMode::CheckedFail => {
                        let holder = existing.holder.lock().clone();
                        if let (Some(holder), Some(current)) = (holder, tokio::task::try_id()) {
                            if holder == current {
                                return Err(RegistryError::ReentrantLock {
                                    key: format!("{key:?}"),
                                });
                            }
                        }
                    }
                }
            }
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(LockEntry::new()))
                .clone();
            entry.guests.fetch_add(1, Ordering::Relaxed);
            entry
        };

        let guard = tokio::select! {
            guard = entry.mutex.clone().lock_owned() => guard,
            _ = cancel.cancelled() => {
                self.leave(&key);
                return Err(RegistryError::Cancelled);
            }
        };

        let task = tokio::task::try_id();
        *entry.holder.lock() = task.clone();
        Ok(LockSetGuard {
            set: self,
            entry,
            key,
            guard: Some(guard),
            task,
        })
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no key is currently locked or waited on.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn leave(&self, key: &K) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if entry.guests.fetch_sub(1, Ordering::Relaxed) == 1 {
                entries.remove(key);
            }
        }
    }
}

impl<K: LockKey> Default for AsyncLockSet<K> {
    fn default() -> Self {
        Self::new(ReentryMode::CheckedFail)
    }
}

/// Holds the lock for one key; releases on drop.
pub struct LockSetGuard<'a, K: LockKey> {
    set: &'a AsyncLockSet<K>,
    entry: Arc<LockEntry>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    task: Option<tokio::task::Id>,
}

impl<K: LockKey> LockSetGuard<'_, K> {
    /// The key this guard locks.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: LockKey> Drop for LockSetGuard<'_, K> {
    fn drop(&mut self) {
        {
            let mut holder = self.entry.holder.lock();
            if *holder == self.task {
                *holder = None;
            }
        }
        // Release the mutex before membership cleanup so a queued waiter
        // never observes the entry missing.
        self.guard.take();
        self.set.leave(&self.key);
    }
}
