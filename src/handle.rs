//! Re-bindable weak handles and the sharded pool that recycles them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::computed::Computed;
use crate::error::RegistryError;

/// Reachability strength of pooled handles.
///
/// The registry's pool only ever hands out weak handles; the enum exists so
/// a misconfigured pool fails at construction rather than silently pinning
/// every computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStrength {
    /// Handle does not keep its target alive.
    Weak,
    /// Handle pins its target. Not supported by [`HandlePool`].
    Strong,
}

#[derive(Debug)]
struct HandleSlot {
    target: RwLock<Option<Weak<dyn Computed>>>,
}

/// A weak reference whose target slot can be re-bound by the pool.
///
/// Cloning shares the slot; two clones observe the same target and compare
/// equal under [`WeakHandle::ptr_eq`].
#[derive(Debug, Clone)]
pub struct WeakHandle {
    slot: Arc<HandleSlot>,
}

impl WeakHandle {
    /// Upgrade the current target, if it is still alive.
    pub fn target(&self) -> Option<Arc<dyn Computed>> {
        self.slot.target.read().as_ref()?.upgrade()
    }

    /// Whether two handles share the same slot.
    #[inline]
    pub fn ptr_eq(&self, other: &WeakHandle) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    fn bind(&self, target: &Arc<dyn Computed>) {
        *self.slot.target.write() = Some(Arc::downgrade(target));
    }

    fn unbind(&self) {
        *self.slot.target.write() = None;
    }
}

const SHARD_COUNT: usize = 16;

/// Sharded free-list pool of [`WeakHandle`]s.
///
/// Shards are selected by a caller-supplied random value (the registry
/// passes randomized key hashes) so unrelated keys spread across free
/// lists. Each shard holds at most `shard_capacity` recycled slots;
/// overflow is discarded. A slot is recycled only while the pool holds its
/// sole reference, so a handle still observable through a stale map entry
/// is never re-bound under a reader.
#[derive(Debug)]
pub struct HandlePool {
    shards: Vec<Mutex<Vec<Arc<HandleSlot>>>>,
    shard_capacity: usize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl HandlePool {
    /// Recycled slots kept per shard by default.
    pub const DEFAULT_SHARD_CAPACITY: usize = 64;

    /// A pool of handles of the given strength.
    ///
    /// Only [`HandleStrength::Weak`] is supported; anything else is an
    /// [`RegistryError::InvalidConfiguration`].
    pub fn new(strength: HandleStrength, shard_capacity: usize) -> Result<Self, RegistryError> {
        match strength {
            HandleStrength::Weak => Ok(Self::weak(shard_capacity)),
            other => Err(RegistryError::InvalidConfiguration {
                reason: format!("handle pool requires Weak strength, got {other:?}"),
            }),
        }
    }

    pub(crate) fn weak(shard_capacity: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Vec::new())).collect(),
            shard_capacity,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// A handle bound to `target`, recycled from the shard's free list when
    /// possible.
    pub fn acquire(&self, target: &Arc<dyn Computed>, shard: u32) -> WeakHandle {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let slot = self.shard(shard).lock().pop();
        let handle = WeakHandle {
            slot: slot.unwrap_or_else(|| {
                Arc::new(HandleSlot {
                    target: RwLock::new(None),
                })
            }),
        };
        handle.bind(target);
        handle
    }

    /// Unbind `handle` and return its slot to the shard's free list.
    ///
    /// Slots still referenced elsewhere (a not-yet-reclaimed map entry, a
    /// concurrent reader) are discarded instead of recycled.
    pub fn release(&self, handle: WeakHandle, shard: u32) {
        self.released.fetch_add(1, Ordering::Relaxed);
        handle.unbind();
        let mut slot = handle.slot;
        if Arc::get_mut(&mut slot).is_some() {
            let mut free = self.shard(shard).lock();
            if free.len() < self.shard_capacity {
                free.push(slot);
            }
        }
    }

    /// Handles handed out so far.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Handles returned so far (recycled or discarded).
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// Recycled slots currently pooled.
    pub fn pooled(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub(crate) fn drain(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    #[inline]
    fn shard(&self, shard: u32) -> &Mutex<Vec<Arc<HandleSlot>>> {
        &self.shards[shard as usize & (SHARD_COUNT - 1)]
    }
}
