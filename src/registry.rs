//! The computation registry: a concurrent, weakly-referenced map from
//! input fingerprints to live computations.
//!
//! Uses papaya's lock-free HashMap internally. Reads are O(1) lookups;
//! removals go through exact compare-and-swap updates so concurrent
//! registration, invalidation, and pruning converge without locks on the
//! hot path. The strong pin lives in a small per-entry cell rather than in
//! the map value itself: the map's deferred reclamation of replaced values
//! must not extend a computation's lifetime past its demotion.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, LazyLock};

use papaya::{Compute, Operation};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{CoarseClock, Moment, MomentClock};
use crate::computed::Computed;
use crate::counter::StochasticCounter;
use crate::error::RegistryError;
use crate::handle::{HandlePool, WeakHandle};
use crate::input::{ComputedInput, Function};
use crate::lock::AsyncLockSet;

/// Iterations of the `register` retry loop before yielding to the scheduler.
const REGISTER_SPIN_BUDGET: u32 = 64;

/// Value type stored in the map.
///
/// `pin` holds the strong reference keeping the computation alive; an empty
/// pin means the entry was demoted to weak-only. `handle` always points at
/// the computation the entry was created or promoted for.
#[derive(Clone)]
struct Entry {
    pin: Arc<Mutex<Option<Arc<dyn Computed>>>>,
    handle: WeakHandle,
}

impl Entry {
    fn new(computed: Arc<dyn Computed>, handle: WeakHandle) -> Self {
        Self {
            pin: Arc::new(Mutex::new(Some(computed))),
            handle,
        }
    }

    fn pinned(&self) -> Option<Arc<dyn Computed>> {
        self.pin.lock().clone()
    }

    /// Restore the strong pin after a weak hit.
    fn promote(&self, target: &Arc<dyn Computed>) {
        let mut pin = self.pin.lock();
        if pin.is_none() {
            *pin = Some(Arc::clone(target));
        }
    }

    /// Drop the strong pin if the computation has been idle past its
    /// keep-alive window. The check and the demotion are a single atomic
    /// step so a concurrent `touch` + promote is never undone.
    fn demote_if_idle(&self, now: Moment) -> bool {
        let mut pin = self.pin.lock();
        match &*pin {
            Some(computed) => {
                let idle_after = computed
                    .last_access_time()
                    .saturating_add(computed.options().keep_alive_time);
                if idle_after < now {
                    *pin = None;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Drop the strong pin unconditionally; used when the entry leaves the
    /// map, so stale clones awaiting reclamation cannot keep the
    /// computation alive.
    fn clear(&self) {
        *self.pin.lock() = None;
    }

    /// Identity comparison used by exact removals.
    fn same_entry(&self, other: &Entry) -> bool {
        Arc::ptr_eq(&self.pin, &other.pin) && self.handle.ptr_eq(&other.handle)
    }
}

struct RegistryInner {
    storage: papaya::HashMap<ComputedInput, Entry, ahash::RandomState>,
    handle_pool: HandlePool,
    op_counter: StochasticCounter,
    prune_threshold: AtomicI64,
    /// Held only to schedule a prune and to refresh the threshold.
    prune_lock: Mutex<()>,
    prune_running: AtomicBool,
    locks: Arc<AsyncLockSet<ComputedInput>>,
    clock: Arc<dyn MomentClock>,
    initial_capacity: usize,
}

impl RegistryInner {
    /// Remove `key` only if the stored entry is exactly `expected`; on
    /// success the entry's pin is cleared and its handle returned to the
    /// pool.
    fn remove_exact(&self, key: &ComputedInput, expected: &Entry, shard: u32) -> bool {
        let removed = matches!(
            self.storage.pin().compute(key.clone(), |current| match current {
                Some((_, cur)) if cur.same_entry(expected) => Operation::Remove,
                _ => Operation::Abort(()),
            }),
            Compute::Removed(..)
        );
        if removed {
            expected.clear();
            self.handle_pool.release(expected.handle.clone(), shard);
        }
        removed
    }

    /// One sweep over the map: drop collected weak entries, demote idle
    /// strong-pinned ones. An entry that changes concurrently is skipped;
    /// the next pass re-reads it.
    fn prune_pass(&self) {
        let now = self.clock.now();
        let mut examined = 0usize;
        let mut removed = 0usize;
        let mut demoted = 0usize;
        {
            let guard = self.storage.pin();
            for (key, entry) in guard.iter() {
                examined += 1;
                if entry.handle.target().is_none() {
                    let shard = key.hash_code().wrapping_add(rand::random::<u32>());
                    if self.remove_exact(key, entry, shard) {
                        removed += 1;
                    }
                } else if entry.demote_if_idle(now) {
                    demoted += 1;
                }
            }
        }
        {
            let _guard = self.prune_lock.lock();
            self.refresh_prune_threshold();
            self.op_counter.set_approx_value(0);
            self.prune_running.store(false, Ordering::Release);
        }
        debug!(examined, removed, demoted, "prune pass finished");
    }

    fn refresh_prune_threshold(&self) {
        let capacity = self.initial_capacity.max(self.storage.pin().len());
        let threshold = (capacity as i64).min(i64::from(i32::MAX / 2));
        self.prune_threshold.store(threshold, Ordering::Relaxed);
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.handle_pool.drain();
    }
}

/// Registry of live computations, keyed by input fingerprint.
///
/// At most one live computation per input is registered at any instant.
/// Computations are owned weakly: a strong pin lasts only until the
/// keep-alive window after the last access expires, after which the
/// background pruner demotes the entry and the computation lives or dies
/// with its outside references.
///
/// This is cheap to clone - all data is behind `Arc`.
pub struct ComputedRegistry {
    inner: Arc<RegistryInner>,
}

impl Clone for ComputedRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for ComputedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: LazyLock<ComputedRegistry> = LazyLock::new(ComputedRegistry::new);

impl ComputedRegistry {
    /// A registry with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// A builder for custom configuration.
    pub fn builder() -> ComputedRegistryBuilder {
        ComputedRegistryBuilder::default()
    }

    /// The process-wide registry.
    ///
    /// Every operation is instance-scoped, so code paths should accept an
    /// explicit registry and use this only as the outermost default.
    pub fn global() -> &'static ComputedRegistry {
        &GLOBAL
    }

    /// Look up the live computation for `key`.
    ///
    /// Returns only non-invalidated computations; an invalidated one
    /// removes itself via `invalidate()` -> [`unregister`](Self::unregister)
    /// before callers can observe it here. The caller still verifies
    /// consistency under its own invariants after use.
    pub fn try_get(&self, key: &ComputedInput) -> Option<Arc<dyn Computed>> {
        let random = randomized(key);
        self.on_operation(random);
        let inner = &self.inner;
        let guard = inner.storage.pin();
        let entry = guard.get(key)?;
        if let Some(computed) = entry.pinned() {
            computed.touch();
            return Some(computed);
        }
        match entry.handle.target() {
            Some(target) => {
                target.touch();
                // Restoring the pin can race a concurrent removal; the
                // observed target is returned either way.
                entry.promote(&target);
                Some(target)
            }
            None => {
                inner.remove_exact(key, entry, random);
                None
            }
        }
    }

    /// Publish `computed` as the live entry for its input, evicting any
    /// predecessor.
    ///
    /// The retry loop terminates when the map reflects `computed` or the
    /// computation is observed invalidated.
    pub fn register(&self, computed: Arc<dyn Computed>) {
        let key = computed.input().clone();
        let random = randomized(&key);
        self.on_operation(random);
        let inner = &self.inner;
        let guard = inner.storage.pin();
        let mut spins = 0u32;
        loop {
            if computed.state().is_invalidated() {
                return;
            }
            match guard.get(&key) {
                Some(entry) => match entry.handle.target() {
                    Some(target) if Arc::ptr_eq(&target, &computed) => return,
                    Some(target) if !target.state().is_invalidated() => {
                        // Evict the predecessor; its invalidation normally
                        // re-enters unregister.
                        target.invalidate();
                    }
                    _ => {
                        // Collected or invalidated occupant.
                        inner.remove_exact(&key, entry, random);
                    }
                },
                None => {
                    let handle = inner.handle_pool.acquire(&computed, random);
                    let fresh = Entry::new(Arc::clone(&computed), handle);
                    match guard.try_insert(key.clone(), fresh) {
                        Ok(inserted) => {
                            if computed.state().is_invalidated() {
                                // Invalidation raced the insert; take the
                                // just-inserted entry back out.
                                inner.remove_exact(&key, inserted, random);
                            } else {
                                trace!(key = %key.debug_repr(), "registered computation");
                            }
                            return;
                        }
                        Err(err) => {
                            let lost = err.not_inserted;
                            lost.clear();
                            inner.handle_pool.release(lost.handle, random);
                        }
                    }
                }
            }
            spins += 1;
            if spins > REGISTER_SPIN_BUDGET {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Remove the entry for an invalidated computation.
    ///
    /// Returns whether removal happened. Calling this for a computation
    /// that is not invalidated is a contract violation: removing a
    /// reachable entry would break the at-most-one-live guarantee.
    pub fn unregister(&self, computed: &Arc<dyn Computed>) -> Result<bool, RegistryError> {
        let state = computed.state();
        if !state.is_invalidated() {
            return Err(RegistryError::WrongComputedState { actual: state });
        }
        let key = computed.input();
        let random = randomized(key);
        self.on_operation(random);
        let inner = &self.inner;
        let guard = inner.storage.pin();
        let Some(entry) = guard.get(key) else {
            return Ok(false);
        };
        if let Some(target) = entry.handle.target() {
            if !Arc::ptr_eq(&target, computed) {
                // A replacement already owns the slot.
                return Ok(false);
            }
        }
        if inner.remove_exact(key, entry, random) {
            trace!(key = %key.debug_repr(), "unregistered computation");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// The lock set serializing producers per input.
    ///
    /// One set is shared across all functions; inputs already carry their
    /// function identity, so per-input locking is globally unambiguous.
    pub fn locks_for(&self, _function: &dyn Function) -> Arc<AsyncLockSet<ComputedInput>> {
        Arc::clone(&self.inner.locks)
    }

    /// Run one prune pass synchronously, unless a pass is already running.
    pub fn prune(&self) {
        if self.inner.prune_running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.prune_pass();
    }

    /// Number of entries currently in the map, collected or not.
    pub fn len(&self) -> usize {
        self.inner.storage.pin().len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.storage.pin().is_empty()
    }

    /// The handle pool backing this registry, exposed for diagnostics.
    pub fn handle_pool(&self) -> &HandlePool {
        &self.inner.handle_pool
    }

    fn on_operation(&self, random: u32) {
        if let Some(approx) = self.inner.op_counter.increment(random) {
            if approx > self.inner.prune_threshold.load(Ordering::Relaxed) {
                self.try_prune();
            }
        }
    }

    fn try_prune(&self) {
        let inner = &self.inner;
        {
            let _guard = inner.prune_lock.lock();
            if inner.op_counter.approx_value() <= inner.prune_threshold.load(Ordering::Relaxed) {
                return;
            }
            inner.op_counter.set_approx_value(0);
            if inner.prune_running.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        let task = Arc::clone(inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { task.prune_pass() });
            }
            Err(_) => task.prune_pass(),
        }
    }
}

fn randomized(key: &ComputedInput) -> u32 {
    key.hash_code() ^ rand::random::<u32>()
}

/// Builder for [`ComputedRegistry`].
#[derive(Default)]
pub struct ComputedRegistryBuilder {
    clock: Option<Arc<dyn MomentClock>>,
    initial_capacity: Option<usize>,
    handle_shard_capacity: Option<usize>,
    op_counter_precision: Option<u32>,
    locks: Option<Arc<AsyncLockSet<ComputedInput>>>,
}

impl ComputedRegistryBuilder {
    /// Clock used for keep-alive bookkeeping. Defaults to [`CoarseClock`].
    pub fn clock(mut self, clock: Arc<dyn MomentClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Initial map capacity. Defaults to the largest prime at most
    /// `min(16384, next_pow2(cpu_count) * 128)`; prime sizing reduces
    /// clustering under the map's hashing strategy.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Recycled weak-handle slots kept per pool shard.
    pub fn handle_shard_capacity(mut self, capacity: usize) -> Self {
        self.handle_shard_capacity = Some(capacity);
        self
    }

    /// Sampling period of the operation counter driving the prune trigger.
    pub fn op_counter_precision(mut self, precision: u32) -> Self {
        self.op_counter_precision = Some(precision);
        self
    }

    /// Lock set shared with other registries, if any.
    pub fn lock_set(mut self, locks: Arc<AsyncLockSet<ComputedInput>>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Build the registry.
    pub fn build(self) -> ComputedRegistry {
        let initial_capacity = self.initial_capacity.unwrap_or_else(default_capacity);
        let storage = papaya::HashMap::builder()
            .capacity(initial_capacity)
            .hasher(ahash::RandomState::new())
            .build();
        let inner = RegistryInner {
            storage,
            handle_pool: HandlePool::weak(
                self.handle_shard_capacity
                    .unwrap_or(HandlePool::DEFAULT_SHARD_CAPACITY),
            ),
            op_counter: StochasticCounter::new(
                self.op_counter_precision
                    .unwrap_or(StochasticCounter::DEFAULT_PRECISION),
            ),
            prune_threshold: AtomicI64::new(
                (initial_capacity as i64).min(i64::from(i32::MAX / 2)),
            ),
            prune_lock: Mutex::new(()),
            prune_running: AtomicBool::new(false),
            locks: self
                .locks
                .unwrap_or_else(|| Arc::new(AsyncLockSet::default())),
            clock: self.clock.unwrap_or_else(|| Arc::new(CoarseClock)),
            initial_capacity,
        };
        ComputedRegistry {
            inner: Arc::new(inner),
        }
    }
}

fn default_capacity() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let bound = cpus.next_power_of_two().saturating_mul(128).min(16_384);
    largest_prime_at_most(bound)
}

fn largest_prime_at_most(bound: usize) -> usize {
    let mut candidate = bound.max(2);
    loop {
        if is_prime(candidate) {
            return candidate;
        }
        candidate -= 1;
    }
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut divisor = 3;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::computed::{ComputedOptions, ComputedState};
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct StubFn;

    /// Minimal computation for registry unit tests; `invalidate` flips the
    /// state without re-entering the registry (integration tests cover the
    /// full callback loop).
    struct Stub {
        input: ComputedInput,
        state: Mutex<ComputedState>,
        options: ComputedOptions,
        last_access: AtomicU64,
        clock: Arc<ManualClock>,
    }

    impl Stub {
        fn new(clock: &Arc<ManualClock>, key: u32, keep_alive: Duration) -> Arc<Stub> {
            Arc::new(Stub {
                input: ComputedInput::new::<StubFn, _>(&key),
                state: Mutex::new(ComputedState::Consistent),
                options: ComputedOptions::with_keep_alive(keep_alive),
                last_access: AtomicU64::new(clock.now().as_nanos()),
                clock: Arc::clone(clock),
            })
        }
    }

    impl Computed for Stub {
        fn state(&self) -> ComputedState {
            *self.state.lock()
        }
        fn input(&self) -> &ComputedInput {
            &self.input
        }
        fn options(&self) -> ComputedOptions {
            self.options
        }
        fn last_access_time(&self) -> Moment {
            Moment::from_nanos(self.last_access.load(Ordering::Relaxed))
        }
        fn touch(&self) {
            self.last_access
                .store(self.clock.now().as_nanos(), Ordering::Relaxed);
        }
        fn invalidate(&self) {
            *self.state.lock() = ComputedState::Invalidated;
        }
    }

    fn registry_with(clock: &Arc<ManualClock>) -> ComputedRegistry {
        ComputedRegistry::builder()
            .clock(Arc::clone(clock) as Arc<dyn MomentClock>)
            .initial_capacity(7)
            .build()
    }

    fn as_computed(stub: &Arc<Stub>) -> Arc<dyn Computed> {
        Arc::clone(stub) as Arc<dyn Computed>
    }

    #[test]
    fn test_miss_returns_none() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let key = ComputedInput::new::<StubFn, _>(&1u32);
        assert!(registry.try_get(&key).is_none());
    }

    #[test]
    fn test_register_then_hit_fast_path() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_secs(60));
        registry.register(as_computed(&stub));
        assert_eq!(registry.len(), 1);

        clock.advance(Duration::from_millis(5));
        let hit = registry.try_get(stub.input()).unwrap();
        assert!(Arc::ptr_eq(&hit, &as_computed(&stub)));
        // The hit refreshed the access time.
        assert_eq!(stub.last_access_time(), clock.now());
    }

    #[test]
    fn test_register_is_idempotent_for_same_instance() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_secs(60));
        registry.register(as_computed(&stub));
        registry.register(as_computed(&stub));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.handle_pool().acquired(), 1);
    }

    #[test]
    fn test_register_evicts_valid_predecessor() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let first = Stub::new(&clock, 1, Duration::from_secs(60));
        let second = Stub::new(&clock, 1, Duration::from_secs(60));
        registry.register(as_computed(&first));
        registry.register(as_computed(&second));

        assert!(first.state().is_invalidated());
        let live = registry.try_get(second.input()).unwrap();
        assert!(Arc::ptr_eq(&live, &as_computed(&second)));
        assert_eq!(registry.len(), 1);
        // The predecessor's handle went back to the pool exactly once.
        assert_eq!(registry.handle_pool().released(), 1);
    }

    #[test]
    fn test_register_invalidated_is_a_noop() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_secs(60));
        stub.invalidate();
        registry.register(as_computed(&stub));
        assert!(registry.is_empty());
        assert_eq!(registry.handle_pool().acquired(), 0);
    }

    #[test]
    fn test_unregister_requires_invalidated_state() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_secs(60));
        registry.register(as_computed(&stub));

        let err = registry.unregister(&as_computed(&stub)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::WrongComputedState {
                actual: ComputedState::Consistent
            }
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_removes_and_releases() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_secs(60));
        registry.register(as_computed(&stub));

        stub.invalidate();
        assert!(registry.unregister(&as_computed(&stub)).unwrap());
        assert!(registry.is_empty());
        assert_eq!(registry.handle_pool().released(), 1);
        // Second call finds nothing.
        assert!(!registry.unregister(&as_computed(&stub)).unwrap());
    }

    #[test]
    fn test_unregister_spares_replacement() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let first = Stub::new(&clock, 1, Duration::from_secs(60));
        let second = Stub::new(&clock, 1, Duration::from_secs(60));
        registry.register(as_computed(&first));
        registry.register(as_computed(&second));

        // first is already invalidated and evicted; unregistering it must
        // not disturb the replacement.
        assert!(!registry.unregister(&as_computed(&first)).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_prune_demotes_idle_entry() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_millis(100));
        registry.register(as_computed(&stub));

        clock.advance(Duration::from_millis(200));
        registry.prune();

        let guard = registry.inner.storage.pin();
        let entry = guard.get(stub.input()).unwrap();
        assert!(entry.pinned().is_none(), "strong pin should be dropped");
        assert!(entry.handle.target().is_some(), "weak handle survives");
    }

    #[test]
    fn test_prune_keeps_fresh_entry_pinned() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_secs(60));
        registry.register(as_computed(&stub));

        clock.advance(Duration::from_millis(200));
        registry.prune();

        let guard = registry.inner.storage.pin();
        let entry = guard.get(stub.input()).unwrap();
        assert!(entry.pinned().is_some());
    }

    #[test]
    fn test_weak_hit_promotes_back_to_strong() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_millis(10));
        registry.register(as_computed(&stub));

        clock.advance(Duration::from_millis(50));
        registry.prune();

        let hit = registry.try_get(stub.input()).unwrap();
        assert!(Arc::ptr_eq(&hit, &as_computed(&stub)));
        let guard = registry.inner.storage.pin();
        let entry = guard.get(stub.input()).unwrap();
        assert!(entry.pinned().is_some(), "weak hit restores the pin");
    }

    #[test]
    fn test_collected_weak_is_removed_on_try_get() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::ZERO);
        let input = stub.input().clone();
        registry.register(as_computed(&stub));

        clock.advance(Duration::from_millis(1));
        registry.prune();
        drop(stub);

        assert!(registry.try_get(&input).is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.handle_pool().released(), 1);
    }

    #[test]
    fn test_prune_removes_collected_weak() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::ZERO);
        registry.register(as_computed(&stub));

        clock.advance(Duration::from_millis(1));
        registry.prune();
        drop(stub);
        registry.prune();

        assert!(registry.is_empty());
        assert_eq!(registry.handle_pool().released(), 1);
    }

    #[test]
    fn test_entry_invariant_handle_matches_pin() {
        let clock = Arc::new(ManualClock::new());
        let registry = registry_with(&clock);
        let stub = Stub::new(&clock, 1, Duration::from_secs(60));
        registry.register(as_computed(&stub));

        let guard = registry.inner.storage.pin();
        let entry = guard.get(stub.input()).unwrap();
        let pinned = entry.pinned().unwrap();
        let target = entry.handle.target().unwrap();
        assert!(Arc::ptr_eq(&pinned, &target));
    }

    #[test]
    fn test_prune_trigger_fires_from_operations() {
        let clock = Arc::new(ManualClock::new());
        let registry = ComputedRegistry::builder()
            .clock(Arc::clone(&clock) as Arc<dyn MomentClock>)
            .initial_capacity(2)
            .op_counter_precision(4)
            .build();
        let stub = Stub::new(&clock, 1, Duration::ZERO);
        let input = stub.input().clone();
        registry.register(as_computed(&stub));
        clock.advance(Duration::from_millis(1));
        registry.prune();
        drop(stub);
        assert_eq!(registry.len(), 1, "weak-only entry remains before sweep");

        // No runtime here, so a triggered prune runs inline; with threshold 2
        // and sampling period 4 a few hundred misses are ample.
        let other = ComputedInput::new::<StubFn, _>(&999u32);
        for _ in 0..512 {
            registry.try_get(&other);
        }
        assert!(registry.is_empty(), "collected entry should be swept");
    }

    #[test]
    fn test_prime_capacity_helpers() {
        assert_eq!(largest_prime_at_most(16_384), 16_381);
        assert_eq!(largest_prime_at_most(128), 127);
        assert_eq!(largest_prime_at_most(2), 2);
        assert!(is_prime(16_381));
        assert!(!is_prime(16_383));
        let capacity = default_capacity();
        assert!(is_prime(capacity));
        assert!(capacity <= 16_384);
    }
}
