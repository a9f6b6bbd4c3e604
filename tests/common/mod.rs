//! Shared test computation wired to a registry the way a real runtime
//! wires its computed instances: `invalidate()` drives the terminal state
//! transition and then unregisters itself.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use computed_flow::{
    Computed, ComputedInput, ComputedOptions, ComputedRegistry, ComputedState, Function,
    FunctionId, ManualClock, Moment, MomentClock,
};

/// Marker function all test computations belong to.
pub struct TestFunction;

impl Function for TestFunction {
    fn id(&self) -> FunctionId {
        FunctionId::of::<TestFunction>()
    }

    fn name(&self) -> &str {
        "test_function"
    }
}

/// The fingerprint for `key` under [`TestFunction`].
pub fn input_for(key: u64) -> ComputedInput {
    ComputedInput::new::<TestFunction, _>(&key)
}

pub struct TestComputed {
    input: ComputedInput,
    state: Mutex<ComputedState>,
    options: ComputedOptions,
    last_access: AtomicU64,
    clock: Arc<ManualClock>,
    registry: ComputedRegistry,
    this: Weak<TestComputed>,
}

impl TestComputed {
    pub fn new(
        registry: &ComputedRegistry,
        clock: &Arc<ManualClock>,
        key: u64,
        keep_alive: Duration,
    ) -> Arc<TestComputed> {
        Arc::new_cyclic(|this| TestComputed {
            input: input_for(key),
            state: Mutex::new(ComputedState::Consistent),
            options: ComputedOptions::with_keep_alive(keep_alive),
            last_access: AtomicU64::new(clock.now().as_nanos()),
            clock: Arc::clone(clock),
            registry: registry.clone(),
            this: this.clone(),
        })
    }

    pub fn as_computed(self: &Arc<Self>) -> Arc<dyn Computed> {
        Arc::clone(self) as Arc<dyn Computed>
    }
}

impl Computed for TestComputed {
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
        {
            let mut state = self.state.lock();
            if state.is_invalidated() {
                return;
            }
            *state = ComputedState::Invalidated;
        }
        if let Some(this) = self.this.upgrade() {
            let _ = self.registry.unregister(&(this as Arc<dyn Computed>));
        }
    }
}

/// A registry on a manual clock, small enough that prune triggers fire in
/// tests.
pub fn test_registry(clock: &Arc<ManualClock>) -> ComputedRegistry {
    ComputedRegistry::builder()
        .clock(Arc::clone(clock) as Arc<dyn MomentClock>)
        .initial_capacity(11)
        .op_counter_precision(4)
        .build()
}
