//! Computed-Flow: an incremental computation cache with dependency-driven
//! invalidation.
//!
//! This crate is the engine under a reactive data-flow runtime: derived
//! values (*computations*) are memoized by input identity, tracked for weak
//! reachability, and dropped from the cache when their inputs change. Reads
//! stay O(1) lookups until an upstream change makes a cached value
//! inconsistent.
//!
//! # Key Features
//!
//! - **Lock-free lookups**: [`ComputedRegistry::try_get`] is a concurrent
//!   map read plus an access-time touch
//! - **At-most-one live computation per input**: [`ComputedRegistry::register`]
//!   evicts and invalidates any predecessor for the same input
//! - **Weak ownership**: entries pin a computation only for its keep-alive
//!   window; after that the background pruner demotes them to weak-only
//! - **Producer coalescing**: a shared [`AsyncLockSet`] serializes cache
//!   misses so concurrent readers collapse into a single producer
//! - **Update pacing**: [`UpdateDelayer`] coalesces invalidation bursts and
//!   backs off after failed re-reads
//!
//! # Example
//!
//! ```ignore
//! use computed_flow::{ComputedInput, ComputedRegistry};
//!
//! let registry = ComputedRegistry::new();
//! let input = ComputedInput::new::<MyFunction, _>(&("user", 42));
//!
//! let locks = registry.locks_for(&my_function);
//! let _guard = locks.acquire(input.clone(), &cancel).await?;
//! let computed = match registry.try_get(&input) {
//!     Some(computed) => computed,
//!     None => {
//!         let computed = produce(&input);
//!         registry.register(computed.clone());
//!         computed
//!     }
//! };
//! ```
//!
//! # Ownership Model
//!
//! The registry never owns a computation outright. A freshly registered
//! entry holds a strong pin; once the computation has been idle past its
//! `keep_alive_time`, a prune pass drops the pin and only the weak handle
//! remains. From then on the computation lives exactly as long as outside
//! references do, and a collected entry is swept on the next lookup or
//! prune pass.

mod clock;
mod computed;
mod counter;
mod delayer;
mod error;
mod handle;
mod input;
mod lock;
mod registry;

pub use clock::{CoarseClock, ManualClock, Moment, MomentClock};
pub use computed::{Computed, ComputedOptions, ComputedState};
pub use counter::StochasticCounter;
pub use delayer::{UpdateDelayer, UpdateDelayerOptions};
pub use error::RegistryError;
pub use handle::{HandlePool, HandleStrength, WeakHandle};
pub use input::{ComputedInput, Function, FunctionId};
pub use lock::{AsyncLockSet, LockKey, LockSetGuard, ReentryMode};
pub use registry::{ComputedRegistry, ComputedRegistryBuilder};
