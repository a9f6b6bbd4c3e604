//! Input fingerprints identifying computations.

use std::any::TypeId;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of the function a computation belongs to.
///
/// Two inputs with the same argument hash but different functions must not
/// collide in the registry, so the function identity is part of every
/// fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(TypeId);

impl FunctionId {
    /// The identity of function type `F`.
    pub fn of<F: 'static>() -> Self {
        Self(TypeId::of::<F>())
    }
}

/// A function whose invocations are memoized as computations.
///
/// The registry treats functions as opaque; it only needs a stable identity
/// and a name for diagnostics.
pub trait Function: Send + Sync + 'static {
    /// Stable identity of this function.
    fn id(&self) -> FunctionId;

    /// Human-readable name, used in debug representations.
    fn name(&self) -> &str;
}

/// Fingerprint uniquely identifying a computation's inputs.
///
/// This combines the function identity with a pre-computed hash of the
/// argument tuple, so the registry never re-hashes user arguments. Inputs
/// are immutable values; equality and hashing use only the function id and
/// the argument hash, while the debug representation is carried for
/// diagnostics.
#[derive(Clone)]
pub struct ComputedInput {
    function: FunctionId,
    key_hash: u64,
    debug_repr: Arc<str>,
}

impl ComputedInput {
    /// Fingerprint the arguments of function type `F`.
    pub fn new<F: 'static, K: Hash + Debug>(key: &K) -> Self {
        Self::from_raw(
            FunctionId::of::<F>(),
            std::any::type_name::<F>(),
            key,
        )
    }

    /// Fingerprint the arguments of a [`Function`] instance.
    pub fn for_function<K: Hash + Debug>(function: &dyn Function, key: &K) -> Self {
        Self::from_raw(function.id(), function.name(), key)
    }

    fn from_raw<K: Hash + Debug>(function: FunctionId, name: &str, key: &K) -> Self {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        let key_hash = hasher.finish();

        Self {
            function,
            key_hash,
            debug_repr: Arc::from(format!("{name}({key:?})")),
        }
    }

    /// 32-bit fold of the argument hash.
    ///
    /// Used for shard selection and counter randomization; never for map
    /// placement.
    #[inline]
    pub fn hash_code(&self) -> u32 {
        (self.key_hash ^ (self.key_hash >> 32)) as u32
    }

    /// Debug representation for error messages and logs.
    pub fn debug_repr(&self) -> &str {
        &self.debug_repr
    }
}

impl Debug for ComputedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.debug_repr)
    }
}

impl Hash for ComputedInput {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.function.hash(state);
        self.key_hash.hash(state);
    }
}

impl PartialEq for ComputedInput {
    fn eq(&self, other: &Self) -> bool {
        self.function == other.function && self.key_hash == other.key_hash
    }
}

impl Eq for ComputedInput {}
