//! The operation/batcher trait surface (§6.1, §6.2) — the sole seam the
//! core touches on concrete data-store clients, caches, and identity ops,
//! which are themselves out of scope (§1).

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::Exception;
use crate::task::TaskHandle;

/// An opaque leaf work item, identified at batch time by its batcher.
///
/// `batcher()` may fail; the failure is attributed to the yielding task
/// (§6.1). Operations additionally expose themselves as `Any` so that a
/// concrete `Batcher::gen_batch` implementation can downcast the erased
/// operations it was handed back to its own concrete operation type.
pub trait Operation {
    fn batcher(&self) -> Result<Rc<dyn Batcher>, Exception>;

    fn as_any(&self) -> &dyn Any;
}

pub type BoxedOperation = Box<dyn Operation>;

/// Executes a batch of operations that share a batcher identity (§6.2).
///
/// `gen_batch` returns a task whose terminal payload must be a sequence of
/// the same length and order as `operations` — the scheduler enforces this
/// per §4.3 and attributes any violation back to every yielding task.
pub trait Batcher {
    /// Type-erased equality/hash key. Two batchers are the same batch
    /// target iff their keys compare equal (and they must then also agree
    /// on `hash`, enforced by requiring the key itself be `Eq + Hash`).
    fn key(&self) -> Box<dyn DynKey>;

    /// `operations` borrows the arena's own operation nodes rather than
    /// taking ownership, since every operation is still referenced by its
    /// own node (result attribution, §4.3) until the batch completes.
    fn gen_batch(&self, operations: &[&dyn Operation]) -> Result<TaskHandle, Exception>;
}

/// Type-erased `Eq + Hash` object, letting heterogeneous [`Batcher`] impls
/// each supply their own concrete key type (a tuple, a string, an enum...)
/// while the scheduler groups them in one `HashMap` keyed by batcher
/// identity (§4.5 "The batcher keying is by the Batcher equality/hash
/// contract, not identity").
pub trait DynKey {
    fn eq_dyn(&self, other: &dyn DynKey) -> bool;
    fn hash_dyn(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Eq + Hash + 'static> DynKey for T {
    fn eq_dyn(&self, other: &dyn DynKey) -> bool {
        match other.as_any().downcast_ref::<T>() {
            Some(other) => self == other,
            None => false,
        }
    }

    fn hash_dyn(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }
}

/// Wraps a `Box<dyn DynKey>` so it can itself be used as a `HashMap` key.
pub struct BatcherKey(pub Box<dyn DynKey>);

impl PartialEq for BatcherKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_dyn(other.0.as_ref())
    }
}

impl Eq for BatcherKey {}

impl Hash for BatcherKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_dyn(state);
    }
}

impl fmt::Debug for BatcherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatcherKey(..)")
    }
}
