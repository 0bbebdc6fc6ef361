//! Memoized task construction (§6.4), grounded in the original
//! `cached_generator` decorator: calling the same logical operation twice
//! with the same key should reuse one task, not run the underlying work
//! twice.
//!
//! Two caches are kept deliberately separate (§9 "Open question
//! (resolved)"):
//!
//! - `sticky_errors` never expires. If construction itself failed for a key
//!   (a bad argument, not a task-body exception), it will fail identically
//!   every time, so there is no reason to retry it — ever, across any
//!   number of scheduler runs.
//! - `per_run_tasks` is scoped to a single [`RunToken`]: a live `TaskHandle`
//!   must never be handed to two different scheduler runs (§6.3), since a
//!   task already closed by the first run cannot be resumed by the second.
//!   A fresh token invalidates the whole cache rather than individual
//!   entries.
//!
//! Rust's static typing does away with the original's separate hashable-key
//! normalization step for arbitrary nested lists/dicts/sets: callers supply
//! any `K: Eq + Hash + Clone`, and the small [`OrderedKey`]/[`UnorderedKey`]
//! wrappers below cover the common composite-key cases (sequence, set) the
//! original's `_to_hashable_value` existed to support.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Exception;
use crate::shared_task::guarded;
use crate::task::TaskHandle;

/// An opaque marker for "one scheduler run". The executor mints a fresh
/// token per `execute`/`executev` call (§6.3); anything memoized against an
/// older token is treated as expired rather than handed to the new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken(u64);

static NEXT_RUN: AtomicU64 = AtomicU64::new(0);

pub fn next_run_token() -> RunToken {
    RunToken(NEXT_RUN.fetch_add(1, Ordering::Relaxed))
}

pub struct Memo<K> {
    sticky_errors: RefCell<HashMap<K, Exception>>,
    per_run_tasks: RefCell<HashMap<K, TaskHandle>>,
    current_run: Cell<Option<RunToken>>,
}

impl<K: Eq + Hash + Clone> Memo<K> {
    pub fn new() -> Self {
        Self {
            sticky_errors: RefCell::new(HashMap::new()),
            per_run_tasks: RefCell::new(HashMap::new()),
            current_run: Cell::new(None),
        }
    }

    /// Returns the memoized task for `key` under `run`, constructing it with
    /// `make` on a miss. A sticky construction error from any prior run
    /// short-circuits `make` entirely.
    pub fn get_or_create(
        &self,
        key: K,
        run: RunToken,
        make: impl FnOnce() -> Result<TaskHandle, Exception>,
    ) -> Result<TaskHandle, Exception> {
        if let Some(exc) = self.sticky_errors.borrow().get(&key) {
            return Err(exc.clone());
        }

        if self.current_run.get() != Some(run) {
            self.per_run_tasks.borrow_mut().clear();
            self.current_run.set(Some(run));
        }

        if let Some(handle) = self.per_run_tasks.borrow().get(&key) {
            return Ok(handle.clone());
        }

        match make() {
            Ok(handle) => {
                let handle = guarded(handle);
                self.per_run_tasks.borrow_mut().insert(key, handle.clone());
                Ok(handle)
            }
            Err(exc) => {
                self.sticky_errors.borrow_mut().insert(key, exc.clone());
                Err(exc)
            }
        }
    }
}

impl<K: Eq + Hash + Clone> Default for Memo<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased invalidation hook so [`MemoCache`] can hold `Memo<K>`s of
/// different concrete key types in one list.
trait Invalidate {
    fn invalidate(&self);
}

impl<K: Eq + Hash + Clone> Invalidate for Memo<K> {
    fn invalidate(&self) {
        self.sticky_errors.borrow_mut().clear();
        self.per_run_tasks.borrow_mut().clear();
        self.current_run.set(None);
    }
}

/// Aggregates several [`Memo`]s so they can be invalidated together,
/// mirroring the original's `GeneratorCache` (§6.4, "An optional external
/// cache object may be used to invalidate all cached tasks it owns"). Holds
/// only weak references: a `MemoCache` does not keep a `Memo` alive, it just
/// reaches into whichever ones are still registered when cleared.
#[derive(Default)]
pub struct MemoCache {
    members: RefCell<Vec<Weak<dyn Invalidate>>>,
}

impl MemoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `memo` so a future `clear()` also invalidates it.
    pub fn register<K: Eq + Hash + Clone + 'static>(&self, memo: &Rc<Memo<K>>) {
        self.members.borrow_mut().push(Rc::downgrade(memo) as Weak<dyn Invalidate>);
    }

    /// Clears the sticky-error and per-run-task caches of every `Memo`
    /// still alive and registered with this cache, and drops any
    /// now-dangling registrations.
    pub fn clear(&self) {
        for member in self.members.borrow().iter() {
            if let Some(memo) = member.upgrade() {
                memo.invalidate();
            }
        }
        self.members.borrow_mut().retain(|member| member.strong_count() > 0);
    }
}

/// A hashable key built from an ordered sequence of sub-keys, for batchers
/// whose identity is a composite of several values (e.g. a table name and a
/// row id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderedKey<T>(pub Vec<T>);

/// A hashable key built from an unordered collection of sub-keys, for the
/// rarer case where the same batch target can be reached by inputs listed
/// in different orders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnorderedKey<T: Ord>(BTreeSet<T>);

impl<T: Ord> UnorderedKey<T> {
    pub fn new(values: impl IntoIterator<Item = T>) -> Self {
        Self(values.into_iter().collect())
    }
}
