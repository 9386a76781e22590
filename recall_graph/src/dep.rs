// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dependency leaves without a wrapped function.
//!
//! A [`Dep`] tracks "the thing identified by this key" for any number of
//! memoized computations. Touching a key during a recomputation records the
//! computation as depending on it; dirtying the key later invalidates every
//! recorded computation at once. Use it to tie external mutable state (a
//! file, a row, a setting) into the graph without wrapping a function around
//! it.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::context;
use crate::entry::{self, DepMembership, EntryHandle, EntryId, Unsubscribe, next_graph_id};
use crate::error::SubscribeError;

/// How [`Dep::dirty_with`] invalidates each member computation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DirtyMethod {
    /// Mark dirty; the member recomputes on its next read.
    #[default]
    SetDirty,
    /// Dismantle the member entry in place.
    Dispose,
    /// Evict the member entry from its owning cache.
    Forget,
}

/// One key's member set, with its subscription lifecycle.
struct DepSet {
    id: u64,
    members: RefCell<HashMap<EntryId, EntryHandle>>,
    unsubscribe: RefCell<Option<Unsubscribe>>,
}

impl DepSet {
    fn new() -> Self {
        Self {
            id: next_graph_id(),
            members: RefCell::new(HashMap::new()),
            unsubscribe: RefCell::new(None),
        }
    }
}

impl DepMembership for DepSet {
    fn membership_id(&self) -> u64 {
        self.id
    }

    fn remove_member(&self, id: EntryId) {
        self.members.borrow_mut().remove(&id);
    }
}

struct DepInner<K>
where
    K: Clone + Eq + Hash,
{
    by_key: RefCell<HashMap<K, Rc<DepSet>>>,
    subscribe: Option<Box<dyn Fn(&K) -> Result<Unsubscribe, SubscribeError>>>,
}

/// A keyed set of dependency leaves.
///
/// Cheaply cloneable; clones share the same key table.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use recall_graph::{Dep, RecursiveDependencyError, wrap};
///
/// let files: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(vec!["fn main() {}"]));
/// let file_dep = Dep::new();
///
/// let read = {
///     let files = Rc::clone(&files);
///     let file_dep = file_dep.clone();
///     wrap(move |path: &usize| {
///         file_dep.depend(path);
///         Ok::<_, RecursiveDependencyError>(files.borrow()[*path])
///     })
/// };
///
/// assert_eq!(read.call(0), Ok("fn main() {}"));
///
/// // Mutate the backing store, then dirty the dep to invalidate readers.
/// files.borrow_mut()[0] = "fn main() { run() }";
/// assert_eq!(read.call(0), Ok("fn main() {}"));
/// file_dep.dirty(&0);
/// assert_eq!(read.call(0), Ok("fn main() { run() }"));
/// ```
pub struct Dep<K>
where
    K: Clone + Eq + Hash,
{
    inner: Rc<DepInner<K>>,
}

impl<K> Clone for Dep<K>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K> std::fmt::Debug for Dep<K>
where
    K: Clone + Eq + Hash + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("key_count", &self.key_count())
            .finish()
    }
}

impl<K> Default for Dep<K>
where
    K: Clone + Eq + Hash + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Dep<K>
where
    K: Clone + Eq + Hash + 'static,
{
    /// Creates a dep with no subscription hook.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DepInner {
                by_key: RefCell::new(HashMap::new()),
                subscribe: None,
            }),
        }
    }

    /// Creates a dep whose hook is called when a key's member set first
    /// activates; the returned disposer runs when the key is dirtied.
    #[must_use]
    pub fn with_subscribe(
        subscribe: impl Fn(&K) -> Result<Unsubscribe, SubscribeError> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(DepInner {
                by_key: RefCell::new(HashMap::new()),
                subscribe: Some(Box::new(subscribe)),
            }),
        }
    }

    /// Records the computation currently recomputing (if any) as depending
    /// on `key`.
    ///
    /// Outside any recomputation this is a no-op. The registration lasts
    /// until the key is dirtied or the member recomputes, whichever comes
    /// first; recomputations re-register by touching the key again.
    pub fn depend(&self, key: &K) {
        let Some(parent) = context::current_parent() else {
            return;
        };

        let (set, created) = {
            let mut by_key = self.inner.by_key.borrow_mut();
            match by_key.get(key) {
                Some(set) => (Rc::clone(set), false),
                None => {
                    let set = Rc::new(DepSet::new());
                    by_key.insert(key.clone(), Rc::clone(&set));
                    (set, true)
                }
            }
        };

        set.members
            .borrow_mut()
            .insert(parent.state().id(), Rc::clone(&parent));
        parent
            .state()
            .add_dep(Rc::clone(&set) as Rc<dyn DepMembership>);

        if created {
            if let Some(subscribe) = &self.inner.subscribe {
                if let Ok(unsubscribe) = subscribe(key) {
                    *set.unsubscribe.borrow_mut() = Some(unsubscribe);
                }
            }
        }
    }

    /// Invalidates every computation that touched `key`, then discards the
    /// key's member set (and fires its unsubscribe) so later touches start
    /// fresh.
    pub fn dirty(&self, key: &K) {
        self.dirty_with(key, DirtyMethod::SetDirty);
    }

    /// Like [`dirty`](Self::dirty) with an explicit invalidation method.
    pub fn dirty_with(&self, key: &K, method: DirtyMethod) {
        let Some(set) = self.inner.by_key.borrow_mut().remove(key) else {
            return;
        };

        let members: Vec<EntryHandle> = set
            .members
            .borrow_mut()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for member in members {
            // The set is being discarded; drop the member's membership
            // record so it does not hold the set alive until its next
            // recomputation.
            member.state().remove_dep(set.id);
            match method {
                DirtyMethod::SetDirty => entry::set_dirty(member.as_ref()),
                DirtyMethod::Dispose => entry::dispose(member.as_ref()),
                DirtyMethod::Forget => entry::forget_entry(member.as_ref()),
            }
        }

        let unsubscribe = set.unsubscribe.borrow_mut().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    /// Number of keys with an active member set. A testing aid.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.inner.by_key.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::RecursiveDependencyError;
    use crate::wrap;

    #[test]
    fn depend_outside_computation_is_noop() {
        let dep = Dep::new();
        dep.depend(&"key");
        assert_eq!(dep.key_count(), 0);
    }

    #[test]
    fn dirty_invalidates_members_and_discards_set() {
        let calls = Rc::new(Cell::new(0));
        let dep = Dep::new();

        let memo = {
            let calls = Rc::clone(&calls);
            let dep = dep.clone();
            wrap(move |x: &u32| {
                calls.set(calls.get() + 1);
                dep.depend(&"shared");
                Ok::<_, RecursiveDependencyError>(*x)
            })
        };

        assert_eq!(memo.call(1), Ok(1));
        assert_eq!(memo.call(2), Ok(2));
        assert_eq!(calls.get(), 2);
        assert_eq!(dep.key_count(), 1);

        dep.dirty(&"shared");
        assert_eq!(dep.key_count(), 0);

        // Both cached results were invalidated.
        assert_eq!(memo.call(1), Ok(1));
        assert_eq!(memo.call(2), Ok(2));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn dirtying_unknown_key_is_noop() {
        let dep = Dep::<&str>::new();
        dep.dirty(&"never touched");
        assert_eq!(dep.key_count(), 0);
    }

    #[test]
    fn recomputation_reregisters_fresh() {
        let dep = Dep::new();
        let memo = {
            let dep = dep.clone();
            wrap(move |x: &u32| {
                dep.depend(&"k");
                Ok::<_, RecursiveDependencyError>(*x)
            })
        };

        assert_eq!(memo.call(1), Ok(1));
        dep.dirty(&"k");
        assert_eq!(dep.key_count(), 0);

        // The next read re-registers by touching the key again.
        assert_eq!(memo.call(1), Ok(1));
        assert_eq!(dep.key_count(), 1);
    }

    #[test]
    fn subscribe_fires_on_activation_and_unsubscribe_on_dirty() {
        let subscribed = Rc::new(Cell::new(0));
        let unsubscribed = Rc::new(Cell::new(0));

        let dep = {
            let subscribed = Rc::clone(&subscribed);
            let unsubscribed = Rc::clone(&unsubscribed);
            Dep::with_subscribe(move |_key: &&str| {
                subscribed.set(subscribed.get() + 1);
                let unsubscribed = Rc::clone(&unsubscribed);
                Ok(Box::new(move || {
                    unsubscribed.set(unsubscribed.get() + 1);
                }) as Unsubscribe)
            })
        };

        let memo = {
            let dep = dep.clone();
            wrap(move |x: &u32| {
                dep.depend(&"watched");
                Ok::<_, RecursiveDependencyError>(*x)
            })
        };

        assert_eq!(memo.call(1), Ok(1));
        assert_eq!(memo.call(2), Ok(2));
        // One activation despite two members.
        assert_eq!(subscribed.get(), 1);
        assert_eq!(unsubscribed.get(), 0);

        dep.dirty(&"watched");
        assert_eq!(subscribed.get(), 1);
        assert_eq!(unsubscribed.get(), 1);
    }

    #[test]
    fn forget_method_evicts_members_from_their_cache() {
        let dep = Dep::new();
        let memo = {
            let dep = dep.clone();
            wrap(move |x: &u32| {
                dep.depend(&"k");
                Ok::<_, RecursiveDependencyError>(*x)
            })
        };

        assert_eq!(memo.call(1), Ok(1));
        assert_eq!(memo.len(), 1);

        dep.dirty_with(&"k", DirtyMethod::Forget);
        assert_eq!(memo.len(), 0);
    }
}
