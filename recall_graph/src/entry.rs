// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entries: the nodes of the dependency graph.
//!
//! An [`Entry`] owns one memoized computation: its function, its latest
//! arguments, its cached result, and its edges to the entries it consulted
//! (children) and the entries that consulted it (parents). Invalidation
//! flows *up* those edges eagerly but cheaply — a dirtied entry notifies each
//! parent once that it "might be dirty" — while recomputation flows *down*
//! lazily, on the next read, revisiting only the dirty subtree.
//!
//! The algorithms here maintain these invariants between operations:
//!
//! - Parent and child edge maps mirror each other exactly.
//! - `dirty_children` is a subset of the child map holding precisely the
//!   children that are dirty or have dirty descendants.
//! - An entry that is neither dirty nor has dirty children holds a cached
//!   value that agrees with every child's current value.
//!
//! Everything in this module is crate-internal; the public surface is the
//! wrapper in [`crate::wrap`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::context;
use crate::error::{RecursiveDependencyError, SubscribeError};
use crate::pool;

/// Disposer returned by a subscribe hook; runs when the subscription ends.
pub type Unsubscribe = Box<dyn FnOnce()>;

/// Shared per-wrapper subscribe hook, invoked per entry recomputation.
pub(crate) type SubscribeHook<A> = Rc<dyn Fn(&A) -> Result<Unsubscribe, SubscribeError>>;

/// Type-erased strong handle to an entry.
pub(crate) type EntryHandle = Rc<dyn AnyEntry>;

/// Type-erased weak handle, used for parent back edges so that the
/// bidirectional edge maps never form `Rc` cycles.
pub(crate) type WeakEntryHandle = Weak<dyn AnyEntry>;

thread_local! {
    static NEXT_GRAPH_ID: Cell<u64> = const { Cell::new(0) };
}

/// Mints an id unique within this thread's graph.
pub(crate) fn next_graph_id() -> u64 {
    NEXT_GRAPH_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

/// Identity of one entry, used as the key of all edge maps.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub(crate) struct EntryId(u64);

impl EntryId {
    #[cfg(test)]
    pub(crate) fn for_test(raw: u64) -> Self {
        Self(raw)
    }
}

/// A dependency set an entry has joined; see [`crate::dep`].
///
/// Entries track their memberships so a recomputation can leave every set
/// before re-running the user function, which may join a different
/// collection of sets.
pub(crate) trait DepMembership {
    /// Stable identity for the membership map.
    fn membership_id(&self) -> u64;
    /// Removes the entry with `id` from the set.
    fn remove_member(&self, id: EntryId);
}

/// A child edge: the child's handle plus the child-value version this parent
/// last observed (`None` = registered but not yet observed).
struct ChildSlot {
    handle: EntryHandle,
    seen: Cell<Option<u64>>,
}

/// The untyped half of an entry: flags, versions, and graph edges.
///
/// Propagation operates entirely on this state through [`AnyEntry`], so the
/// graph can span entries with different argument/result types.
pub(crate) struct EntryState {
    id: EntryId,
    /// Evict through the forget upcall as soon as the parent set empties.
    disposable: bool,
    dirty: Cell<bool>,
    /// Reentrancy guard; a read arriving while set is a dependency cycle.
    recomputing: Cell<bool>,
    /// Version of the currently known value; `None` while unknown.
    version: Cell<Option<u64>>,
    parents: RefCell<HashMap<EntryId, WeakEntryHandle>>,
    children: RefCell<HashMap<EntryId, ChildSlot>>,
    /// Children known to be dirty or to have dirty descendants. Allocated
    /// from [`crate::pool`] on first use, released when it empties.
    dirty_children: RefCell<Option<HashSet<EntryId>>>,
    /// Dependency sets joined during the last recomputation.
    deps: RefCell<Option<HashMap<u64, Rc<dyn DepMembership>>>>,
    unsubscribe: RefCell<Option<Unsubscribe>>,
    /// Upcall that removes this entry from its owning cache.
    on_forget: RefCell<Option<Rc<dyn Fn()>>>,
    self_weak: WeakEntryHandle,
}

impl EntryState {
    pub(crate) fn id(&self) -> EntryId {
        self.id
    }

    pub(crate) fn set_on_forget(&self, hook: Rc<dyn Fn()>) {
        *self.on_forget.borrow_mut() = Some(hook);
    }

    /// Records membership in a dependency set.
    pub(crate) fn add_dep(&self, dep: Rc<dyn DepMembership>) {
        self.deps
            .borrow_mut()
            .get_or_insert_with(HashMap::new)
            .insert(dep.membership_id(), dep);
    }

    /// Drops the membership record for a discarded dependency set.
    pub(crate) fn remove_dep(&self, membership_id: u64) {
        if let Some(deps) = self.deps.borrow_mut().as_mut() {
            deps.remove(&membership_id);
        }
    }
}

/// The object-safe face of an entry, seen by the propagation algorithms and
/// by other entries across the graph.
pub(crate) trait AnyEntry {
    fn state(&self) -> &EntryState;

    /// Clears the cached value to unknown.
    fn clear_value(&self);

    /// Transparent recompute against the stored arguments: no parent
    /// registration. Returns `false` when the pulled result is an error.
    fn refresh(&self) -> bool;
}

/// A cached result. `Known(Ok)` and `Known(Err)` are cached symmetrically;
/// an error replays on every read until invalidated.
enum Value<T, E> {
    Unknown,
    Known(Result<T, E>),
}

/// Value equality: same arm, equal payload. Unknown equals nothing, which is
/// why this takes known results only.
fn results_equal<T: PartialEq, E: PartialEq>(a: &Result<T, E>, b: &Result<T, E>) -> bool {
    match (a, b) {
        (Ok(a), Ok(b)) => a == b,
        (Err(a), Err(b)) => a == b,
        _ => false,
    }
}

/// One memoized computation node.
pub(crate) struct Entry<A, T, E> {
    state: EntryState,
    fun: Rc<dyn Fn(&A) -> Result<T, E>>,
    /// Latest arguments; overwritten on every call so the function sees
    /// current arguments even when the cached value is served.
    args: RefCell<Option<A>>,
    value: RefCell<Value<T, E>>,
    /// Last known result and its version. Survives invalidation so that a
    /// recomputation producing an equal result keeps the same version and
    /// parents observing it are not dirtied.
    history: RefCell<Option<(Result<T, E>, u64)>>,
    subscribe: Option<SubscribeHook<A>>,
}

/// Clears the reentrancy flag even if the user function unwinds.
struct RecomputingGuard<'a>(&'a Cell<bool>);

impl Drop for RecomputingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<A, T, E> Entry<A, T, E>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + From<RecursiveDependencyError> + 'static,
{
    pub(crate) fn new(
        fun: Rc<dyn Fn(&A) -> Result<T, E>>,
        subscribe: Option<SubscribeHook<A>>,
        disposable: bool,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let self_weak: WeakEntryHandle = weak.clone();
            Self {
                state: EntryState {
                    id: EntryId(next_graph_id()),
                    disposable,
                    dirty: Cell::new(true),
                    recomputing: Cell::new(false),
                    version: Cell::new(None),
                    parents: RefCell::new(HashMap::new()),
                    children: RefCell::new(HashMap::new()),
                    dirty_children: RefCell::new(None),
                    deps: RefCell::new(None),
                    unsubscribe: RefCell::new(None),
                    on_forget: RefCell::new(None),
                    self_weak,
                },
                fun,
                args: RefCell::new(None),
                value: RefCell::new(Value::Unknown),
                history: RefCell::new(None),
                subscribe,
            }
        })
    }

    pub(crate) fn handle(&self) -> EntryHandle {
        self.state
            .self_weak
            .upgrade()
            .expect("entry must be alive while in use")
    }

    /// Serves the cached value, recomputing whatever part of the dirty
    /// subtree demands it, and registers this entry as a child of the entry
    /// currently recomputing (if any).
    pub(crate) fn recompute(&self, args: A) -> Result<T, E> {
        // Checked before registration, so a computation that reads itself
        // fails here instead of becoming its own child.
        if self.state.recomputing.get() {
            return Err(E::from(RecursiveDependencyError::new()));
        }
        *self.args.borrow_mut() = Some(args);
        remember_parent(&self.handle());
        self.pull()
    }

    /// Returns the cached value when this entry is clean with a known `Ok`
    /// result. Never recomputes, never registers a parent edge.
    pub(crate) fn peek(&self) -> Option<T> {
        if might_be_dirty(&self.state) {
            return None;
        }
        match &*self.value.borrow() {
            Value::Known(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The recomputation decision procedure.
    ///
    /// Explicitly dirty: recompute. Dirty children only: refresh them
    /// transparently; their clean reports compare values and mark this entry
    /// dirty exactly when something actually changed, in which case
    /// recompute. Otherwise the cached value stands.
    fn pull(&self) -> Result<T, E> {
        if self.state.dirty.get() {
            return self.really_recompute();
        }

        let dirty_ids: Option<SmallVec<[EntryId; 8]>> = {
            let dirty_children = self.state.dirty_children.borrow();
            dirty_children
                .as_ref()
                .map(|set| set.iter().copied().collect())
        };
        if let Some(dirty_ids) = dirty_ids {
            for id in dirty_ids {
                let child = {
                    let children = self.state.children.borrow();
                    children.get(&id).map(|slot| Rc::clone(&slot.handle))
                };
                // A child may have been severed by an earlier refresh in
                // this same pass.
                if let Some(child) = child {
                    if !child.refresh() {
                        set_dirty(self);
                    }
                }
            }
        }

        if self.state.dirty.get() {
            return self.really_recompute();
        }
        self.known_value()
    }

    fn known_value(&self) -> Result<T, E> {
        {
            if let Value::Known(result) = &*self.value.borrow() {
                return result.clone();
            }
        }
        debug_assert!(false, "clean entry must hold a cached value");
        self.really_recompute()
    }

    /// Runs the user function and re-establishes this entry's place in the
    /// graph.
    ///
    /// Old child edges are severed first: the function may consult a
    /// different set of dependencies this time, and stale edges must not
    /// keep invalidating us. The parent slot names this entry only while the
    /// function itself runs; everything else happens under the caller's
    /// context so that our own registration is attributed correctly.
    fn really_recompute(&self) -> Result<T, E> {
        if self.state.recomputing.get() {
            return Err(E::from(RecursiveDependencyError::new()));
        }

        let former_children = forget_children(self);

        let result = {
            self.state.recomputing.set(true);
            let _guard = RecomputingGuard(&self.state.recomputing);
            self.clear_value();
            let handle = self.handle();
            let args = self.args.borrow();
            let args = args
                .as_ref()
                .expect("entry must not recompute before arguments are recorded");
            context::with_parent(handle, || (self.fun)(args))
        };
        self.store_result(&result);

        if self.maybe_subscribe() {
            set_clean(self);
        }

        // Children that were not re-consulted may now be orphans.
        for child in former_children {
            maybe_report_orphan(&child);
        }

        result
    }

    fn store_result(&self, result: &Result<T, E>) {
        let version = {
            let mut history = self.history.borrow_mut();
            let version = match history.as_ref() {
                Some((previous, version)) if results_equal(previous, result) => *version,
                Some((_, version)) => version + 1,
                None => 0,
            };
            *history = Some((result.clone(), version));
            version
        };
        *self.value.borrow_mut() = Value::Known(result.clone());
        self.state.version.set(Some(version));
    }

    /// Re-subscribes after a recomputation. Returns `false` (and forces this
    /// entry dirty) when the hook fails, so the next read retries both the
    /// computation and the subscription.
    fn maybe_subscribe(&self) -> bool {
        let Some(subscribe) = &self.subscribe else {
            return true;
        };
        maybe_unsubscribe(&self.state);
        let outcome = {
            let args = self.args.borrow();
            let args = args
                .as_ref()
                .expect("entry must not subscribe before arguments are recorded");
            subscribe(args)
        };
        match outcome {
            Ok(unsubscribe) => {
                *self.state.unsubscribe.borrow_mut() = Some(unsubscribe);
                true
            }
            Err(_) => {
                set_dirty(self);
                false
            }
        }
    }
}

impl<A, T, E> AnyEntry for Entry<A, T, E>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + From<RecursiveDependencyError> + 'static,
{
    fn state(&self) -> &EntryState {
        &self.state
    }

    fn clear_value(&self) {
        *self.value.borrow_mut() = Value::Unknown;
        self.state.version.set(None);
    }

    fn refresh(&self) -> bool {
        if self.state.recomputing.get() {
            return false;
        }
        self.pull().is_ok()
    }
}

impl<A, T, E> Drop for Entry<A, T, E> {
    fn drop(&mut self) {
        // Wrapper teardown must not leak subscriptions.
        maybe_unsubscribe(&self.state);
    }
}

// -------------------------------------------------------------------------
// Graph algorithms
// -------------------------------------------------------------------------

/// "Might be dirty": explicitly dirty, or has at least one dirty child.
pub(crate) fn might_be_dirty(state: &EntryState) -> bool {
    state.dirty.get()
        || state
            .dirty_children
            .borrow()
            .as_ref()
            .is_some_and(|set| !set.is_empty())
}

/// Registers `child` under the entry currently recomputing, if any.
///
/// The edge is recorded on both sides, then the child's current state is
/// reported so the parent's dirty bookkeeping and observed value stay
/// coherent from the moment of registration.
pub(crate) fn remember_parent(child: &EntryHandle) {
    let Some(parent) = context::current_parent() else {
        return;
    };
    let child_id = child.state().id;
    child
        .state()
        .parents
        .borrow_mut()
        .insert(parent.state().id, Rc::downgrade(&parent));
    parent
        .state()
        .children
        .borrow_mut()
        .entry(child_id)
        .or_insert_with(|| ChildSlot {
            handle: Rc::clone(child),
            seen: Cell::new(None),
        });
    if might_be_dirty(child.state()) {
        report_dirty_child(parent.as_ref(), child.as_ref());
    } else {
        report_clean_child(parent.as_ref(), child.as_ref());
    }
}

/// Marks `entry` dirty: value cleared, parents notified once, subscription
/// released (further notifications would be redundant).
pub(crate) fn set_dirty(entry: &dyn AnyEntry) {
    let state = entry.state();
    if state.dirty.get() {
        return;
    }
    state.dirty.set(true);
    entry.clear_value();
    report_dirty(entry);
    maybe_unsubscribe(state);
}

/// Clears the explicit dirty flag after a recomputation; emits the upward
/// clean report only once no dirty children remain.
fn set_clean(entry: &dyn AnyEntry) {
    entry.state().dirty.set(false);
    if might_be_dirty(entry.state()) {
        return;
    }
    report_clean(entry);
}

fn report_dirty(child: &dyn AnyEntry) {
    for parent in live_parents(child.state()) {
        report_dirty_child(parent.as_ref(), child);
    }
}

fn report_clean(child: &dyn AnyEntry) {
    for parent in live_parents(child.state()) {
        report_clean_child(parent.as_ref(), child);
    }
}

/// Adds `child` to `parent.dirty_children`, recursing upward only when this
/// changed the parent's might-be-dirty status. A child already present means
/// the upward notification was sent before; the propagation therefore visits
/// each edge at most once per dirtying wave.
fn report_dirty_child(parent: &dyn AnyEntry, child: &dyn AnyEntry) {
    let parent_state = parent.state();
    let child_state = child.state();
    debug_assert!(
        parent_state
            .children
            .borrow()
            .contains_key(&child_state.id),
        "dirty child must be registered with its parent"
    );
    debug_assert!(might_be_dirty(child_state), "clean child reported dirty");

    let parent_was_clean = !might_be_dirty(parent_state);
    let newly_dirty = {
        let mut dirty_children = parent_state.dirty_children.borrow_mut();
        dirty_children
            .get_or_insert_with(pool::acquire)
            .insert(child_state.id)
    };
    if !newly_dirty {
        return;
    }
    if parent_was_clean {
        report_dirty(parent);
    }
}

/// Settles a now-clean `child` with `parent`: record the first observation,
/// or compare against the recorded one and dirty the parent when the child's
/// value actually changed. Recurses upward once the parent itself becomes
/// fully clean.
fn report_clean_child(parent: &dyn AnyEntry, child: &dyn AnyEntry) {
    let parent_state = parent.state();
    let child_state = child.state();
    debug_assert!(!might_be_dirty(child_state), "dirty child reported clean");

    let observed = {
        let children = parent_state.children.borrow();
        let Some(slot) = children.get(&child_state.id) else {
            return;
        };
        let seen = slot.seen.get();
        if seen.is_none() {
            slot.seen.set(child_state.version.get());
        }
        seen
    };
    if let Some(seen) = observed {
        if Some(seen) != child_state.version.get() {
            set_dirty(parent);
        }
    }

    remove_dirty_child(parent_state, child_state.id);
    if might_be_dirty(parent_state) {
        return;
    }
    report_clean(parent);
}

fn remove_dirty_child(state: &EntryState, child: EntryId) {
    let mut dirty_children = state.dirty_children.borrow_mut();
    if let Some(set) = dirty_children.as_mut() {
        set.remove(&child);
        if set.is_empty() {
            if let Some(set) = dirty_children.take() {
                pool::release(set);
            }
        }
    }
}

/// Severs every child edge and dependency-set membership, returning the
/// former children for orphan reporting once the caller is done.
fn forget_children(entry: &dyn AnyEntry) -> SmallVec<[EntryHandle; 8]> {
    let state = entry.state();
    let mut former: SmallVec<[EntryHandle; 8]> = SmallVec::new();
    for (_, slot) in state.children.borrow_mut().drain() {
        slot.handle.state().parents.borrow_mut().remove(&state.id);
        former.push(slot.handle);
    }
    if let Some(set) = state.dirty_children.borrow_mut().take() {
        pool::release(set);
    }
    if let Some(deps) = state.deps.borrow_mut().take() {
        for dep in deps.into_values() {
            dep.remove_member(state.id);
        }
    }
    former
}

/// Removes `child` from a parent's edge maps (the parent-side half of a
/// disposal).
fn forget_child(parent: &EntryState, child: EntryId) {
    parent.children.borrow_mut().remove(&child);
    remove_dirty_child(parent, child);
}

/// Dismantles `entry`: all edges severed, subscription fired, and every
/// former parent marked dirty.
///
/// A disposed entry can no longer report its own future dirtiness (its
/// subscription is gone and its children no longer point at it), so parents
/// must assume the worst and recompute on their next read.
pub(crate) fn dispose(entry: &dyn AnyEntry) {
    set_dirty(entry);
    let former_children = forget_children(entry);

    let state = entry.state();
    let parents = live_parents(state);
    state.parents.borrow_mut().clear();
    for parent in &parents {
        set_dirty(parent.as_ref());
        forget_child(parent.state(), state.id);
    }

    maybe_unsubscribe(state);

    for child in former_children {
        maybe_report_orphan(&child);
    }
}

/// Evicts `entry` from its owning cache via the forget upcall, falling back
/// to plain disposal for entries that never had one.
pub(crate) fn forget_entry(entry: &dyn AnyEntry) {
    let hook = entry.state().on_forget.borrow().clone();
    match hook {
        Some(hook) => hook(),
        None => dispose(entry),
    }
}

/// Forgets a disposable entry whose parent set has emptied; the cascade
/// continues through its own former children.
fn maybe_report_orphan(child: &EntryHandle) {
    let state = child.state();
    let orphaned = state.disposable && state.parents.borrow().is_empty();
    if orphaned {
        forget_entry(child.as_ref());
    }
}

/// Fires the pending unsubscribe, if any. Idempotent.
pub(crate) fn maybe_unsubscribe(state: &EntryState) {
    let unsubscribe = state.unsubscribe.borrow_mut().take();
    if let Some(unsubscribe) = unsubscribe {
        unsubscribe();
    }
}

/// Snapshots the live parents, pruning entries whose parents have been
/// freed. Snapshotting keeps upward reports safe against edge mutations mid
/// iteration.
fn live_parents(state: &EntryState) -> SmallVec<[EntryHandle; 4]> {
    let mut parents = state.parents.borrow_mut();
    let mut live: SmallVec<[EntryHandle; 4]> = SmallVec::new();
    parents.retain(|_, parent| match parent.upgrade() {
        Some(handle) => {
            live.push(handle);
            true
        }
        None => false,
    });
    live
}
