// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wrapping functions into memoized, dependency-tracked callables.
//!
//! [`wrap`] (or [`MemoBuilder`] for non-default options) turns a function
//! into a [`Memo`]: calling it serves cached results keyed by the call
//! arguments, records which other memoized computations were consulted, and
//! recomputes lazily once something underneath is dirtied.
//!
//! Caches are trimmed to their capacity only at quiescent points, when no
//! recomputation is on the stack, so an entry is never evicted out from
//! under a computation currently consulting it.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use recall_lru::Lru;
use recall_trie::{KeyTrie, TrieKey};

use crate::context;
use crate::entry::{self, AnyEntry, Entry, SubscribeHook, Unsubscribe};
use crate::error::{RecursiveDependencyError, SubscribeError};

/// Default cache capacity (2^16 entries).
pub const DEFAULT_MAX: usize = 1 << 16;

/// A cache that wrote since the last quiescent point and wants cleaning.
trait CacheCleanup {
    fn clean_cache(&self);
}

thread_local! {
    static PENDING_CLEAN: RefCell<Vec<Rc<dyn CacheCleanup>>> = const { RefCell::new(Vec::new()) };
}

/// Queues `cache` for trimming at the next quiescent point.
fn note_cache_write(cache: Rc<dyn CacheCleanup>) {
    PENDING_CLEAN.with(|pending| {
        let mut pending = pending.borrow_mut();
        if !pending.iter().any(|queued| Rc::ptr_eq(queued, &cache)) {
            pending.push(cache);
        }
    });
}

fn clean_pending_caches() {
    let pending = PENDING_CLEAN.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
    for cache in pending {
        cache.clean_cache();
    }
}

struct MemoInner<A, T, E, K>
where
    K: Clone + Eq + Hash,
{
    fun: Rc<dyn Fn(&A) -> Result<T, E>>,
    key_fn: Box<dyn Fn(&A) -> Option<K>>,
    subscribe: Option<SubscribeHook<A>>,
    disposable: bool,
    cache: RefCell<Lru<K, Rc<Entry<A, T, E>>>>,
    /// Entries the LRU evicted, awaiting dismantling. Deferred so that the
    /// graph teardown (which may re-enter this cache through forget upcalls)
    /// never runs while `cache` is borrowed.
    pending_disposal: Rc<RefCell<Vec<Rc<Entry<A, T, E>>>>>,
}

impl<A, T, E, K> MemoInner<A, T, E, K>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + From<RecursiveDependencyError> + 'static,
    K: Clone + Eq + Hash + 'static,
{
    fn lookup_or_create(self_rc: &Rc<Self>, key: &K) -> Rc<Entry<A, T, E>> {
        let entry = {
            let mut cache = self_rc.cache.borrow_mut();
            let existing = cache.get(key).map(Rc::clone);
            match existing {
                Some(entry) => entry,
                None => {
                    let entry = Entry::new(
                        Rc::clone(&self_rc.fun),
                        self_rc.subscribe.clone(),
                        self_rc.disposable,
                    );
                    let weak = Rc::downgrade(self_rc);
                    let forget_key = key.clone();
                    entry.state().set_on_forget(Rc::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.delete_key(&forget_key);
                        }
                    }));
                    cache.set(key.clone(), Rc::clone(&entry));
                    entry
                }
            }
        };
        self_rc.drain_disposals();
        entry
    }

    /// Removes and dismantles the entry for `key`, outside the cache borrow.
    fn delete_key(&self, key: &K) -> bool {
        let removed = self.cache.borrow_mut().take(key);
        match removed {
            Some(entry) => {
                entry::dispose(entry.as_ref());
                true
            }
            None => false,
        }
    }

    fn drain_disposals(&self) {
        loop {
            let next = self.pending_disposal.borrow_mut().pop();
            match next {
                Some(entry) => entry::dispose(entry.as_ref()),
                None => break,
            }
        }
    }
}

impl<A, T, E, K> CacheCleanup for MemoInner<A, T, E, K>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + From<RecursiveDependencyError> + 'static,
    K: Clone + Eq + Hash + 'static,
{
    fn clean_cache(&self) {
        self.cache.borrow_mut().clean();
        self.drain_disposals();
    }
}

/// A memoized, dependency-tracked function.
///
/// Created by [`wrap`] or [`MemoBuilder`]. Cheaply cloneable; clones share
/// one cache. Calls made while another wrapped computation is recomputing
/// register this computation as its dependency, so dirtying anything
/// underneath invalidates everything above, lazily.
///
/// # Type Parameters
///
/// - `A`: The argument type (use a tuple for several arguments).
/// - `T` / `E`: The result type; both arms cache and replay.
/// - `K`: The cache key derived from arguments, `A` itself by default.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use recall_graph::{RecursiveDependencyError, wrap};
///
/// let calls = Rc::new(Cell::new(0));
/// let double = {
///     let calls = Rc::clone(&calls);
///     wrap(move |x: &u32| {
///         calls.set(calls.get() + 1);
///         Ok::<_, RecursiveDependencyError>(x * 2)
///     })
/// };
///
/// assert_eq!(double.call(3), Ok(6));
/// assert_eq!(double.call(3), Ok(6));
/// assert_eq!(calls.get(), 1);
///
/// double.dirty(&3);
/// assert_eq!(double.call(3), Ok(6));
/// assert_eq!(calls.get(), 2);
/// ```
pub struct Memo<A, T, E, K = A>
where
    K: Clone + Eq + Hash,
{
    inner: Rc<MemoInner<A, T, E, K>>,
}

impl<A, T, E, K> Clone for Memo<A, T, E, K>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A, T, E, K> fmt::Debug for Memo<A, T, E, K>
where
    K: Clone + Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("len", &self.inner.cache.borrow().len())
            .field("capacity", &self.inner.cache.borrow().capacity())
            .finish()
    }
}

impl<A, T, E, K> Memo<A, T, E, K>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + From<RecursiveDependencyError> + 'static,
    K: Clone + Eq + Hash + 'static,
{
    /// Calls the wrapped function through the cache.
    ///
    /// A cached clean result is served without invoking the function. When
    /// the key function returns `None`, caching is skipped entirely and the
    /// function is called directly.
    pub fn call(&self, args: A) -> Result<T, E> {
        let Some(key) = (self.inner.key_fn)(&args) else {
            return (self.inner.fun)(&args);
        };

        let entry = MemoInner::lookup_or_create(&self.inner, &key);
        let result = entry.recompute(args);

        // The served entry becomes most recently used. It may have been
        // forgotten during its own recomputation, in which case there is
        // nothing to promote.
        {
            let mut cache = self.inner.cache.borrow_mut();
            let _ = cache.get(&key);
        }

        note_cache_write(Rc::clone(&self.inner) as Rc<dyn CacheCleanup>);
        if !context::has_parent() {
            clean_pending_caches();
        }

        result
    }

    /// Derives the cache key for `args` without touching the cache.
    #[must_use]
    pub fn key_for(&self, args: &A) -> Option<K> {
        (self.inner.key_fn)(args)
    }

    /// Marks the entry for `args` dirty; the next call recomputes.
    pub fn dirty(&self, args: &A) {
        if let Some(key) = self.key_for(args) {
            self.dirty_key(&key);
        }
    }

    /// Marks the entry for `key` dirty; the next call recomputes.
    pub fn dirty_key(&self, key: &K) {
        let entry = {
            let mut cache = self.inner.cache.borrow_mut();
            cache.get(key).map(Rc::clone)
        };
        if let Some(entry) = entry {
            entry::set_dirty(entry.as_ref());
        }
    }

    /// Returns the cached value for `args` if it is clean and successful.
    ///
    /// Never recomputes and never registers a dependency on the entry.
    #[must_use]
    pub fn peek(&self, args: &A) -> Option<T> {
        self.key_for(args).and_then(|key| self.peek_key(&key))
    }

    /// Returns the cached value for `key` if it is clean and successful.
    #[must_use]
    pub fn peek_key(&self, key: &K) -> Option<T> {
        let entry = {
            let mut cache = self.inner.cache.borrow_mut();
            cache.get(key).map(Rc::clone)
        };
        entry.and_then(|entry| entry.peek())
    }

    /// Evicts the entry for `args`, dismantling its graph edges and marking
    /// its dependents dirty. Returns `true` if an entry was present.
    pub fn forget(&self, args: &A) -> bool {
        self.key_for(args).is_some_and(|key| self.forget_key(&key))
    }

    /// Evicts the entry for `key`. Returns `true` if an entry was present.
    pub fn forget_key(&self, key: &K) -> bool {
        self.inner.delete_key(key)
    }

    /// Number of entries currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    /// Returns `true` if no entries are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.cache.borrow().is_empty()
    }

    /// The configured cache capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.cache.borrow().capacity()
    }
}

/// Wraps `fun` with the default options: capacity [`DEFAULT_MAX`], arguments
/// as their own cache key, no subscription.
///
/// See [`MemoBuilder`] to change any of those.
pub fn wrap<A, T, E>(fun: impl Fn(&A) -> Result<T, E> + 'static) -> Memo<A, T, E>
where
    A: Clone + Eq + Hash + 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + From<RecursiveDependencyError> + 'static,
{
    MemoBuilder::new(fun).build()
}

/// Configures and builds a [`Memo`].
///
/// # Example
///
/// ```
/// use recall_graph::{MemoBuilder, RecursiveDependencyError};
///
/// let head = MemoBuilder::new(|line: &String| {
///     Ok::<_, RecursiveDependencyError>(line.len())
/// })
/// .max(64)
/// .key_fn(|line: &String| line.split(':').next().map(str::to_owned))
/// .build();
///
/// assert_eq!(head.call("alpha:1".to_owned()), Ok(7));
/// // Same derived key, so the cached length is served.
/// assert_eq!(head.call("alpha:22".to_owned()), Ok(7));
/// ```
pub struct MemoBuilder<A, T, E, K = A> {
    fun: Rc<dyn Fn(&A) -> Result<T, E>>,
    max: usize,
    key_fn: Box<dyn Fn(&A) -> Option<K>>,
    subscribe: Option<SubscribeHook<A>>,
    disposable: bool,
}

impl<A, T, E, K> fmt::Debug for MemoBuilder<A, T, E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoBuilder")
            .field("max", &self.max)
            .field("has_subscribe", &self.subscribe.is_some())
            .field("disposable", &self.disposable)
            .finish()
    }
}

impl<A, T, E> MemoBuilder<A, T, E, A>
where
    A: Clone + Eq + Hash + 'static,
{
    /// Starts a builder around `fun`, keying the cache by the arguments
    /// themselves.
    pub fn new(fun: impl Fn(&A) -> Result<T, E> + 'static) -> Self {
        Self {
            fun: Rc::new(fun),
            max: DEFAULT_MAX,
            key_fn: Box::new(|args: &A| Some(args.clone())),
            subscribe: None,
            disposable: false,
        }
    }
}

impl<A, T, E, K> MemoBuilder<A, T, E, K> {
    /// Sets the cache capacity enforced at quiescent points.
    #[must_use]
    pub fn max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Replaces the key function.
    ///
    /// Returning `None` from it makes that call bypass the cache entirely.
    #[must_use]
    pub fn key_fn<K2>(self, key_fn: impl Fn(&A) -> Option<K2> + 'static) -> MemoBuilder<A, T, E, K2> {
        MemoBuilder {
            fun: self.fun,
            max: self.max,
            key_fn: Box::new(key_fn),
            subscribe: self.subscribe,
            disposable: self.disposable,
        }
    }

    /// Installs a per-entry subscription hook, called after each successful
    /// recomputation; the disposer it returns runs when the entry is dirtied
    /// or evicted.
    ///
    /// A hook failure is not surfaced: the entry is forced dirty so the next
    /// read retries both the computation and the subscription.
    #[must_use]
    pub fn subscribe(
        mut self,
        hook: impl Fn(&A) -> Result<Unsubscribe, SubscribeError> + 'static,
    ) -> Self {
        self.subscribe = Some(Rc::new(hook));
        self
    }

    /// Marks entries disposable: evicted as soon as no other computation
    /// depends on them.
    #[must_use]
    pub fn disposable(mut self) -> Self {
        self.disposable = true;
        self
    }

    /// Builds the memoized callable.
    #[must_use]
    pub fn build(self) -> Memo<A, T, E, K>
    where
        A: 'static,
        T: Clone + PartialEq + 'static,
        E: Clone + PartialEq + From<RecursiveDependencyError> + 'static,
        K: Clone + Eq + Hash + 'static,
    {
        let pending_disposal: Rc<RefCell<Vec<Rc<Entry<A, T, E>>>>> =
            Rc::new(RefCell::new(Vec::new()));
        let queue = Rc::clone(&pending_disposal);
        let cache = Lru::with_dispose(self.max, move |_key: K, entry: Rc<Entry<A, T, E>>| {
            queue.borrow_mut().push(entry);
        });
        Memo {
            inner: Rc::new(MemoInner {
                fun: self.fun,
                key_fn: self.key_fn,
                subscribe: self.subscribe,
                disposable: self.disposable,
                cache: RefCell::new(cache),
                pending_disposal,
            }),
        }
    }
}

/// Returns a key function that canonicalizes sequence arguments through a
/// [`KeyTrie`], for wrappers whose argument is naturally a list.
///
/// Element-wise-equal argument vectors share one cache entry even when the
/// vectors themselves are distinct allocations.
///
/// # Example
///
/// ```
/// use recall_graph::{MemoBuilder, RecursiveDependencyError, trie_key_fn};
///
/// let join = MemoBuilder::new(|parts: &Vec<&str>| {
///     Ok::<_, RecursiveDependencyError>(parts.join("/"))
/// })
/// .key_fn(trie_key_fn())
/// .build();
///
/// assert_eq!(join.call(vec!["a", "b"]), Ok("a/b".to_owned()));
/// assert_eq!(join.key_for(&vec!["a", "b"]), join.key_for(&vec!["a", "b"]));
/// ```
pub fn trie_key_fn<K>() -> impl Fn(&Vec<K>) -> Option<TrieKey>
where
    K: Clone + Eq + Hash + 'static,
{
    let trie = RefCell::new(KeyTrie::new());
    move |args: &Vec<K>| Some(trie.borrow_mut().lookup(args))
}
