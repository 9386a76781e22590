// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recall LRU: a size-bounded least-recently-used cache with eviction disposers.
//!
//! [`Lru`] is an ordered mapping from keys to values with O(1) lookup,
//! insertion, and removal. Reading or writing a key promotes it to
//! most-recently-used; [`Lru::clean`] evicts from the least-recently-used end
//! until the cache is back within its capacity. A disposer configured at
//! construction time runs exactly once for every entry the cache removes on
//! its own initiative, which lets callers tie resource teardown to eviction.
//!
//! Cleaning is explicit rather than automatic so that callers can batch
//! insertions and defer eviction to a safe point (for example, the quiescent
//! points of an incremental computation graph).
//!
//! ## Quick Start
//!
//! ```rust
//! use recall_lru::Lru;
//!
//! let mut cache = Lru::new(2);
//! cache.set("a", 1);
//! cache.set("b", 2);
//! cache.set("c", 3);
//!
//! // Over capacity until cleaned; eviction is oldest-first.
//! assert_eq!(cache.len(), 3);
//! cache.clean();
//! assert_eq!(cache.len(), 2);
//! assert!(!cache.has(&"a"));
//! assert_eq!(cache.get(&"b"), Some(&2));
//! ```
//!
//! ## Disposers
//!
//! ```rust
//! use core::cell::RefCell;
//! use std::rc::Rc;
//! use recall_lru::Lru;
//!
//! let evicted = Rc::new(RefCell::new(Vec::new()));
//! let evicted_handle = Rc::clone(&evicted);
//! let mut cache = Lru::with_dispose(1, move |key: &str, _value: u32| {
//!     evicted_handle.borrow_mut().push(key);
//! });
//!
//! cache.set("a", 1);
//! cache.set("b", 2);
//! cache.clean();
//! assert_eq!(*evicted.borrow(), vec!["a"]);
//! ```
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`. It does not depend on `std`.

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::hash::Hash;

use hashbrown::HashMap;

/// Sentinel index meaning "no node".
const NIL: usize = usize::MAX;

/// Callback fired when the cache removes an entry.
type Disposer<K, V> = Box<dyn FnMut(K, V)>;

/// One slot in the recency list arena.
struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// A size-bounded LRU cache.
///
/// Keys map to values; every [`get`](Self::get) and [`set`](Self::set)
/// promotes the touched key to most-recently-used. The cache may temporarily
/// exceed its capacity; [`clean`](Self::clean) evicts least-recently-used
/// entries until `len() <= capacity()`.
///
/// # Disposal contract
///
/// A disposer passed to [`with_dispose`](Self::with_dispose) runs exactly once
/// per entry removed by [`delete`](Self::delete), by [`set`](Self::set)
/// replacing an existing value, or by [`clean`](Self::clean). It runs
/// synchronously, inside the removing call. [`take`](Self::take) is the one
/// exception: it hands the value back to the caller, who assumes disposal
/// duty.
///
/// # Type Parameters
///
/// - `K`: The key type. Keys are stored both in the index map and in the
///   recency list, so they must be `Clone` (keep them cheap: ids, small
///   strings, `Rc` handles).
/// - `V`: The value type.
pub struct Lru<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Key to arena-slot index.
    map: HashMap<K, usize>,
    /// Recency list arena. `None` slots are free.
    nodes: Vec<Option<Node<K, V>>>,
    /// Free slot indices available for reuse.
    free: Vec<usize>,
    /// Most-recently-used node, or `NIL` when empty.
    head: usize,
    /// Least-recently-used node, or `NIL` when empty.
    tail: usize,
    /// Target capacity enforced by `clean`.
    max: usize,
    dispose: Option<Disposer<K, V>>,
}

impl<K, V> fmt::Debug for Lru<K, V>
where
    K: Clone + Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lru")
            .field("len", &self.len())
            .field("max", &self.max)
            .field("has_dispose", &self.dispose.is_some())
            .finish()
    }
}

impl<K, V> Lru<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Creates an empty cache that `clean` trims to at most `max` entries.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            map: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            max,
            dispose: None,
        }
    }

    /// Creates an empty cache with a disposer fired on every removal the
    /// cache performs itself.
    ///
    /// See the [type-level docs](Self) for the exact disposal contract.
    #[must_use]
    pub fn with_dispose(max: usize, dispose: impl FnMut(K, V) + 'static) -> Self {
        let mut cache = Self::new(max);
        cache.dispose = Some(Box::new(dispose));
        cache
    }

    /// Returns the number of entries currently cached.
    ///
    /// This may exceed [`capacity`](Self::capacity) between writes and the
    /// next [`clean`](Self::clean).
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the capacity that [`clean`](Self::clean) enforces.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max
    }

    /// Returns `true` if `key` is cached, without promoting it.
    #[must_use]
    pub fn has(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Returns the cached value for `key`, promoting it to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.promote(idx);
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Inserts or replaces the value for `key`, promoting it to
    /// most-recently-used.
    ///
    /// Replacing an existing value fires the disposer with the old value.
    /// The cache is not trimmed here; call [`clean`](Self::clean) when
    /// eviction is safe.
    pub fn set(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            let node = self.nodes[idx]
                .as_mut()
                .expect("mapped slot must be occupied");
            let old = core::mem::replace(&mut node.value, value);
            self.promote(idx);
            self.run_dispose(key, old);
            return;
        }

        let idx = self.alloc(Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: self.head,
        });
        if self.head != NIL {
            self.node_mut(self.head).prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
        self.map.insert(key, idx);
    }

    /// Removes `key`, firing the disposer with the removed value.
    ///
    /// Returns `true` if the key was present.
    pub fn delete(&mut self, key: &K) -> bool {
        match self.detach(key) {
            Some((key, value)) => {
                self.run_dispose(key, value);
                true
            }
            None => false,
        }
    }

    /// Removes `key` and returns the value without firing the disposer.
    ///
    /// The caller assumes whatever teardown the disposer would have done.
    /// This exists so embedders can dismantle a removed value after releasing
    /// their own locks or borrows around the cache.
    pub fn take(&mut self, key: &K) -> Option<V> {
        self.detach(key).map(|(_key, value)| value)
    }

    /// Evicts least-recently-used entries until `len() <= capacity()`,
    /// firing the disposer per eviction.
    pub fn clean(&mut self) {
        while self.map.len() > self.max {
            let lru = self.tail;
            debug_assert!(lru != NIL, "non-empty cache must have a tail");
            let key = self.node_mut(lru).key.clone();
            let removed = self.detach(&key).expect("tail key must be mapped");
            self.run_dispose(removed.0, removed.1);
        }
    }

    /// Unlinks and frees the node for `key`, returning its key and value.
    fn detach(&mut self, key: &K) -> Option<(K, V)> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        let node = self.nodes[idx].take().expect("mapped slot must be occupied");
        self.free.push(idx);
        Some((node.key, node.value))
    }

    fn run_dispose(&mut self, key: K, value: V) {
        if let Some(dispose) = self.dispose.as_mut() {
            dispose(key, value);
        }
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        self.nodes[idx].as_mut().expect("linked slot must be occupied")
    }

    /// Removes `idx` from the recency list without freeing its slot.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node_mut(idx);
            (node.prev, node.next)
        };
        if prev != NIL {
            self.node_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.node_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
    }

    /// Moves `idx` to the most-recently-used position.
    fn promote(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        let old_head = self.head;
        let node = self.node_mut(idx);
        node.prev = NIL;
        node.next = old_head;
        if self.head != NIL {
            self.node_mut(self.head).prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}
