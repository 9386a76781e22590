// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recycling pool for dirty-child sets.
//!
//! Most entries have no dirty children most of the time, so the set backing
//! that state is allocated on the first dirty report and returned here as
//! soon as it empties. The pool is bounded and thread-local; running dry or
//! full only costs an allocation, never correctness.

use std::cell::RefCell;

use hashbrown::HashSet;

use crate::entry::EntryId;

/// Retain at most this many empty sets for reuse.
const POOL_CAP: usize = 100;

thread_local! {
    static POOL: RefCell<Vec<HashSet<EntryId>>> = const { RefCell::new(Vec::new()) };
}

/// Returns an empty set, reusing a pooled one when available.
pub(crate) fn acquire() -> HashSet<EntryId> {
    POOL.with(|pool| pool.borrow_mut().pop().unwrap_or_default())
}

/// Returns `set` to the pool, dropping it if the pool is full.
pub(crate) fn release(mut set: HashSet<EntryId>) {
    set.clear();
    POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < POOL_CAP {
            pool.push(set);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_sets_are_reused() {
        let mut set = acquire();
        set.insert(crate::entry::EntryId::for_test(1));
        let capacity = set.capacity();
        release(set);

        let reused = acquire();
        assert!(reused.is_empty());
        // Capacity is retained across the pool round trip.
        assert!(reused.capacity() >= capacity);
    }

    #[test]
    fn pool_is_bounded() {
        for _ in 0..(POOL_CAP * 2) {
            release(HashSet::new());
        }
        let pooled = POOL.with(|pool| pool.borrow().len());
        assert!(pooled <= POOL_CAP);
    }
}
