// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The parent slot and context helpers.
//!
//! While an entry recomputes, it installs itself in a thread-local
//! [`Slot`] so that any wrapper invoked underneath can attach itself as a
//! dependency of the computation in progress. The helpers here control that
//! ambient state from the outside:
//!
//! - [`no_context`] reads without registering dependencies,
//! - [`bind_context`] carries the state across callback boundaries,
//! - [`bind_context_future`] carries it across `await` boundaries.

use std::future::Future;

use recall_context::Slot;

use crate::entry::EntryHandle;

thread_local! {
    /// The entry currently recomputing on this thread, if any.
    static PARENT: Slot<EntryHandle> = Slot::new();
}

/// Returns the entry currently recomputing, if any.
pub(crate) fn current_parent() -> Option<EntryHandle> {
    PARENT.with(Slot::get_value)
}

/// Returns `true` if some entry is currently recomputing.
pub(crate) fn has_parent() -> bool {
    PARENT.with(Slot::has_value)
}

/// Runs `body` with `parent` installed as the current entry.
pub(crate) fn with_parent<R>(parent: EntryHandle, body: impl FnOnce() -> R) -> R {
    PARENT.with(|slot| slot.with_value(parent, body))
}

/// Runs `f` without a current parent entry, so wrapper reads inside it
/// register no dependencies.
///
/// This is the non-reactive read: a computation can consult a memoized value
/// without being invalidated when that value later changes.
///
/// # Example
///
/// ```
/// use recall_graph::{no_context, wrap};
///
/// let double = wrap(|x: &u32| Ok::<_, recall_graph::RecursiveDependencyError>(x * 2));
/// let peeked = no_context(|| double.call(21));
/// assert_eq!(peeked, Ok(42));
/// ```
pub fn no_context<R>(f: impl FnOnce() -> R) -> R {
    recall_context::no_context(&PARENT, f)
}

/// Captures the current parent entry (or its absence) and returns a closure
/// that reinstates it around every invocation of `f`.
///
/// Use this when a recomputation hands work to code that runs outside the
/// recomputation's own call stack (callbacks, deferred closures) and that
/// work should still register dependencies against the capturing entry.
pub fn bind_context<R>(f: impl FnMut() -> R) -> impl FnMut() -> R {
    recall_context::bind(&PARENT, f)
}

/// Wraps `future` so the parent entry captured now is reinstated around every
/// `poll`.
///
/// An `async` computation loses the thread-local parent at its first
/// suspension point; polls resumed by the executor would register their
/// wrapper reads to no parent at all. Wrapping the future repairs that:
/// every poll runs as if still inside the capturing recomputation. The
/// returned future is not `Send`; the graph is single-threaded.
pub fn bind_context_future<F>(future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    recall_context::bind_future(&PARENT, future)
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::rc::Rc;
    use std::task::{Context, Poll, Waker};

    use super::*;
    use crate::entry::tests::leaf_entry;

    #[test]
    fn with_parent_scopes_the_slot() {
        assert!(!has_parent());
        let entry = leaf_entry();
        with_parent(entry, || {
            assert!(has_parent());
            no_context(|| assert!(!has_parent()));
            assert!(has_parent());
        });
        assert!(!has_parent());
    }

    #[test]
    fn bind_context_reinstates_parent() {
        let entry = leaf_entry();
        let id = entry.state().id();
        let mut bound = with_parent(entry, || bind_context(current_parent));

        assert!(!has_parent());
        let reinstated = bound().expect("bound closure must see the captured parent");
        assert_eq!(reinstated.state().id(), id);
    }

    #[test]
    fn bound_future_sees_parent_across_polls() {
        struct ParentProbe;

        impl Future for ParentProbe {
            type Output = bool;

            fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<bool> {
                Poll::Ready(has_parent())
            }
        }

        let entry = leaf_entry();
        let bare = with_parent(Rc::clone(&entry), || ParentProbe);
        let bound = with_parent(entry, || bind_context_future(ParentProbe));

        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);

        let mut bare = Box::pin(bare);
        let mut bound = Box::pin(bound);
        assert_eq!(bare.as_mut().poll(&mut cx), Poll::Ready(false));
        assert_eq!(bound.as_mut().poll(&mut cx), Poll::Ready(true));
    }
}
