// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recall Context: dynamically-scoped slots.
//!
//! A [`Slot`] is a single-value cell with dynamic extent: [`Slot::with_value`]
//! installs a value for the duration of a closure and restores the previous
//! state on every exit path, including unwinding. Readers anywhere down the
//! call stack observe the innermost installed value through
//! [`Slot::get_value`].
//!
//! Slots are the ambient-state primitive behind reactive dependency tracking:
//! a computation installs itself in a well-known slot while it runs, and
//! anything it calls can discover "who is currently computing" without
//! threading a parameter through every signature.
//!
//! Because the extent is dynamic rather than lexical, crossing a suspension
//! point (handing a closure to an executor, awaiting a future) leaves the
//! slot behind. The capture helpers repair this:
//!
//! - [`bind`] captures the current frame and reinstates it around every later
//!   invocation of the bound closure.
//! - [`bind_future`] wraps a [`Future`] so each `poll` runs with the captured
//!   frame installed.
//! - [`no_context`] runs a closure with the slot observably empty.
//!
//! ## Quick Start
//!
//! ```rust
//! use recall_context::Slot;
//!
//! thread_local! {
//!     static CURRENT: Slot<u32> = Slot::new();
//! }
//!
//! CURRENT.with(|slot| {
//!     assert!(!slot.has_value());
//!     let seen = slot.with_value(7, || {
//!         CURRENT.with(|inner| inner.get_value())
//!     });
//!     assert_eq!(seen, Some(7));
//!     assert!(!slot.has_value());
//! });
//! ```
//!
//! ## Threading model
//!
//! A `Slot` is single-threaded (`RefCell` inside); share one per thread via
//! `thread_local!`. The helper functions take the `LocalKey` so they can be
//! used with any slot a consumer declares.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::LocalKey;

/// A dynamically-scoped single-value cell.
///
/// The slot holds a stack of frames. [`with_value`](Self::with_value) pushes
/// a full frame, [`without_value`](Self::without_value) pushes a cleared one
/// (shadowing any outer value), and both pop on exit, unwinding included.
/// [`get_value`](Self::get_value) reads the innermost frame.
///
/// # Example
///
/// ```
/// use recall_context::Slot;
///
/// let slot = Slot::new();
/// slot.with_value("outer", || {
///     slot.with_value("inner", || {
///         assert_eq!(slot.get_value(), Some("inner"));
///     });
///     assert_eq!(slot.get_value(), Some("outer"));
///
///     slot.without_value(|| {
///         // The outer value is shadowed, not forgotten.
///         assert_eq!(slot.get_value(), None);
///     });
///     assert_eq!(slot.get_value(), Some("outer"));
/// });
/// ```
pub struct Slot<T> {
    frames: RefCell<Vec<Option<T>>>,
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("depth", &self.depth())
            .field("has_value", &self.has_value())
            .finish()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pops the pushed frame when the enclosing scope exits, unwinding included.
struct FrameGuard<'a, T> {
    slot: &'a Slot<T>,
}

impl<T> Drop for FrameGuard<'_, T> {
    fn drop(&mut self) {
        self.slot.frames.borrow_mut().pop();
    }
}

impl<T> Slot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
        }
    }

    /// Runs `body` with `value` installed, restoring the previous state on
    /// every exit path.
    pub fn with_value<R>(&self, value: T, body: impl FnOnce() -> R) -> R {
        self.with_frame(Some(value), body)
    }

    /// Runs `body` with the slot observably empty, restoring the previous
    /// state on every exit path.
    ///
    /// Any outer value is shadowed for the extent of `body`.
    pub fn without_value<R>(&self, body: impl FnOnce() -> R) -> R {
        self.with_frame(None, body)
    }

    /// Runs `body` with a previously captured frame reinstated.
    ///
    /// This is the primitive behind [`bind`] and [`bind_future`]: capture
    /// with [`get_value`](Self::get_value), reinstate here. `None` installs a
    /// cleared frame.
    pub fn with_frame<R>(&self, frame: Option<T>, body: impl FnOnce() -> R) -> R {
        self.frames.borrow_mut().push(frame);
        let _guard = FrameGuard { slot: self };
        body()
    }

    /// Returns `true` if the innermost frame holds a value.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.frames
            .borrow()
            .last()
            .is_some_and(|frame| frame.is_some())
    }

    /// Returns the number of frames currently pushed.
    ///
    /// Mostly a testing aid.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }
}

impl<T: Clone> Slot<T> {
    /// Returns the innermost installed value, or `None` if the slot is empty
    /// or cleared.
    #[must_use]
    pub fn get_value(&self) -> Option<T> {
        self.frames.borrow().last().and_then(Clone::clone)
    }
}

/// Captures the current frame of `slot` and returns a closure that reinstates
/// it around every invocation of `f`.
///
/// The returned closure is independent of whatever frames are installed when
/// it eventually runs: it always sees the state captured here. Capturing
/// while the slot is empty yields a closure that runs `f` with the slot
/// cleared.
///
/// # Example
///
/// ```
/// use recall_context::{bind, Slot};
///
/// thread_local! {
///     static CURRENT: Slot<&'static str> = Slot::new();
/// }
///
/// let mut rebound = CURRENT.with(|slot| {
///     slot.with_value("captured", || {
///         bind(&CURRENT, || CURRENT.with(|s| s.get_value()))
///     })
/// });
///
/// // The captured value is long out of scope, yet the binding restores it.
/// assert_eq!(rebound(), Some("captured"));
/// ```
pub fn bind<T, R>(
    slot: &'static LocalKey<Slot<T>>,
    mut f: impl FnMut() -> R,
) -> impl FnMut() -> R
where
    T: Clone + 'static,
{
    let captured = slot.with(Slot::get_value);
    move || {
        let frame = captured.clone();
        slot.with(|s| s.with_frame(frame, &mut f))
    }
}

/// Runs `f` with `slot` observably empty, restoring the previous state on
/// exit.
pub fn no_context<T, R>(slot: &'static LocalKey<Slot<T>>, f: impl FnOnce() -> R) -> R
where
    T: 'static,
{
    slot.with(|s| s.without_value(f))
}

/// A [`Future`] adapter that reinstates a captured slot frame around every
/// `poll`.
///
/// Built by [`bind_future`]. Executors move futures between polls; without
/// this adapter, any slot value installed when the future was created is
/// gone by the time it resumes after an `await`.
pub struct BoundFuture<T: 'static, F> {
    slot: &'static LocalKey<Slot<T>>,
    frame: Option<T>,
    inner: Pin<Box<F>>,
}

// The inner future is heap-pinned, so `BoundFuture` itself holds no pinned
// state and is safe to move between polls.
impl<T, F> Unpin for BoundFuture<T, F> {}

impl<T, F> fmt::Debug for BoundFuture<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFuture")
            .field("has_frame", &self.frame.is_some())
            .finish()
    }
}

impl<T, F> Future for BoundFuture<T, F>
where
    T: Clone + 'static,
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let frame = this.frame.clone();
        let inner = this.inner.as_mut();
        this.slot.with(|s| s.with_frame(frame, || inner.poll(cx)))
    }
}

/// Wraps `future` so that the current frame of `slot` is reinstated around
/// every `poll`.
///
/// This is the suspension-point analogue of [`bind`]: where `bind` repairs
/// callback boundaries, `bind_future` repairs `await` boundaries. The
/// returned future is not `Send`; slots are single-threaded state.
pub fn bind_future<T, F>(slot: &'static LocalKey<Slot<T>>, future: F) -> BoundFuture<T, F>
where
    T: Clone + 'static,
    F: Future,
{
    BoundFuture {
        slot,
        frame: slot.with(Slot::get_value),
        inner: Box::pin(future),
    }
}
