// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recall Graph: reactive memoization with dependency-tracked invalidation.
//!
//! Wrap a computation with [`wrap`] and call it like the plain function it
//! was: results are cached per argument. The difference from ordinary
//! memoization is the *entry graph* maintained underneath. While a wrapped
//! computation runs, any other wrapped computation it calls (and any [`Dep`]
//! key it touches) is recorded as a dependency. Dirtying anything —
//! [`Memo::dirty`], [`Dep::dirty`], eviction — pushes an invalidation signal
//! up through the recorded dependents, and the next read pulls fresh values
//! by recomputing only the dirty part of the graph.
//!
//! This is the engine shape behind incremental build pipelines, query
//! caches, and view-model recomputation: write straightforward functions,
//! get push-based invalidation and pull-based lazy re-evaluation.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use recall_graph::{RecursiveDependencyError, wrap};
//!
//! let sources: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(vec!["a = 1", "b = a"]));
//!
//! let parse = {
//!     let sources = Rc::clone(&sources);
//!     wrap(move |i: &usize| {
//!         Ok::<_, RecursiveDependencyError>(sources.borrow()[*i].to_owned())
//!     })
//! };
//! let link = {
//!     let parse = parse.clone();
//!     wrap(move |_: &()| {
//!         let a = parse.call(0)?;
//!         let b = parse.call(1)?;
//!         Ok::<_, RecursiveDependencyError>(format!("{a}; {b}"))
//!     })
//! };
//!
//! assert_eq!(link.call(()), Ok("a = 1; b = a".to_owned()));
//!
//! // Editing a source does nothing until its parse entry is dirtied; then
//! // the next link() recomputes through the changed dependency.
//! sources.borrow_mut()[0] = "a = 2";
//! assert_eq!(link.call(()), Ok("a = 1; b = a".to_owned()));
//! parse.dirty(&0);
//! assert_eq!(link.call(()), Ok("a = 2; b = a".to_owned()));
//! ```
//!
//! ## Results, errors, and cycles
//!
//! Wrapped functions return `Result`; `Err` results are cached and replayed
//! exactly like `Ok` results until invalidated. A computation that reads
//! itself (directly or through other wrappers) is detected and fails with
//! [`RecursiveDependencyError`], which surfaces through the error type's
//! `From` conversion.
//!
//! ## Reading without depending
//!
//! [`no_context`] reads wrappers without registering dependencies;
//! [`bind_context`] and [`bind_context_future`] carry the current
//! computation across callback and `await` boundaries so dependencies keep
//! attributing correctly.
//!
//! ## Threading model
//!
//! One graph belongs to one thread: handles are neither `Send` nor `Sync`,
//! and the "currently recomputing" state is thread-local. Nothing here
//! blocks or schedules; recomputation happens only on demand, on the calling
//! thread.

mod context;
mod dep;
mod entry;
mod error;
mod pool;
mod wrap;

pub use context::{bind_context, bind_context_future, no_context};
pub use dep::{Dep, DirtyMethod};
pub use entry::Unsubscribe;
pub use error::{RecursiveDependencyError, SubscribeError};
pub use wrap::{DEFAULT_MAX, Memo, MemoBuilder, trie_key_fn, wrap};

// The building blocks, re-exported for embedders composing their own key
// schemes or caches in the same style.
pub use recall_context::Slot;
pub use recall_lru::Lru;
pub use recall_trie::{KeyTrie, TrieKey};
