// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types surfaced by the entry graph.

use std::fmt;

/// Error produced when a memoized computation depends on itself.
///
/// A wrapped function that (directly or through other wrapped functions)
/// reads its own entry while that entry is recomputing would recurse without
/// bound; the graph detects this and produces this error instead. The error
/// value flows out of the innermost self-read like any other `Err` result, so
/// whichever computation observes it caches and rethrows it until
/// invalidated.
///
/// User error types opt in via `From`:
///
/// ```
/// use recall_graph::RecursiveDependencyError;
///
/// #[derive(Clone, Debug, PartialEq)]
/// enum MyError {
///     Cycle,
/// }
///
/// impl From<RecursiveDependencyError> for MyError {
///     fn from(_: RecursiveDependencyError) -> Self {
///         Self::Cycle
///     }
/// }
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct RecursiveDependencyError;

impl RecursiveDependencyError {
    /// Creates the error.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl fmt::Display for RecursiveDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("already recomputing")
    }
}

impl core::error::Error for RecursiveDependencyError {}

/// Error returned by a subscribe hook that could not establish its
/// notification channel.
///
/// A failed subscription is never surfaced to callers of the wrapper: the
/// affected entry is forced dirty instead, so the next read retries both the
/// computation and the subscription.
pub struct SubscribeError {
    message: Box<str>,
}

impl SubscribeError {
    /// Creates an error carrying a short description for diagnostics.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into().into_boxed_str(),
        }
    }
}

impl fmt::Debug for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscribeError").field(&self.message).finish()
    }
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription failed: {}", self.message)
    }
}

impl core::error::Error for SubscribeError {}
