// Copyright 2026 the Recall Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tests for the `recall_graph` crate.
//!
//! These exercise cross-component behavior: wrappers layered on wrappers,
//! invalidation flowing through shared dependencies, eviction interacting
//! with dependents, and the subscription lifecycle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use recall_graph::{Memo, MemoBuilder, RecursiveDependencyError, Unsubscribe, wrap};

#[derive(Clone, Debug, PartialEq)]
enum TestError {
    Cycle(String),
    Message(String),
}

impl From<RecursiveDependencyError> for TestError {
    fn from(err: RecursiveDependencyError) -> Self {
        Self::Cycle(err.to_string())
    }
}

/// Deterministic toy digest, enough to tell concatenations apart.
fn digest(input: &str) -> u64 {
    input
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

#[test]
fn salted_identity() {
    let salt = Rc::new(RefCell::new("salt".to_owned()));
    let f = {
        let salt = Rc::clone(&salt);
        wrap(move |x: &String| Ok::<_, TestError>(format!("{x}{}", salt.borrow())))
    };

    assert_eq!(f.call("a".to_owned()), Ok("asalt".to_owned()));

    // The salt is not part of the key, so mutating it affects fresh keys
    // immediately but cached keys only after an explicit dirty.
    *salt.borrow_mut() = "NaCl".to_owned();
    assert_eq!(f.call("b".to_owned()), Ok("bNaCl".to_owned()));
    assert_eq!(f.call("a".to_owned()), Ok("asalt".to_owned()));

    f.dirty(&"a".to_owned());
    assert_eq!(f.call("a".to_owned()), Ok("aNaCl".to_owned()));
}

#[test]
fn two_layer_hash_recomputes_per_dirtied_input() {
    let files: Rc<RefCell<HashMap<String, String>>> = Rc::new(RefCell::new(HashMap::from([
        ("a.js".to_owned(), "console.log('a')".to_owned()),
        ("b.js".to_owned(), "console.log('b')".to_owned()),
    ])));

    let read_calls = Rc::new(Cell::new(0));
    let read = {
        let files = Rc::clone(&files);
        let read_calls = Rc::clone(&read_calls);
        wrap(move |path: &String| {
            read_calls.set(read_calls.get() + 1);
            Ok::<_, TestError>(files.borrow()[path].clone())
        })
    };

    let hash = {
        let read = read.clone();
        wrap(move |paths: &Vec<String>| {
            let mut concatenated = String::new();
            for path in paths {
                concatenated.push_str(&read.call(path.clone())?);
            }
            Ok::<_, TestError>(digest(&concatenated))
        })
    };

    let paths = vec!["a.js".to_owned(), "b.js".to_owned()];
    let original = hash.call(paths.clone()).unwrap();
    assert_eq!(read_calls.get(), 2);

    // Mutating the backing store without dirtying the reader changes
    // nothing: both layers serve their caches.
    files
        .borrow_mut()
        .insert("a.js".to_owned(), "console.log('A')".to_owned());
    assert_eq!(hash.call(paths.clone()), Ok(original));
    assert_eq!(read_calls.get(), 2);

    read.dirty(&"a.js".to_owned());
    let after_a = hash.call(paths.clone()).unwrap();
    assert_ne!(after_a, original);
    assert_eq!(read_calls.get(), 3);

    files
        .borrow_mut()
        .insert("b.js".to_owned(), "console.log('B')".to_owned());
    read.dirty(&"b.js".to_owned());
    let after_b = hash.call(paths).unwrap();
    assert_ne!(after_b, after_a);
    assert_eq!(read_calls.get(), 4);
}

#[test]
fn subscription_lifecycle_under_eviction() {
    type TestMemo = Memo<String, String, TestError>;

    let sep = Rc::new(RefCell::new(",".to_owned()));
    let subscribes = Rc::new(Cell::new(0));
    let unsubscribes = Rc::new(Cell::new(0));
    let latest_dirty: Rc<RefCell<Option<Box<dyn Fn()>>>> = Rc::new(RefCell::new(None));
    let memo_slot: Rc<RefCell<Option<TestMemo>>> = Rc::new(RefCell::new(None));

    let test: TestMemo = {
        let sep = Rc::clone(&sep);
        let subscribes = Rc::clone(&subscribes);
        let unsubscribes = Rc::clone(&unsubscribes);
        let latest_dirty = Rc::clone(&latest_dirty);
        let memo_slot = Rc::clone(&memo_slot);
        MemoBuilder::new(move |x: &String| {
            Ok(vec![x.clone(), x.clone(), x.clone()].join(&sep.borrow()))
        })
        .max(1)
        .subscribe(move |x: &String| {
            subscribes.set(subscribes.get() + 1);
            let memo = memo_slot.borrow().clone().expect("memo installed");
            let key = x.clone();
            *latest_dirty.borrow_mut() = Some(Box::new(move || memo.dirty(&key)));
            let unsubscribes = Rc::clone(&unsubscribes);
            Ok(Box::new(move || {
                unsubscribes.set(unsubscribes.get() + 1);
            }) as Unsubscribe)
        })
        .build()
    };
    *memo_slot.borrow_mut() = Some(test.clone());

    assert_eq!(test.call("a".to_owned()), Ok("a,a,a".to_owned()));
    assert_eq!((subscribes.get(), unsubscribes.get()), (1, 0));
    assert_eq!(test.len(), 1);

    // Each call past capacity evicts the previous entry, firing exactly one
    // unsubscribe per eviction.
    assert_eq!(test.call("b".to_owned()), Ok("b,b,b".to_owned()));
    assert_eq!((subscribes.get(), unsubscribes.get()), (2, 1));

    assert_eq!(test.call("c".to_owned()), Ok("c,c,c".to_owned()));
    assert_eq!((subscribes.get(), unsubscribes.get()), (3, 2));
    assert_eq!(test.len(), 1);

    // A separator change alone does not invalidate the cached result.
    *sep.borrow_mut() = "|".to_owned();
    assert_eq!(test.call("c".to_owned()), Ok("c,c,c".to_owned()));
    assert_eq!(subscribes.get(), 3);

    // The dirty handle captured by the last subscription does.
    let fire = latest_dirty
        .borrow_mut()
        .take()
        .expect("last subscription must capture a dirty handle");
    fire();
    assert_eq!(unsubscribes.get(), 3);
    assert_eq!(test.call("c".to_owned()), Ok("c|c|c".to_owned()));
    assert_eq!((subscribes.get(), unsubscribes.get()), (4, 3));

    *memo_slot.borrow_mut() = None;
}

#[test]
fn self_cycle_detected_then_recoverable() {
    type TestMemo = Memo<(), u32, TestError>;

    let recurse = Rc::new(Cell::new(true));
    let self_slot: Rc<RefCell<Option<TestMemo>>> = Rc::new(RefCell::new(None));

    let memo: TestMemo = {
        let recurse = Rc::clone(&recurse);
        let self_slot = Rc::clone(&self_slot);
        wrap(move |_: &()| {
            if recurse.get() {
                let this = self_slot.borrow().clone().expect("self handle installed");
                this.call(()).map(|v| v + 1)
            } else {
                Ok(100)
            }
        })
    };
    *self_slot.borrow_mut() = Some(memo.clone());

    // The self-read fails with a single cycle error, which caches and
    // replays like any other error.
    assert_eq!(
        memo.call(()),
        Err(TestError::Cycle("already recomputing".to_owned()))
    );
    assert_eq!(
        memo.call(()),
        Err(TestError::Cycle("already recomputing".to_owned()))
    );

    // Invalidation succeeds, and once the cycle is gone so does the read.
    memo.dirty(&());
    recurse.set(false);
    assert_eq!(memo.call(()), Ok(100));

    *self_slot.borrow_mut() = None;
}

#[test]
fn evicting_a_dependency_dirties_the_dependent() {
    let child_salt = Rc::new(RefCell::new("c1".to_owned()));
    let parent_salt = Rc::new(RefCell::new("p1".to_owned()));

    let child: Memo<String, String, TestError> = {
        let child_salt = Rc::clone(&child_salt);
        MemoBuilder::new(move |x: &String| Ok(format!("{x}:{}", child_salt.borrow())))
            .max(1)
            .build()
    };
    let parent = {
        let child = child.clone();
        let parent_salt = Rc::clone(&parent_salt);
        wrap(move |x: &String| {
            let inner = child.call(x.clone())?;
            Ok::<_, TestError>(format!("{inner}+{}", parent_salt.borrow()))
        })
    };

    assert_eq!(parent.call("asdf".to_owned()), Ok("asdf:c1+p1".to_owned()));

    // This call pushes the child cache over capacity; the quiescent clean
    // evicts child("asdf"), which the parent depends on.
    assert_eq!(child.call("zxcv".to_owned()), Ok("zxcv:c1".to_owned()));
    assert_eq!(child.len(), 1);

    // Losing a dependency is equivalent to being dirtied: the parent must
    // recompute and observe both current salts.
    *child_salt.borrow_mut() = "c2".to_owned();
    *parent_salt.borrow_mut() = "p2".to_owned();
    assert_eq!(parent.call("asdf".to_owned()), Ok("asdf:c2+p2".to_owned()));
}

#[test]
fn caught_child_error_is_an_ordinary_parent_value() {
    let child_calls = Rc::new(Cell::new(0));
    let child: Memo<(), u32, TestError> = {
        let child_calls = Rc::clone(&child_calls);
        wrap(move |_: &()| {
            child_calls.set(child_calls.get() + 1);
            Err(TestError::Message("boom".to_owned()))
        })
    };
    let parent: Memo<(), TestError, TestError> = {
        let child = child.clone();
        wrap(move |_: &()| match child.call(()) {
            Err(err) => Ok(err),
            Ok(value) => Ok(TestError::Message(format!("unexpectedly ok: {value}"))),
        })
    };

    let caught = TestError::Message("boom".to_owned());
    assert_eq!(parent.call(()), Ok(caught.clone()));
    assert_eq!(child_calls.get(), 1);

    // The child error replays from cache.
    assert_eq!(parent.call(()), Ok(caught.clone()));
    assert_eq!(child_calls.get(), 1);

    // Dirtying either layer re-runs the throw-and-catch with the same
    // outcome.
    child.dirty(&());
    assert_eq!(parent.call(()), Ok(caught.clone()));
    assert_eq!(child_calls.get(), 2);

    parent.dirty(&());
    assert_eq!(parent.call(()), Ok(caught));
    assert_eq!(child_calls.get(), 2);
}

#[test]
fn diamond_dependency_recomputes_each_layer_once() {
    let base_value = Rc::new(Cell::new(1_u32));
    let base_calls = Rc::new(Cell::new(0));
    let base = {
        let base_value = Rc::clone(&base_value);
        let base_calls = Rc::clone(&base_calls);
        wrap(move |_: &()| {
            base_calls.set(base_calls.get() + 1);
            Ok::<_, TestError>(base_value.get())
        })
    };

    let left = {
        let base = base.clone();
        wrap(move |_: &()| base.call(()).map(|v| v + 10))
    };
    let right = {
        let base = base.clone();
        wrap(move |_: &()| base.call(()).map(|v| v + 20))
    };

    let top_calls = Rc::new(Cell::new(0));
    let top = {
        let left = left.clone();
        let right = right.clone();
        let top_calls = Rc::clone(&top_calls);
        wrap(move |_: &()| {
            top_calls.set(top_calls.get() + 1);
            Ok::<_, TestError>(left.call(())? + right.call(())?)
        })
    };

    assert_eq!(top.call(()), Ok(32));
    assert_eq!((base_calls.get(), top_calls.get()), (1, 1));

    base_value.set(2);
    base.dirty(&());

    // The shared base recomputes once, both arms refresh, and the top
    // recomputes once against the new values.
    assert_eq!(top.call(()), Ok(34));
    assert_eq!((base_calls.get(), top_calls.get()), (2, 2));
}

#[test]
fn clean_propagation_stops_at_unchanged_values() {
    let raw = Rc::new(RefCell::new("  padded  ".to_owned()));
    let trim_calls = Rc::new(Cell::new(0));
    let trim = {
        let raw = Rc::clone(&raw);
        let trim_calls = Rc::clone(&trim_calls);
        wrap(move |_: &()| {
            trim_calls.set(trim_calls.get() + 1);
            Ok::<_, TestError>(raw.borrow().trim().to_owned())
        })
    };

    let upper_calls = Rc::new(Cell::new(0));
    let upper = {
        let trim = trim.clone();
        let upper_calls = Rc::clone(&upper_calls);
        wrap(move |_: &()| {
            upper_calls.set(upper_calls.get() + 1);
            trim.call(()).map(|s| s.to_uppercase())
        })
    };

    assert_eq!(upper.call(()), Ok("PADDED".to_owned()));
    assert_eq!((trim_calls.get(), upper_calls.get()), (1, 1));

    // The edit changes only whitespace, so the trimmed value is equal and
    // the dependent layer is spared.
    *raw.borrow_mut() = "padded".to_owned();
    trim.dirty(&());
    assert_eq!(upper.call(()), Ok("PADDED".to_owned()));
    assert_eq!((trim_calls.get(), upper_calls.get()), (2, 1));
}

#[test]
fn forgetting_a_shared_child_dirties_all_dependents() {
    let child = wrap(|x: &u32| Ok::<_, TestError>(*x));
    let parent_calls = Rc::new(Cell::new(0));
    let parent_a = {
        let child = child.clone();
        let parent_calls = Rc::clone(&parent_calls);
        wrap(move |x: &u32| {
            parent_calls.set(parent_calls.get() + 1);
            child.call(*x)
        })
    };
    let parent_b = {
        let child = child.clone();
        let parent_calls = Rc::clone(&parent_calls);
        wrap(move |x: &u32| {
            parent_calls.set(parent_calls.get() + 1);
            child.call(*x).map(|v| v * 2)
        })
    };

    assert_eq!(parent_a.call(5), Ok(5));
    assert_eq!(parent_b.call(5), Ok(10));
    assert_eq!(parent_calls.get(), 2);

    assert!(child.forget(&5));

    assert_eq!(parent_a.call(5), Ok(5));
    assert_eq!(parent_b.call(5), Ok(10));
    assert_eq!(parent_calls.get(), 4);
}
