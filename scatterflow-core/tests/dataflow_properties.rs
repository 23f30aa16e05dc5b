use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use scatterflow_core::{Dataflow, GraphError, Resource};

#[derive(Debug, Clone)]
enum Op {
    Set(i32),
    Read,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(-4i32..4).prop_map(Op::Set), Just(Op::Read)]
}

struct Counted {
    released: Rc<Cell<u32>>,
}

impl Resource for Counted {
    fn release(&self) {
        self.released.set(self.released.get() + 1);
    }
}

proptest! {
    // A derivation runs once for the first read and once for every read that
    // follows at least one update, never more.
    #[test]
    fn derivation_runs_once_per_observed_change(ops in prop::collection::vec(op(), 0..64)) {
        let mut df = Dataflow::new();
        let calls = Rc::new(Cell::new(0u32));
        let c = df.value("c", 0i32);
        let counter = calls.clone();
        let doubled = df.derive("doubled", (c,), move |(c,)| {
            counter.set(counter.get() + 1);
            *c * 2
        }).unwrap();

        let mut expected = 0u32;
        let mut dirty = true;
        let mut current = 0i32;
        for op in ops {
            match op {
                Op::Set(v) => {
                    df.set(c, v).unwrap();
                    current = v;
                    dirty = true;
                }
                Op::Read => {
                    prop_assert_eq!(*df.get(doubled).unwrap(), current * 2);
                    prop_assert_eq!(*df.get(doubled).unwrap(), current * 2);
                    if dirty {
                        expected += 1;
                        dirty = false;
                    }
                }
            }
        }
        prop_assert_eq!(calls.get(), expected);
        prop_assert_eq!(df.evaluations(doubled).unwrap(), u64::from(expected));
    }

    // N observed replacements construct N resources and release N-1 of them;
    // the last is released only when the graph goes away.
    #[test]
    fn stateful_constructions_pair_with_releases(
        values in prop::collection::vec(1u32..1000, 1..32)
    ) {
        let constructed = Rc::new(Cell::new(0u32));
        let released = Rc::new(Cell::new(0u32));
        let reads = values.len() as u32;
        {
            let mut df = Dataflow::new();
            let size = df.value("size", 0u32);
            let made = constructed.clone();
            let freed = released.clone();
            let res = df.stateful_derive("res", (size,), move |(_size,)| {
                made.set(made.get() + 1);
                Ok(Counted { released: freed.clone() })
            }).unwrap();

            for v in &values {
                df.set(size, *v).unwrap();
                df.get(res).unwrap();
            }
            prop_assert_eq!(constructed.get(), reads);
            prop_assert_eq!(released.get(), reads - 1);
        }
        prop_assert_eq!(released.get(), reads);
    }
}

#[test]
fn dependents_observe_replaced_resource_after_it_is_installed() {
    // A bind-group-like node must only ever see the live buffer instance.
    struct Buffer {
        generation: u32,
        alive: Rc<RefCell<Vec<u32>>>,
    }
    impl Resource for Buffer {
        fn release(&self) {
            self.alive.borrow_mut().retain(|g| *g != self.generation);
        }
    }

    let alive = Rc::new(RefCell::new(Vec::new()));
    let mut df = Dataflow::new();
    let count = df.value("count", 1u32);
    let tracker = alive.clone();
    let buffer = df
        .stateful_derive("buffer", (count,), move |(count,)| {
            tracker.borrow_mut().push(*count);
            Ok(Buffer {
                generation: *count,
                alive: tracker.clone(),
            })
        })
        .unwrap();
    let check = alive.clone();
    let group = df
        .try_derive("group", (buffer,), move |(buffer,)| {
            anyhow::ensure!(
                check.borrow().contains(&buffer.generation),
                "bound a released buffer"
            );
            Ok(buffer.generation)
        })
        .unwrap();

    for n in 1..6 {
        df.set(count, n).unwrap();
        assert_eq!(*df.get(group).unwrap(), n);
        assert_eq!(*alive.borrow(), vec![n]);
    }
}

#[test]
fn failure_is_reported_against_the_failing_node() {
    let mut df = Dataflow::new();
    let limit = df.value("limit", 16u64);
    let request = df.value("request", 64u64);
    let allocation = df
        .try_derive("allocation", (limit, request), |(limit, request)| {
            anyhow::ensure!(*request <= *limit, "{} bytes exceeds {}", request, limit);
            Ok(*request)
        })
        .unwrap();
    let group = df.derive("group", (allocation,), |(a,)| *a).unwrap();

    let err = df.get(group).unwrap_err();
    match &err {
        GraphError::Recompute { label, .. } => assert_eq!(label, "allocation"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("64 bytes exceeds 16"));

    df.set(limit, 128).unwrap();
    assert_eq!(*df.get(group).unwrap(), 64);
}
