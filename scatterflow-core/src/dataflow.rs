/*!
# Incremental Dataflow Graph

A static DAG of nodes. Constant nodes hold host-supplied values; derived nodes
compute their value from a fixed tuple of dependencies and are evaluated lazily
on read.

## Generations

Every `set` advances the graph revision. Each node records the revision at which
its value last changed (`changed_at`) and the revision of its last evaluation
(`evaluated_at`). A derived node is re-evaluated only when
`max(dep.changed_at) > evaluated_at`, so a node runs at most once per revision
no matter how many paths read it.

## Stateful nodes

A stateful node owns a [`Resource`]. When it is re-evaluated the replacement is
constructed first; only once construction succeeded is the previous instance
released and the new one installed. Dependents are re-evaluated afterwards, on
their own next read. The final instances are released in reverse creation order
when the graph drops.
*/

use std::any::Any;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::node::{Inputs, Node, NodeId};
use crate::resource::Resource;

static NEXT_GRAPH_ID: AtomicU32 = AtomicU32::new(1);

type Compute = Box<dyn FnMut(&Dataflow) -> anyhow::Result<Rc<dyn Any>>>;
type Release = Box<dyn Fn(&dyn Any)>;
type SameValue = Box<dyn Fn(&dyn Any, &dyn Any) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Constant,
    Pure,
    Stateful,
}

struct Slot {
    label: String,
    kind: NodeKind,
    deps: Vec<usize>,
    defined: bool,
    compute: Option<Compute>,
    release: Option<Release>,
    same: Option<SameValue>,
    value: Option<Rc<dyn Any>>,
    failure: Option<GraphError>,
    changed_at: u64,
    evaluated_at: Option<u64>,
    verified_at: Option<u64>,
    evaluations: u64,
}

impl Slot {
    fn new(label: String, kind: NodeKind) -> Self {
        Self {
            label,
            kind,
            deps: Vec::new(),
            defined: false,
            compute: None,
            release: None,
            same: None,
            value: None,
            failure: None,
            changed_at: 0,
            evaluated_at: None,
            verified_at: None,
            evaluations: 0,
        }
    }
}

/// Owner of all nodes, their cached values and their resources.
///
/// Single-threaded: values are shared as `Rc`, and resolution needs `&mut self`.
pub struct Dataflow {
    id: u32,
    revision: u64,
    slots: Vec<Slot>,
}

impl Default for Dataflow {
    fn default() -> Self {
        Self::new()
    }
}

impl Dataflow {
    pub fn new() -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            revision: 0,
            slots: Vec::new(),
        }
    }

    /// Current graph revision; advances on every `set`.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Create a constant root node.
    pub fn value<T: 'static>(&mut self, label: impl Into<String>, value: T) -> Node<T> {
        let mut slot = Slot::new(label.into(), NodeKind::Constant);
        slot.defined = true;
        slot.value = Some(Rc::new(value));
        slot.changed_at = self.revision;
        self.push(slot)
    }

    /// Replace the value of a constant node, invalidating its dependents.
    pub fn set<T: 'static>(&mut self, node: Node<T>, value: T) -> GraphResult<()> {
        let index = self.constant_index(node.id())?;
        self.revision += 1;
        let slot = &mut self.slots[index];
        slot.value = Some(Rc::new(value));
        slot.changed_at = self.revision;
        Ok(())
    }

    /// Like [`Dataflow::set`], but leaves the graph untouched when the value is
    /// equal to the current one. Returns whether anything changed.
    pub fn set_if_changed<T: PartialEq + 'static>(
        &mut self,
        node: Node<T>,
        value: T,
    ) -> GraphResult<bool> {
        let index = self.constant_index(node.id())?;
        let unchanged = self.slots[index]
            .value
            .as_ref()
            .and_then(|current| current.downcast_ref::<T>())
            .is_some_and(|current| *current == value);
        if unchanged {
            return Ok(false);
        }
        self.set(node, value)?;
        Ok(true)
    }

    /// Create a pure node. `f` runs on first read and whenever a dependency
    /// changed since the last evaluation.
    pub fn derive<D, T, F>(
        &mut self,
        label: impl Into<String>,
        deps: D,
        mut f: F,
    ) -> GraphResult<Node<T>>
    where
        D: Inputs + 'static,
        T: 'static,
        F: FnMut(D::Values) -> T + 'static,
    {
        self.try_derive(label, deps, move |values| Ok(f(values)))
    }

    /// Pure node whose dependents are only invalidated when the recomputed
    /// value differs from the previous one.
    pub fn derive_eq<D, T, F>(
        &mut self,
        label: impl Into<String>,
        deps: D,
        mut f: F,
    ) -> GraphResult<Node<T>>
    where
        D: Inputs + 'static,
        T: PartialEq + 'static,
        F: FnMut(D::Values) -> T + 'static,
    {
        let node = self.declare::<T>(label);
        self.install(node.id(), NodeKind::Pure, deps, move |values| Ok(f(values)))?;
        let index = self.local_index(node.id())?;
        self.slots[index].same = Some(Box::new(|old: &dyn Any, new: &dyn Any| {
            match (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
                (Some(old), Some(new)) => old == new,
                _ => false,
            }
        }));
        Ok(node)
    }

    /// Pure node with a fallible derivation.
    pub fn try_derive<D, T, F>(
        &mut self,
        label: impl Into<String>,
        deps: D,
        f: F,
    ) -> GraphResult<Node<T>>
    where
        D: Inputs + 'static,
        T: 'static,
        F: FnMut(D::Values) -> anyhow::Result<T> + 'static,
    {
        let node = self.declare::<T>(label);
        self.install(node.id(), NodeKind::Pure, deps, f)?;
        Ok(node)
    }

    /// Create a resource-owning node. `f` only constructs; the graph releases
    /// the previous instance once the replacement exists.
    pub fn stateful_derive<D, T, F>(
        &mut self,
        label: impl Into<String>,
        deps: D,
        f: F,
    ) -> GraphResult<Node<T>>
    where
        D: Inputs + 'static,
        T: Resource,
        F: FnMut(D::Values) -> anyhow::Result<T> + 'static,
    {
        let node = self.declare::<T>(label);
        self.define_stateful(node, deps, f)?;
        Ok(node)
    }

    /// Reserve a node to be defined later, allowing builders to reference a
    /// node before its derivation is known.
    pub fn declare<T: 'static>(&mut self, label: impl Into<String>) -> Node<T> {
        self.push(Slot::new(label.into(), NodeKind::Pure))
    }

    /// Define a previously declared node as a pure derivation.
    pub fn define_derive<D, T, F>(&mut self, node: Node<T>, deps: D, f: F) -> GraphResult<()>
    where
        D: Inputs + 'static,
        T: 'static,
        F: FnMut(D::Values) -> anyhow::Result<T> + 'static,
    {
        self.install(node.id(), NodeKind::Pure, deps, f)
    }

    /// Define a previously declared node as a stateful derivation.
    pub fn define_stateful<D, T, F>(&mut self, node: Node<T>, deps: D, f: F) -> GraphResult<()>
    where
        D: Inputs + 'static,
        T: Resource,
        F: FnMut(D::Values) -> anyhow::Result<T> + 'static,
    {
        self.install(node.id(), NodeKind::Stateful, deps, f)?;
        let index = self.local_index(node.id())?;
        self.slots[index].release = Some(Box::new(|value: &dyn Any| {
            if let Some(resource) = value.downcast_ref::<T>() {
                resource.release();
            }
        }));
        Ok(())
    }

    /// Read a node, evaluating it and anything it depends on as needed.
    pub fn get<T: 'static>(&mut self, node: Node<T>) -> GraphResult<Rc<T>> {
        let index = self.local_index(node.id())?;
        self.resolve(index)?;
        self.cached(node)
    }

    /// How many times the node's derivation has run successfully.
    pub fn evaluations<T>(&self, node: Node<T>) -> GraphResult<u64> {
        let index = self.local_index(node.id())?;
        Ok(self.slots[index].evaluations)
    }

    pub fn label<T>(&self, node: Node<T>) -> GraphResult<&str> {
        let index = self.local_index(node.id())?;
        Ok(&self.slots[index].label)
    }

    pub fn kind<T>(&self, node: Node<T>) -> GraphResult<NodeKind> {
        let index = self.local_index(node.id())?;
        Ok(self.slots[index].kind)
    }

    /// The cached value without resolution. Used while fetching dependency
    /// values, which are always resolved first.
    pub(crate) fn cached<T: 'static>(&self, node: Node<T>) -> GraphResult<Rc<T>> {
        let index = self.local_index(node.id())?;
        let slot = &self.slots[index];
        if let Some(failure) = &slot.failure {
            return Err(failure.clone());
        }
        let value = slot.value.clone().ok_or_else(|| GraphError::Undefined {
            node: node.id(),
            label: slot.label.clone(),
        })?;
        value
            .downcast::<T>()
            .map_err(|_| GraphError::ForeignNode { node: node.id() })
    }

    fn push<T>(&mut self, slot: Slot) -> Node<T> {
        let id = NodeId::new(self.id, self.slots.len() as u32);
        self.slots.push(slot);
        Node::from_id(id)
    }

    fn local_index(&self, id: NodeId) -> GraphResult<usize> {
        let index = id.index() as usize;
        if id.graph() != self.id || index >= self.slots.len() {
            return Err(GraphError::ForeignNode { node: id });
        }
        Ok(index)
    }

    fn constant_index(&self, id: NodeId) -> GraphResult<usize> {
        let index = self.local_index(id)?;
        let slot = &self.slots[index];
        if slot.kind != NodeKind::Constant {
            return Err(GraphError::NotConstant {
                node: id,
                label: slot.label.clone(),
            });
        }
        Ok(index)
    }

    fn install<D, T, F>(&mut self, id: NodeId, kind: NodeKind, deps: D, mut f: F) -> GraphResult<()>
    where
        D: Inputs + 'static,
        T: 'static,
        F: FnMut(D::Values) -> anyhow::Result<T> + 'static,
    {
        let index = self.local_index(id)?;
        if self.slots[index].defined {
            return Err(GraphError::AlreadyDefined {
                node: id,
                label: self.slots[index].label.clone(),
            });
        }

        let mut dep_indices = Vec::new();
        for dep in deps.ids() {
            dep_indices.push(self.local_index(dep)?);
        }
        if self.reaches(&dep_indices, index) {
            return Err(GraphError::Cycle {
                node: id,
                label: self.slots[index].label.clone(),
            });
        }

        let compute: Compute = Box::new(move |graph: &Dataflow| {
            let values = deps.fetch(graph)?;
            let value = f(values)?;
            Ok(Rc::new(value) as Rc<dyn Any>)
        });

        let slot = &mut self.slots[index];
        slot.kind = kind;
        slot.deps = dep_indices;
        slot.compute = Some(compute);
        slot.defined = true;
        Ok(())
    }

    /// Whether `target` is reachable from any of `starts` along dependency edges.
    fn reaches(&self, starts: &[usize], target: usize) -> bool {
        let mut visited = vec![false; self.slots.len()];
        let mut stack: Vec<usize> = starts.to_vec();
        while let Some(index) = stack.pop() {
            if index == target {
                return true;
            }
            if std::mem::replace(&mut visited[index], true) {
                continue;
            }
            stack.extend(self.slots[index].deps.iter().copied());
        }
        false
    }

    fn outcome(&self, index: usize) -> GraphResult<()> {
        match &self.slots[index].failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    fn resolve(&mut self, index: usize) -> GraphResult<()> {
        let revision = self.revision;
        let slot = &self.slots[index];
        if !slot.defined {
            return Err(GraphError::Undefined {
                node: NodeId::new(self.id, index as u32),
                label: slot.label.clone(),
            });
        }
        if slot.verified_at == Some(revision) {
            return self.outcome(index);
        }
        if slot.kind == NodeKind::Constant {
            self.slots[index].verified_at = Some(revision);
            return Ok(());
        }

        let deps = slot.deps.clone();
        let mut newest = 0;
        for dep in deps {
            self.resolve(dep)?;
            newest = newest.max(self.slots[dep].changed_at);
        }

        let stale = self.slots[index]
            .evaluated_at
            .map_or(true, |evaluated| newest > evaluated);
        if stale {
            self.evaluate(index);
        }
        self.slots[index].verified_at = Some(revision);
        self.outcome(index)
    }

    fn evaluate(&mut self, index: usize) {
        let revision = self.revision;
        let Some(mut compute) = self.slots[index].compute.take() else {
            return;
        };
        let result = compute(&*self);
        let node = NodeId::new(self.id, index as u32);
        let slot = &mut self.slots[index];
        slot.compute = Some(compute);
        slot.evaluated_at = Some(revision);

        match result {
            Ok(value) => {
                slot.evaluations += 1;
                slot.failure = None;
                let unchanged = match (&slot.same, &slot.value) {
                    (Some(same), Some(previous)) => same(previous.as_ref(), value.as_ref()),
                    _ => false,
                };
                if unchanged {
                    log::trace!("node '{}' recomputed to an equal value", slot.label);
                    return;
                }
                if let Some(previous) = slot.value.take() {
                    if let Some(release) = &slot.release {
                        log::debug!("releasing previous instance of '{}'", slot.label);
                        release(previous.as_ref());
                    }
                }
                match slot.kind {
                    NodeKind::Stateful => log::debug!("installed new instance of '{}'", slot.label),
                    _ => log::trace!("recomputed '{}'", slot.label),
                }
                slot.value = Some(value);
                slot.changed_at = revision;
            }
            Err(cause) => {
                // A dependency failure is reported as-is rather than wrapped
                // again at every level.
                let failure = match cause.downcast::<GraphError>() {
                    Ok(inner) => inner,
                    Err(cause) => {
                        log::warn!("derivation of '{}' failed: {:#}", slot.label, cause);
                        GraphError::Recompute {
                            node,
                            label: slot.label.clone(),
                            cause: Arc::new(cause),
                        }
                    }
                };
                slot.failure = Some(failure);
            }
        }
    }
}

impl Drop for Dataflow {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut().rev() {
            if let (Some(release), Some(value)) = (&slot.release, slot.value.take()) {
                log::debug!("releasing '{}' on teardown", slot.label);
                release(value.as_ref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn test_constant_read() {
        let mut df = Dataflow::new();
        let c = df.value("c", 7u32);
        assert_eq!(*df.get(c).unwrap(), 7);
        df.set(c, 8).unwrap();
        assert_eq!(*df.get(c).unwrap(), 8);
        assert_eq!(df.revision(), 1);
    }

    #[test]
    fn test_derive_runs_once_per_revision() {
        let mut df = Dataflow::new();
        let calls = Rc::new(Cell::new(0));
        let c = df.value("c", 2i64);
        let counter = calls.clone();
        let a = df
            .derive("a", (c,), move |(c,)| {
                counter.set(counter.get() + 1);
                *c * 10
            })
            .unwrap();

        assert_eq!(*df.get(a).unwrap(), 20);
        assert_eq!(*df.get(a).unwrap(), 20);
        assert_eq!(calls.get(), 1);

        df.set(c, 3).unwrap();
        assert_eq!(calls.get(), 1, "evaluation is lazy");
        assert_eq!(*df.get(a).unwrap(), 30);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_diamond_evaluates_shared_node_once() {
        let mut df = Dataflow::new();
        let calls = Rc::new(Cell::new(0));
        let c = df.value("c", 1i32);
        let counter = calls.clone();
        let shared = df
            .derive("shared", (c,), move |(c,)| {
                counter.set(counter.get() + 1);
                *c + 1
            })
            .unwrap();
        let left = df.derive("left", (shared,), |(s,)| *s * 2).unwrap();
        let right = df.derive("right", (shared,), |(s,)| *s * 3).unwrap();
        let sum = df.derive("sum", (left, right), |(l, r)| *l + *r).unwrap();

        assert_eq!(*df.get(sum).unwrap(), 10);
        assert_eq!(*df.get(left).unwrap(), 4);
        assert_eq!(calls.get(), 1);

        df.set(c, 2).unwrap();
        assert_eq!(*df.get(sum).unwrap(), 15);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_derive_eq_cuts_off_unchanged_values() {
        let mut df = Dataflow::new();
        let count = df.value("count", 0u64);
        let size = df
            .derive_eq("size", (count,), |(count,)| (*count * 4).max(4))
            .unwrap();
        let allocations = Rc::new(Cell::new(0));
        let counter = allocations.clone();
        let buffer = df
            .derive("buffer", (size,), move |(size,)| {
                counter.set(counter.get() + 1);
                vec![0u8; *size as usize]
            })
            .unwrap();

        assert_eq!(df.get(buffer).unwrap().len(), 4);
        df.set(count, 1).unwrap();
        assert_eq!(df.get(buffer).unwrap().len(), 4);
        assert_eq!(allocations.get(), 1, "size stayed 4, buffer kept");

        df.set(count, 2).unwrap();
        assert_eq!(df.get(buffer).unwrap().len(), 8);
        assert_eq!(allocations.get(), 2);
    }

    #[test]
    fn test_set_if_changed_skips_equal_values() {
        let mut df = Dataflow::new();
        let c = df.value("c", 5u8);
        assert!(!df.set_if_changed(c, 5).unwrap());
        assert_eq!(df.revision(), 0);
        assert!(df.set_if_changed(c, 6).unwrap());
        assert_eq!(df.revision(), 1);
    }

    #[test]
    fn test_set_on_derived_node_is_rejected() {
        let mut df = Dataflow::new();
        let c = df.value("c", 1u8);
        let d = df.derive("d", (c,), |(c,)| *c).unwrap();
        let err = df.set(d, 2).unwrap_err();
        assert!(matches!(err, GraphError::NotConstant { .. }));
    }

    #[test]
    fn test_forward_declaration_cycle_is_rejected() {
        let mut df = Dataflow::new();
        let a = df.declare::<u32>("a");
        let b = df.derive("b", (a,), |(a,)| *a + 1).unwrap();
        let err = df
            .define_derive(a, (b,), |(b,)| Ok(*b + 1))
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));

        let self_loop = df.declare::<u32>("self");
        let err = df
            .define_derive(self_loop, (self_loop,), |(v,)| Ok(*v))
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn test_undefined_declaration_read_fails() {
        let mut df = Dataflow::new();
        let a = df.declare::<u32>("a");
        let b = df.derive("b", (a,), |(a,)| *a).unwrap();
        assert!(matches!(df.get(b), Err(GraphError::Undefined { .. })));
        df.define_derive(a, (), |()| Ok(4)).unwrap();
        assert_eq!(*df.get(b).unwrap(), 4);
    }

    #[test]
    fn test_foreign_node_is_rejected() {
        let mut first = Dataflow::new();
        let mut second = Dataflow::new();
        let c = first.value("c", 1u32);
        assert!(matches!(second.get(c), Err(GraphError::ForeignNode { .. })));
        assert!(matches!(
            second.derive("d", (c,), |(c,)| *c),
            Err(GraphError::ForeignNode { .. })
        ));
    }

    #[test]
    fn test_failure_sticks_until_dependency_changes() {
        let mut df = Dataflow::new();
        let attempts = Rc::new(Cell::new(0));
        let c = df.value("c", -1i32);
        let counter = attempts.clone();
        let checked = df
            .try_derive("checked", (c,), move |(c,)| {
                counter.set(counter.get() + 1);
                anyhow::ensure!(*c >= 0, "negative input {}", c);
                Ok(*c as u32)
            })
            .unwrap();
        let downstream = df.derive("downstream", (checked,), |(v,)| *v + 1).unwrap();

        let err = df.get(downstream).unwrap_err();
        assert!(matches!(err, GraphError::Recompute { .. }));
        assert_eq!(err.node(), checked.id());
        assert!(df.get(checked).is_err());
        assert_eq!(attempts.get(), 1, "failed node is not retried without a change");

        df.set(c, 4).unwrap();
        assert_eq!(*df.get(downstream).unwrap(), 5);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_failed_pure_node_keeps_previous_value_out_of_reach() {
        let mut df = Dataflow::new();
        let c = df.value("c", 1i32);
        let d = df
            .try_derive("d", (c,), |(c,)| {
                anyhow::ensure!(*c != 0, "zero");
                Ok(10 / *c)
            })
            .unwrap();
        assert_eq!(*df.get(d).unwrap(), 10);
        df.set(c, 0).unwrap();
        assert!(df.get(d).is_err());
        df.set(c, 5).unwrap();
        assert_eq!(*df.get(d).unwrap(), 2);
    }

    struct Tracked {
        id: u32,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Resource for Tracked {
        fn release(&self) {
            self.log.borrow_mut().push(format!("release {}", self.id));
        }
    }

    #[test]
    fn test_stateful_replacement_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut df = Dataflow::new();
            let size = df.value("size", 1u32);
            let sink = log.clone();
            let res = df
                .stateful_derive("res", (size,), move |(size,)| {
                    sink.borrow_mut().push(format!("create {}", size));
                    Ok(Tracked {
                        id: *size,
                        log: sink.clone(),
                    })
                })
                .unwrap();

            assert_eq!(df.get(res).unwrap().id, 1);
            df.set(size, 2).unwrap();
            assert_eq!(df.get(res).unwrap().id, 2);
            assert_eq!(df.kind(res).unwrap(), NodeKind::Stateful);
        }
        assert_eq!(
            *log.borrow(),
            vec!["create 1", "create 2", "release 1", "release 2"]
        );
    }

    #[test]
    fn test_stateful_failure_keeps_previous_resource_alive() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut df = Dataflow::new();
        let size = df.value("size", 1u32);
        let sink = log.clone();
        let res = df
            .stateful_derive("res", (size,), move |(size,)| {
                anyhow::ensure!(*size < 100, "size {} exceeds limit", size);
                Ok(Tracked {
                    id: *size,
                    log: sink.clone(),
                })
            })
            .unwrap();
        df.get(res).unwrap();
        df.set(size, 1000).unwrap();
        assert!(df.get(res).is_err());
        assert!(log.borrow().is_empty(), "nothing released on failed replacement");

        df.set(size, 3).unwrap();
        assert_eq!(df.get(res).unwrap().id, 3);
        assert_eq!(*log.borrow(), vec!["release 1"]);
    }

    #[test]
    fn test_define_twice_is_rejected() {
        let mut df = Dataflow::new();
        let a = df.declare::<u8>("a");
        df.define_derive(a, (), |()| Ok(1)).unwrap();
        assert!(matches!(
            df.define_derive(a, (), |()| Ok(2)),
            Err(GraphError::AlreadyDefined { .. })
        ));
    }
}
