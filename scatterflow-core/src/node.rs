//! Typed node handles and dependency tuples

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::dataflow::Dataflow;
use crate::error::GraphResult;

/// Untyped identity of a node: owning graph plus slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    graph: u32,
    index: u32,
}

impl NodeId {
    pub(crate) fn new(graph: u32, index: u32) -> Self {
        Self { graph, index }
    }

    pub fn graph(&self) -> u32 {
        self.graph
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}#{}", self.graph, self.index)
    }
}

/// Opaque handle to a value of type `T` produced by a [`Dataflow`].
///
/// Handles are `Copy` regardless of `T`; the value itself lives in the graph.
pub struct Node<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Node<T> {
    pub(crate) fn from_id(id: NodeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Node<T> {}

impl<T> PartialEq for Node<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Node<T> {}

impl<T> Hash for Node<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node<{}>({})", std::any::type_name::<T>(), self.id)
    }
}

/// A fixed set of dependency nodes whose current values feed a derivation.
///
/// A single [`Node<T>`] yields `Rc<T>`, a `Vec<Node<T>>` yields `Vec<Rc<T>>`,
/// and tuples of inputs yield tuples of their values in the same order.
pub trait Inputs {
    type Values;

    fn ids(&self) -> Vec<NodeId>;

    /// Fetch the cached values. Only valid after every id has been resolved
    /// for the current revision.
    fn fetch(&self, graph: &Dataflow) -> GraphResult<Self::Values>;
}

impl Inputs for () {
    type Values = ();

    fn ids(&self) -> Vec<NodeId> {
        Vec::new()
    }

    fn fetch(&self, _graph: &Dataflow) -> GraphResult<Self::Values> {
        Ok(())
    }
}

impl<T: 'static> Inputs for Node<T> {
    type Values = Rc<T>;

    fn ids(&self) -> Vec<NodeId> {
        vec![self.id]
    }

    fn fetch(&self, graph: &Dataflow) -> GraphResult<Self::Values> {
        graph.cached(*self)
    }
}

impl<T: 'static> Inputs for Vec<Node<T>> {
    type Values = Vec<Rc<T>>;

    fn ids(&self) -> Vec<NodeId> {
        self.iter().map(Node::id).collect()
    }

    fn fetch(&self, graph: &Dataflow) -> GraphResult<Self::Values> {
        self.iter().map(|node| graph.cached(*node)).collect()
    }
}

macro_rules! impl_inputs {
    ($($ty:ident $idx:tt),+) => {
        impl<$($ty: Inputs),+> Inputs for ($($ty,)+) {
            type Values = ($($ty::Values,)+);

            fn ids(&self) -> Vec<NodeId> {
                let mut ids = Vec::new();
                $(ids.extend(self.$idx.ids());)+
                ids
            }

            fn fetch(&self, graph: &Dataflow) -> GraphResult<Self::Values> {
                Ok(($(self.$idx.fetch(graph)?,)+))
            }
        }
    };
}

impl_inputs!(A 0);
impl_inputs!(A 0, B 1);
impl_inputs!(A 0, B 1, C 2);
impl_inputs!(A 0, B 1, C 2, D 3);
impl_inputs!(A 0, B 1, C 2, D 3, E 4);
impl_inputs!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_inputs!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_inputs!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
impl_inputs!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
impl_inputs!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);
impl_inputs!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10);
impl_inputs!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10, L 11);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_inputs_flatten_ids_in_order() {
        let mut df = Dataflow::new();
        let a = df.value("a", 1u8);
        let b = df.value("b", 2u16);
        let c = df.value("c", 3u32);
        let deps = (a, (b, vec![c, c]));
        let ids = deps.ids();
        assert_eq!(ids, vec![a.id(), b.id(), c.id(), c.id()]);
    }

    #[test]
    fn test_vec_inputs_yield_values() {
        let mut df = Dataflow::new();
        let parts: Vec<Node<u32>> = (0..4).map(|i| df.value(format!("p{i}"), i)).collect();
        let total = df
            .derive("total", parts, |values| values.iter().map(|v| **v).sum::<u32>())
            .unwrap();
        assert_eq!(*df.get(total).unwrap(), 6);
    }
}
