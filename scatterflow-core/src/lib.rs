//! ScatterFlow Core Library
//!
//! Incremental dataflow graph used to derive GPU resources from host inputs.
//! Nodes are constants, pure derivations, or stateful derivations that own a
//! [`Resource`] and have it released when they are rebuilt.

pub mod dataflow;
pub mod error;
pub mod node;
pub mod resource;

pub use dataflow::{Dataflow, NodeKind};
pub use error::{GraphError, GraphResult};
pub use node::{Inputs, Node, NodeId};
pub use resource::Resource;

/// Version information for the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
