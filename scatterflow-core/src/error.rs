//! Errors surfaced by the dataflow graph

use std::sync::Arc;
use thiserror::Error;

use crate::node::NodeId;

/// Failure modes of graph construction and resolution
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("dependency cycle: node '{label}' ({node}) would depend on itself")]
    Cycle { node: NodeId, label: String },

    #[error("node {node} does not belong to this graph")]
    ForeignNode { node: NodeId },

    #[error("node '{label}' ({node}) was declared but never defined")]
    Undefined { node: NodeId, label: String },

    #[error("node '{label}' ({node}) is already defined")]
    AlreadyDefined { node: NodeId, label: String },

    #[error("node '{label}' ({node}) is derived and cannot be set directly")]
    NotConstant { node: NodeId, label: String },

    #[error("derivation of '{label}' ({node}) failed: {cause:#}")]
    Recompute {
        node: NodeId,
        label: String,
        cause: Arc<anyhow::Error>,
    },
}

impl GraphError {
    /// The node the error is reported against.
    pub fn node(&self) -> NodeId {
        match self {
            Self::Cycle { node, .. }
            | Self::ForeignNode { node }
            | Self::Undefined { node, .. }
            | Self::AlreadyDefined { node, .. }
            | Self::NotConstant { node, .. }
            | Self::Recompute { node, .. } => *node,
        }
    }

    /// The underlying derivation error, when the failure came from user code.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Recompute { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// Downcast the derivation error to a concrete type.
    pub fn downcast_cause<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.cause().and_then(|cause| cause.downcast_ref::<E>())
    }
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recompute_message_includes_cause_chain() {
        let cause = anyhow::anyhow!("device lost").context("creating buffer");
        let err = GraphError::Recompute {
            node: NodeId::new(0, 3),
            label: "point data".into(),
            cause: Arc::new(cause),
        };
        let text = err.to_string();
        assert!(text.contains("point data"));
        assert!(text.contains("creating buffer"));
        assert!(text.contains("device lost"));
        assert_eq!(err.node().index(), 3);
    }

    #[test]
    fn test_cause_is_none_for_structural_errors() {
        let err = GraphError::Cycle {
            node: NodeId::new(1, 0),
            label: "a".into(),
        };
        assert!(err.cause().is_none());
        assert!(err.downcast_cause::<std::io::Error>().is_none());
    }
}
