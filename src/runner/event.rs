use petgraph::graph::NodeIndex;

use crate::node::behavior::{Handle, OpError};
use crate::node::Op;

/// Result carried by a completed operation. Only `start` yields a handle.
pub type OpResult = Result<Option<Handle>, OpError>;

/// Messages delivered to the scheduler loop.
pub enum Event {
    /// A start/run/stop operation resolved.
    Completed {
        node: NodeIndex,
        op: Op,
        result: OpResult,
    },
    /// A node reported a failure outside of any operation call.
    Crashed { node: NodeIndex, reason: String },
}

impl Event {
    pub fn node(&self) -> NodeIndex {
        match self {
            Self::Completed { node, .. } | Self::Crashed { node, .. } => *node,
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed { node, op, result } => f
                .debug_struct("Completed")
                .field("node", &node.index())
                .field("op", op)
                .field("ok", &result.is_ok())
                .finish(),
            Self::Crashed { node, reason } => f
                .debug_struct("Crashed")
                .field("node", &node.index())
                .field("reason", reason)
                .finish(),
        }
    }
}
