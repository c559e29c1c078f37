//! Node identification for resolver annotation.

use serde::{Deserialize, Serialize};

/// Unique identifier for name-bearing and scope-introducing AST nodes.
///
/// The middle end never mutates the tree; the resolver records its findings
/// in side tables keyed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Special ID for the module root node.
    pub const ROOT: NodeId = NodeId(0);
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Generator for unique node IDs, owned by whichever front end builds the tree.
#[derive(Debug)]
pub struct NodeIdGenerator {
    next_id: u32,
}

impl NodeIdGenerator {
    pub fn new() -> Self {
        // Start at 1, reserve 0 for ROOT.
        NodeIdGenerator { next_id: 1 }
    }

    pub fn next(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        NodeId(id)
    }
}

impl Default for NodeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
