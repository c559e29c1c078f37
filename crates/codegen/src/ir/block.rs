//! Basic blocks

use super::op::OpEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// A maximal straight-line slice of a frame's ops. Edges are id sets, not
/// pointers, so the graph has no ownership cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    /// The frame-local label that jumps land on, when this block has one.
    pub label: Option<String>,
    pub ops: Vec<OpEntry>,
    pub inbound: BTreeSet<BlockId>,
    pub outbound: BTreeSet<BlockId>,
}

impl BasicBlock {
    pub fn new(id: BlockId, label: Option<String>, ops: Vec<OpEntry>) -> Self {
        BasicBlock {
            id,
            label,
            ops,
            inbound: BTreeSet::new(),
            outbound: BTreeSet::new(),
        }
    }

    pub fn terminator(&self) -> Option<&OpEntry> {
        self.ops.last()
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }
}
