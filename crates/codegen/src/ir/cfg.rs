//! Control-flow graph construction
//!
//! Slices a completed frame into basic blocks and links them by consulting
//! each block's terminating op. A frame's CFG is built exactly once, after
//! lowering finishes, and is immutable from then on. Ops that follow an
//! unconditional transfer without carrying a label are unreachable; they are
//! retained in the frame but belong to no block and get no edges.

use super::block::{BasicBlock, BlockId};
use super::frame::Frame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
    entry: BlockId,
}

impl Cfg {
    /// Slice `frame` into blocks and link branch/jump edges.
    pub fn build(frame: &Frame) -> Cfg {
        let mut blocks = Vec::new();
        let ops = frame.ops();
        let mut pos = 0;

        while pos < ops.len() {
            let start = pos;
            // a block runs to its first terminator, stopping before any
            // labeled op that would start the next block
            let mut end = start;
            loop {
                if end + 1 < ops.len() && ops[end + 1].label.is_some() {
                    break;
                }
                if ops[end].op.terminates_block() || end + 1 >= ops.len() {
                    break;
                }
                end += 1;
            }

            let id = BlockId(blocks.len() as u32);
            let slice: Vec<_> = ops[start..=end].to_vec();
            let label = slice[0].label.clone();
            blocks.push(BasicBlock::new(id, label, slice));

            // skip unreachable ops: anything after an unconditional transfer
            // up to the next labeled op never executes
            pos = end + 1;
            if ops[end].op.terminates_block() {
                while pos < ops.len() && ops[pos].label.is_none() {
                    pos += 1;
                }
            }
        }

        if blocks.is_empty() {
            blocks.push(BasicBlock::new(BlockId(0), None, Vec::new()));
        }

        let mut cfg = Cfg {
            blocks,
            entry: BlockId(0),
        };
        cfg.link();
        cfg
    }

    fn link(&mut self) {
        let by_label: HashMap<String, BlockId> = self
            .blocks
            .iter()
            .filter_map(|b| b.label.clone().map(|l| (l, b.id)))
            .collect();

        let mut edges: Vec<(BlockId, BlockId)> = Vec::new();
        for (index, block) in self.blocks.iter().enumerate() {
            let Some(last) = block.terminator() else {
                continue;
            };
            let targets = last.op.jump_targets();
            for target in &targets {
                if let Some(to) = by_label.get(*target) {
                    edges.push((block.id, *to));
                }
            }
            // fall-through edge for non-terminating block ends (a block cut
            // short by a following label) and for ops like IterNext that
            // both fall through and jump
            let falls_through = !matches!(
                last.op,
                super::op::Op::Jump { .. }
                    | super::op::Op::Return { .. }
                    | super::op::Op::Raise { .. }
                    | super::op::Op::Branch { .. }
            );
            if falls_through {
                if let Some(next) = self.blocks.get(index + 1) {
                    edges.push((block.id, next.id));
                }
            }
        }

        for (from, to) in edges {
            self.blocks[from.0 as usize].outbound.insert(to);
            self.blocks[to.0 as usize].inbound.insert(from);
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn edge_count(&self) -> usize {
        self.blocks.iter().map(|b| b.outbound.len()).sum()
    }

    /// Blocks ending in a return or raise.
    pub fn exit_blocks(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| {
                matches!(
                    b.terminator().map(|e| &e.op),
                    Some(super::op::Op::Return { .. }) | Some(super::op::Op::Raise { .. })
                )
            })
            .map(|b| b.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::op::{Const, Op, Temp};

    fn frame_with(build: impl FnOnce(&mut Frame)) -> Frame {
        let mut frame = Frame::new("test");
        build(&mut frame);
        frame.finish();
        frame
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let frame = frame_with(|f| {
            let t0 = f.temp();
            f.push(Op::LoadConst {
                target: t0,
                value: Const::Int(1),
            });
            f.push(Op::Return { value: Some(t0) });
        });
        let cfg = Cfg::build(&frame);
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.edge_count(), 0);
    }

    #[test]
    fn test_branch_splits_and_links() {
        let frame = frame_with(|f| {
            let t0 = f.temp();
            f.push(Op::LoadConst {
                target: t0,
                value: Const::Bool(true),
            });
            f.push(Op::Branch {
                test: t0,
                true_label: "then0".to_string(),
                false_label: "else0".to_string(),
            });
            f.prepare_label("then0".to_string());
            f.push(Op::Jump {
                label: "endif0".to_string(),
            });
            f.prepare_label("else0".to_string());
            f.push(Op::Nop);
            f.prepare_label("endif0".to_string());
            f.push(Op::Return { value: None });
        });
        let cfg = Cfg::build(&frame);
        assert_eq!(cfg.block_count(), 4);
        // entry branches both ways
        let entry = cfg.block(cfg.entry());
        assert_eq!(entry.outbound.len(), 2);
        // single exit
        assert_eq!(cfg.exit_blocks().len(), 1);
    }

    #[test]
    fn test_back_edge_for_loop() {
        let frame = frame_with(|f| {
            f.prepare_label("loop0".to_string());
            let t0 = f.temp();
            f.push(Op::LoadConst {
                target: t0,
                value: Const::Bool(true),
            });
            f.push(Op::Branch {
                test: t0,
                true_label: "loop0".to_string(),
                false_label: "done0".to_string(),
            });
            f.prepare_label("done0".to_string());
            f.push(Op::Return { value: None });
        });
        let cfg = Cfg::build(&frame);
        let entry = cfg.block(cfg.entry());
        // loops back into itself plus exits forward
        assert!(entry.outbound.contains(&cfg.entry()));
        assert_eq!(cfg.block_count(), 2);
    }

    #[test]
    fn test_unreachable_ops_not_linked() {
        let frame = frame_with(|f| {
            f.push(Op::Jump {
                label: "out0".to_string(),
            });
            // unreachable, unlabeled: retained in the frame, not in the CFG
            f.push(Op::Nop);
            f.push(Op::Nop);
            f.prepare_label("out0".to_string());
            f.push(Op::Return { value: None });
        });
        let cfg = Cfg::build(&frame);
        assert_eq!(cfg.block_count(), 2);
        let total_ops: usize = cfg.blocks().iter().map(|b| b.op_count()).sum();
        assert_eq!(total_ops, 2);
        assert_eq!(frame.len(), 4); // still retained in the frame itself
    }

    #[test]
    fn test_exactly_one_entry() {
        let frame = frame_with(|f| {
            f.push(Op::Return { value: None });
        });
        let cfg = Cfg::build(&frame);
        let entries: Vec<_> = cfg
            .blocks()
            .iter()
            .filter(|b| b.inbound.is_empty())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, cfg.entry());
    }
}
