//! Control-flow graph construction.
//!
//! Basic blocks are found with the classical leader rule over the inlined
//! instruction stream, then wired with successor/predecessor edges between
//! entry and exit sentinels. The fall-through successor is always inserted
//! before the taken-branch successor; the loop walkers depend on that order
//! to tell a loop body from a loop exit.

pub mod loops;

use std::collections::HashMap;
use std::fmt;

use crate::kernel::instr::{InstrId, InstrStream, MemSpace, Opcode};
use loops::{Loop, LoopId};

/// Display number of the entry sentinel block.
pub const ENTRY_BLOCK_NUM: u32 = 65535;
/// Display number of the exit sentinel block.
pub const EXIT_BLOCK_NUM: u32 = 65536;

/// Handle into the CFG's block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Per-class instruction counts of a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub alu: u32,
    pub global: u32,
    pub shared: u32,
    pub local: u32,
    pub branch: u32,
    pub sync: u32,
    pub total: u32,
}

impl OpCounts {
    pub fn add(&mut self, other: &OpCounts) {
        self.alu += other.alu;
        self.global += other.global;
        self.shared += other.shared;
        self.local += other.local;
        self.branch += other.branch;
        self.sync += other.sync;
        self.total += other.total;
    }

    /// Sum of the per-class counts; equals `total` by construction.
    pub fn class_sum(&self) -> u32 {
        self.alu + self.global + self.shared + self.local + self.branch + self.sync
    }
}

/// A maximal straight-line instruction sequence.
#[derive(Debug)]
pub struct BasicBlock {
    /// Display number: interior blocks count up from 0 in emission order;
    /// sentinels use [`ENTRY_BLOCK_NUM`] and [`EXIT_BLOCK_NUM`].
    pub num: u32,
    pub first: Option<InstrId>,
    pub last: Option<InstrId>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
    pub is_loop_header: bool,
    pub is_loop_footer: bool,
    pub counts: OpCounts,
}

impl BasicBlock {
    fn new(num: u32, first: Option<InstrId>, last: Option<InstrId>, stream: &InstrStream) -> Self {
        let mut counts = OpCounts::default();
        if let (Some(f), Some(l)) = (first, last) {
            let mut cur = Some(f);
            let stop = stream.next(l);
            while cur != stop {
                let id = cur.expect("block range is link-contiguous");
                match stream.get(id).opcode {
                    Opcode::Alu => counts.alu += 1,
                    Opcode::Branch { .. } => counts.branch += 1,
                    Opcode::Mem { space, .. } => match space {
                        MemSpace::Global => counts.global += 1,
                        MemSpace::Shared => counts.shared += 1,
                        MemSpace::Local => counts.local += 1,
                    },
                    Opcode::Sync => counts.sync += 1,
                }
                counts.total += 1;
                cur = stream.next(id);
            }
        }
        Self {
            num,
            first,
            last,
            succs: Vec::new(),
            preds: Vec::new(),
            is_loop_header: false,
            is_loop_footer: false,
            counts,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.num == ENTRY_BLOCK_NUM || self.num == EXIT_BLOCK_NUM
    }
}

/// The control-flow graph of one kernel. Owns all blocks and all loops.
#[derive(Debug)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub exit: BlockId,
    pub(crate) loops: Vec<Loop>,
    pub(crate) outer_loops: Vec<LoopId>,
    pub(crate) header_loop: HashMap<BlockId, LoopId>,
}

impl Cfg {
    /// Split the stream into basic blocks and wire the edges.
    pub fn build(stream: &InstrStream) -> Cfg {
        let mut blocks = Vec::new();
        blocks.push(BasicBlock::new(ENTRY_BLOCK_NUM, None, None, stream));

        // Maps a block's first instruction to the block while edges are
        // wired; dropped afterwards.
        let mut block_map: HashMap<InstrId, BlockId> = HashMap::new();
        let mut num = 0u32;

        let mut push_block =
            |blocks: &mut Vec<BasicBlock>, map: &mut HashMap<InstrId, BlockId>, f, l| {
                let id = BlockId(blocks.len() as u32);
                blocks.push(BasicBlock::new(num, Some(f), Some(l), stream));
                num += 1;
                map.insert(f, id);
            };

        let mut first: Option<InstrId> = None;
        let mut prev: Option<InstrId> = None;
        let mut cur: Option<InstrId> = None;
        let mut last: Option<InstrId> = None;

        for id in stream.iter() {
            if stream.get(id).deleted {
                continue;
            }
            prev = cur;
            cur = Some(id);
            if first.is_none() {
                first = Some(id);
            }

            // A branch target is a leader; close the open block unless this
            // instruction already starts one.
            if stream.get(id).is_branch_target && first != Some(id) {
                last = prev;
                push_block(
                    &mut blocks,
                    &mut block_map,
                    first.expect("open block has a first instruction"),
                    prev.expect("leader mid-stream has a predecessor"),
                );
                first = Some(id);
            }

            // Any branch terminates its block.
            if stream.get(id).is_branch() {
                last = Some(id);
                push_block(
                    &mut blocks,
                    &mut block_map,
                    first.expect("open block has a first instruction"),
                    id,
                );
                first = None;
            }
        }

        // Close a trailing block that did not end in a branch.
        if last != cur {
            if let (Some(f), Some(c)) = (first, cur) {
                push_block(&mut blocks, &mut block_map, f, c);
            }
        }

        let exit = BlockId(blocks.len() as u32);
        blocks.push(BasicBlock::new(EXIT_BLOCK_NUM, None, None, stream));

        let mut cfg = Cfg {
            blocks,
            entry: BlockId(0),
            exit,
            loops: Vec::new(),
            outer_loops: Vec::new(),
            header_loop: HashMap::new(),
        };
        cfg.wire_edges(stream, &block_map);
        cfg
    }

    fn wire_edges(&mut self, stream: &InstrStream, block_map: &HashMap<InstrId, BlockId>) {
        let n = self.blocks.len();
        if n == 2 {
            // No interior blocks: entry falls straight through to exit.
            self.add_edge(self.entry, self.exit);
            return;
        }
        self.add_edge(self.entry, BlockId(1));

        for idx in 1..n - 1 {
            let b = BlockId(idx as u32);
            let term = self.blocks[idx]
                .last
                .expect("interior block has instructions");
            let (is_branch, is_cond, target, label) = {
                let i = stream.get(term);
                (i.is_branch(), i.is_cond_branch(), i.branch_target, i.target_label)
            };
            let fall = if idx + 1 < n - 1 {
                BlockId((idx + 1) as u32)
            } else {
                self.exit
            };

            if is_branch {
                match target {
                    None => {
                        assert!(
                            label.is_none(),
                            "missing branch target for non-return branch"
                        );
                        self.add_edge(b, self.exit);
                    }
                    Some(t) => {
                        if is_cond {
                            // Fall-through first; the walkers rely on this.
                            self.add_edge(b, fall);
                        }
                        let tb = *block_map
                            .get(&t)
                            .expect("branch target is a block leader");
                        self.add_edge(b, tb);
                    }
                }
            } else {
                self.add_edge(b, fall);
            }
        }
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0 as usize].succs.push(to);
        self.blocks[to.0 as usize].preds.push(from);
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// Interior (non-sentinel) block ids in emission order.
    pub fn interior_ids(&self) -> impl Iterator<Item = BlockId> {
        (1..(self.blocks.len() - 1) as u32).map(BlockId)
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Outermost loops, in discovery order.
    pub fn outer_loops(&self) -> &[LoopId] {
        &self.outer_loops
    }

    pub fn get_loop(&self, id: LoopId) -> &Loop {
        &self.loops[id.0 as usize]
    }

    pub fn loop_of_header(&self, b: BlockId) -> Option<LoopId> {
        self.header_loop.get(&b).copied()
    }

    /// Pick the next block during a cycle walk when two successors exist.
    ///
    /// The fall-through is listed first. It is taken when it looks like loop
    /// body (a single predecessor, or two predecessors on a nested loop
    /// header); the alternative is the loop exit.
    pub fn select_successor(&self, b: BlockId) -> BlockId {
        let succs = &self.block(b).succs;
        let n = succs.len();
        assert!(
            n > 0 && n < 3,
            "invalid CFG node seen (block {} has {} successors)",
            self.block(b).num,
            n
        );
        if n == 1 {
            return succs[0];
        }
        let (s0, s1) = (succs[0], succs[1]);
        let p0 = self.block(s0).preds.len();
        let p1 = self.block(s1).preds.len();
        assert!(p0 > 0 && p1 > 0, "CFG node with no predecessors seen");

        if p0 == 1 || (p0 == 2 && self.block(s0).is_loop_header) {
            let s1_chain = self.block(s1).succs.len() == 1
                && self.block(self.block(s1).succs[0]).preds.len() > 1;
            assert!(p1 > 1 || s1_chain, "ill-formed CFG (conditionals in loop?)");
            s0
        } else {
            assert!(p1 == 1 && p0 > 1, "ill-formed CFG (conditionals in loop?)");
            s1
        }
    }

    /// Successor of a loop's footer that leaves the loop (not the back
    /// edge).
    pub fn loop_exit_successor(&self, lid: LoopId) -> BlockId {
        let lp = self.get_loop(lid);
        let footer = lp.footer().expect("loop with multiple footers seen");
        for &s in &self.block(footer).succs {
            if s != lp.header {
                return s;
            }
        }
        panic!("loop footer has no valid successor");
    }
}
