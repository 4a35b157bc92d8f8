//! Cycle-counting walks over the CFG.
//!
//! Two accumulators drive the model: `current` collects single-warp issue
//! cycles since the last warp-switch boundary, and `total` holds committed
//! warp-multiplied cycles. A flush commits `current * warps`. High-latency
//! memory commits `max(current * warps, latency)`: when the multiplied work
//! already covers the memory latency the access is free, otherwise the
//! stall dominates.

use std::collections::HashMap;

use crate::cfg::loops::LoopId;
use crate::cfg::{BlockId, Cfg};
use crate::kernel::instr::{InstrId, InstrStream, MemDir, MemSpace, Opcode};

/// Cycle-model parameters. The defaults are the modeled device's values.
#[derive(Debug, Clone)]
pub struct CycleParams {
    /// Concurrent warps covering each other's latency.
    pub warps: u32,
    /// Track per-register load-to-use distances instead of switching warps
    /// on every high-latency access.
    pub exp_mode: bool,
    /// Issue cost of one instruction.
    pub issue_cycles: u64,
    /// Global/local memory latency.
    pub mem_latency: u64,
}

impl Default for CycleParams {
    fn default() -> Self {
        Self {
            warps: 32,
            exp_mode: false,
            issue_cycles: 4,
            mem_latency: 500,
        }
    }
}

/// Cycles attributed to one loop during the walk.
#[derive(Debug, Clone)]
pub struct LoopCycles {
    pub loop_id: u32,
    /// Display number of the loop's header block.
    pub header_num: u32,
    pub cycles: u64,
}

/// Result of a kernel cycle walk.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub total_cycles: u64,
    /// Unhidden load-to-use wait cycles observed in experimental mode.
    pub stall_cycles: u64,
    /// Per-loop totals in the order the walk reached them.
    pub loops: Vec<LoopCycles>,
}

/// Accumulator state of one walk. Loop walks use fresh state; the enclosing
/// walk's counters are committed around them.
#[derive(Default)]
struct WalkState {
    current: u64,
    total: u64,
    stall: u64,
    /// Experimental mode: issued loads by destination register, with the
    /// cycles elapsed since issue.
    outstanding: HashMap<u32, u64>,
}

impl WalkState {
    fn flush(&mut self, warps: u64) {
        self.total += self.current * warps;
        self.current = 0;
    }

    fn bump_outstanding(&mut self, by: u64) {
        for age in self.outstanding.values_mut() {
            *age += by;
        }
    }
}

/// Walks a constructed CFG and produces the cycle estimate.
pub struct CycleCounter<'a> {
    cfg: &'a Cfg,
    stream: &'a mut InstrStream,
    params: CycleParams,
    stall_cycles: u64,
    loop_cycles: Vec<LoopCycles>,
}

impl<'a> CycleCounter<'a> {
    pub fn new(cfg: &'a Cfg, stream: &'a mut InstrStream, params: CycleParams) -> Self {
        Self {
            cfg,
            stream,
            params,
            stall_cycles: 0,
            loop_cycles: Vec::new(),
        }
    }

    /// Walk the kernel from the entry sentinel to the exit sentinel.
    pub fn count(mut self) -> CycleSummary {
        let warps = self.params.warps as u64;
        let mut st = WalkState::default();
        let mut b = self.cfg.entry;

        loop {
            if b == self.cfg.exit {
                st.flush(warps);
                break;
            }

            if let Some(lid) = self.cfg.loop_of_header(b) {
                // Loop entry is a warp-switch boundary.
                st.flush(warps);
                let cycles = self.count_loop(lid);
                st.total += cycles;
                self.record_loop(lid, cycles);
                b = self.cfg.loop_exit_successor(lid);
                continue;
            }

            self.walk_block(&mut st, b);
            b = self.cfg.select_successor(b);
        }

        self.stall_cycles += st.stall;
        CycleSummary {
            total_cycles: st.total,
            stall_cycles: self.stall_cycles,
            loops: self.loop_cycles,
        }
    }

    fn count_loop(&mut self, lid: LoopId) -> u64 {
        if self.cfg.get_loop(lid).has_inner() {
            self.walk_outer_loop(lid)
        } else {
            self.walk_innermost_loop(lid)
        }
    }

    /// Walk a loop that contains nested loops, block by block. Inner loops
    /// are costed recursively; their full iterations cannot overlap the
    /// enclosing body, so every boundary flushes.
    fn walk_outer_loop(&mut self, lid: LoopId) -> u64 {
        let warps = self.params.warps as u64;
        let (header, footer, trip) = {
            let lp = self.cfg.get_loop(lid);
            (
                lp.header,
                lp.footer().expect("loop with multiple footers seen"),
                lp.trip_count as u64,
            )
        };

        let mut st = WalkState::default();
        let mut b = header;
        loop {
            self.walk_block(&mut st, b);
            if b == footer {
                st.flush(warps);
                break;
            }
            b = self.cfg.select_successor(b);
            while let Some(inner) = self.cfg.loop_of_header(b) {
                st.flush(warps);
                let cycles = self.count_loop(inner);
                st.total += cycles;
                self.record_loop(inner, cycles);
                b = self.cfg.loop_exit_successor(inner);
            }
        }

        assert!(
            st.outstanding.is_empty(),
            "outstanding load never consumed before loop exit"
        );
        self.stall_cycles += st.stall * trip;
        trip * st.total
    }

    /// Walk an innermost loop.
    ///
    /// The tail of the body behind its last blocking instruction overlaps
    /// the next iteration's lead-in: iteration i's tail issues while
    /// iteration i+1 runs up to the same blocking point. The tail is charged
    /// once (backwards walk), then a forward walk prices one steady-state
    /// iteration ending at that blocking instruction.
    fn walk_innermost_loop(&mut self, lid: LoopId) -> u64 {
        let warps = self.params.warps as u64;
        let issue = self.params.issue_cycles;
        let (header, footer, trip) = {
            let lp = self.cfg.get_loop(lid);
            (
                lp.header,
                lp.footer().expect("loop with multiple footers seen"),
                lp.trip_count as u64,
            )
        };
        let header_first = self
            .cfg
            .block(header)
            .first
            .expect("loop header has instructions");

        // Backwards from the footer's last instruction to the first
        // blocking instruction (high-latency memory or sync).
        let mut later = 0u64;
        let mut blocking: Option<InstrId> = None;
        let mut b = footer;
        'blocks: loop {
            let block_first = self.cfg.block(b).first.expect("loop block has instructions");
            let mut i = self.cfg.block(b).last.expect("loop block has instructions");
            loop {
                let instr = self.stream.get(i);
                if instr.is_high_latency_mem() || instr.is_sync() {
                    blocking = Some(i);
                    break 'blocks;
                }
                later += issue;
                if i == header_first {
                    break 'blocks;
                }
                if i == block_first {
                    break;
                }
                i = self.stream.prev(i).expect("loop body is link-contiguous");
            }
            let blk = self.cfg.block(b);
            assert!(
                blk.preds.len() == 1 || blk.is_loop_header,
                "loop block with multiple predecessors seen"
            );
            b = blk.preds[0];
        }

        let Some(blocking) = blocking else {
            // ALU-only body: every iteration is pure issue work.
            return trip * later * warps;
        };

        let mut st = WalkState {
            current: later,
            ..Default::default()
        };
        let mut i = header_first;
        loop {
            let consumed = self.step(&mut st, i, None);
            if consumed == blocking {
                st.flush(warps);
                self.stall_cycles += st.stall * trip;
                return trip * st.total;
            }
            i = self
                .stream
                .next(consumed)
                .expect("blocking instruction is reachable from the loop header");
        }
    }

    /// Apply the block walk to every instruction of `b`.
    fn walk_block(&mut self, st: &mut WalkState, b: BlockId) {
        let block = self.cfg.block(b);
        let (Some(first), Some(last)) = (block.first, block.last) else {
            return;
        };
        let mut i = first;
        loop {
            let consumed = self.step(st, i, Some(last));
            if consumed == last {
                break;
            }
            i = self
                .stream
                .next(consumed)
                .expect("block range is link-contiguous");
        }
    }

    /// Process one instruction. Returns the last instruction consumed: a
    /// high-latency memory burst absorbs immediately following global/local
    /// instructions, bounded by `block_last` when walking block ranges.
    fn step(&mut self, st: &mut WalkState, id: InstrId, block_last: Option<InstrId>) -> InstrId {
        let warps = self.params.warps as u64;
        let issue = self.params.issue_cycles;
        let latency = self.params.mem_latency;

        let (opcode, dst, srcs) = {
            let i = self.stream.get(id);
            (i.opcode, i.dst, i.srcs)
        };

        if self.params.exp_mode {
            // Consume pending loads before this instruction's own effect.
            for src in srcs.into_iter().flatten() {
                if let Some(&age) = st.outstanding.get(&src) {
                    if age < latency {
                        let hidden = st.current * warps;
                        let wait = latency - age;
                        let charged = hidden.max(wait);
                        st.total += charged;
                        st.bump_outstanding(charged);
                        if hidden < wait {
                            st.stall += wait - hidden;
                        }
                        st.current = 0;
                    }
                    st.outstanding.remove(&src);
                }
            }
        }

        let mut consumed = id;
        match opcode {
            Opcode::Alu | Opcode::Branch { .. } => {
                st.current += issue;
                if self.params.exp_mode {
                    st.bump_outstanding(issue);
                }
            }
            Opcode::Mem {
                space: MemSpace::Shared,
                ..
            } => {
                // Shared memory issues like ALU work and never joins a
                // burst.
                st.current += issue;
                if self.params.exp_mode {
                    st.bump_outstanding(issue);
                }
            }
            Opcode::Mem { dir, .. } => {
                st.current += issue;
                if self.params.exp_mode {
                    st.bump_outstanding(issue);
                    match dir {
                        MemDir::Load => {
                            if let Some(dst) = dst {
                                assert!(
                                    !st.outstanding.contains_key(&dst),
                                    "multiple outstanding loads to register r{}",
                                    dst
                                );
                                st.outstanding.insert(dst, issue);
                            }
                        }
                        MemDir::Store => {
                            st.total += (st.current * warps).max(latency);
                            st.current = 0;
                        }
                    }
                } else {
                    loop {
                        if block_last == Some(consumed) {
                            break;
                        }
                        let Some(next) = self.stream.next(consumed) else {
                            break;
                        };
                        if !self.stream.get(next).is_high_latency_mem() {
                            break;
                        }
                        st.current += issue;
                        consumed = next;
                    }
                    st.total += (st.current * warps).max(latency);
                    st.current = 0;
                }
            }
            Opcode::Sync => {
                st.total += st.current * warps;
                st.current = 0;
            }
        }

        self.stream.get_mut(consumed).cycles = st.total;
        consumed
    }

    fn record_loop(&mut self, lid: LoopId, cycles: u64) {
        let lp = self.cfg.get_loop(lid);
        self.loop_cycles.push(LoopCycles {
            loop_id: lp.id,
            header_num: self.cfg.block(lp.header).num,
            cycles,
        });
    }
}
