//! Report formatting: instruction counts, ratios, loop summaries, block and
//! CFG dumps, and cycle totals. Everything renders to a `String`; the
//! driver decides where it goes.

use crate::cfg::loops::Loop;
use crate::cfg::{BasicBlock, Cfg, OpCounts};
use crate::kernel::instr::InstrStream;

use super::counter::CycleSummary;

fn sum_counts<'a>(blocks: impl Iterator<Item = &'a BasicBlock>) -> OpCounts {
    let mut total = OpCounts::default();
    for bb in blocks {
        total.add(&bb.counts);
    }
    total
}

fn push_counts(out: &mut String, counts: &OpCounts, prefix: &str) {
    out.push_str(&format!("{}Instruction count summary:\n", prefix));
    out.push_str(&format!("{}Total instructions = {}\n", prefix, counts.total));
    out.push_str(&format!("{}  ALU instructions = {}\n", prefix, counts.alu));
    out.push_str(&format!(
        "{}  Global mem instructions = {}\n",
        prefix, counts.global
    ));
    out.push_str(&format!(
        "{}  Shared mem instructions = {}\n",
        prefix, counts.shared
    ));
    out.push_str(&format!(
        "{}  Local mem instructions = {}\n",
        prefix, counts.local
    ));
    out.push_str(&format!(
        "{}  Branch instructions = {}\n",
        prefix, counts.branch
    ));
}

fn push_ratios(out: &mut String, counts: &OpCounts, prefix: &str) {
    out.push_str(&format!("{}#ALU instructions = {}\n", prefix, counts.alu));
    out.push_str(&format!(
        "{}#Global instructions = {}\n",
        prefix, counts.global
    ));
    if counts.global > 0 {
        out.push_str(&format!(
            "{}Ratio of ALU ops to global ops = {:.2}\n",
            prefix,
            counts.alu as f64 / counts.global as f64
        ));
    }
}

/// Instruction-class counts over the whole kernel.
pub fn format_inst_counts(cfg: &Cfg) -> String {
    let mut out = String::new();
    push_counts(&mut out, &sum_counts(cfg.blocks().iter()), "");
    out
}

/// ALU-to-global ratio over the whole kernel.
pub fn format_ratios(cfg: &Cfg) -> String {
    let mut out = String::new();
    push_ratios(&mut out, &sum_counts(cfg.blocks().iter()), "");
    out
}

/// What to include per loop in a loop report.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LoopReport {
    Info,
    Counts,
    Ratios,
}

/// Loop nesting summary for every outermost loop, recursively.
pub fn format_loop_info(cfg: &Cfg) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Detected {} outer loop(s)\n",
        cfg.outer_loops().len()
    ));
    for &lid in cfg.outer_loops() {
        push_loop(&mut out, cfg, cfg.get_loop(lid), LoopReport::Info);
    }
    out
}

/// Per-loop instruction counts (loop plus everything nested in it).
pub fn format_loop_counts(cfg: &Cfg) -> String {
    let mut out = String::new();
    for &lid in cfg.outer_loops() {
        push_loop(&mut out, cfg, cfg.get_loop(lid), LoopReport::Counts);
    }
    out
}

/// Per-loop ALU-to-global ratios.
pub fn format_loop_ratios(cfg: &Cfg) -> String {
    let mut out = String::new();
    for &lid in cfg.outer_loops() {
        push_loop(&mut out, cfg, cfg.get_loop(lid), LoopReport::Ratios);
    }
    out
}

fn push_loop(out: &mut String, cfg: &Cfg, lp: &Loop, report: LoopReport) {
    let tabs = "\t".repeat(lp.level as usize);

    out.push_str(&format!(
        "{}Loop index: {}, Nesting level: {}\n",
        tabs, lp.id, lp.level
    ));
    out.push_str(&format!("{}Instruction count: {}\n", tabs, lp.num_instrs));
    match lp.enclosing {
        None => out.push_str(&format!("{}Enclosing loop: None\n", tabs)),
        Some(enc) => out.push_str(&format!(
            "{}Enclosing loop: {}\n",
            tabs,
            cfg.get_loop(enc).id
        )),
    }

    let counts = sum_counts(lp.nat_blocks.iter().map(|&b| cfg.block(b)));
    match report {
        LoopReport::Info => {}
        LoopReport::Counts => push_counts(out, &counts, &tabs),
        LoopReport::Ratios => push_ratios(out, &counts, &tabs),
    }
    out.push('\n');

    for &inner in lp.inner.iter().rev() {
        out.push_str(&format!("{}Inner loop details:\n", tabs));
        push_loop(out, cfg, cfg.get_loop(inner), report);
        out.push('\n');
    }
}

/// Per-block instruction listing.
pub fn format_basic_blocks(cfg: &Cfg, stream: &InstrStream) -> String {
    let mut out = String::new();
    for bb in cfg.blocks() {
        out.push_str(&format!("Basic Block # {} :\n", bb.num));
        if let (Some(first), Some(last)) = (bb.first, bb.last) {
            let mut cur = Some(first);
            let stop = stream.next(last);
            while cur != stop {
                let id = cur.expect("block range is link-contiguous");
                out.push_str(&format!("{}\n", stream.get(id).text));
                cur = stream.next(id);
            }
        }
        out.push('\n');
    }
    out
}

/// Successor/predecessor dump of every block.
pub fn format_cfg(cfg: &Cfg) -> String {
    let mut out = String::new();
    for bb in cfg.blocks() {
        out.push_str(&format!("Basic Block # {} :\n", bb.num));
        if bb.is_loop_header {
            out.push_str("LH\n");
        }
        if bb.is_loop_footer {
            out.push_str("LF\n");
        }
        out.push_str("Successors: ");
        for s in &bb.succs {
            out.push_str(&format!("{} ", cfg.block(*s).num));
        }
        out.push('\n');
        out.push_str("Predecessors: ");
        for p in &bb.preds {
            out.push_str(&format!("{} ", cfg.block(*p).num));
        }
        out.push_str("\n\n");
    }
    out
}

/// The raw instruction stream with memory-space tags.
pub fn format_inst_stream(stream: &InstrStream) -> String {
    let mut out = String::new();
    for id in stream.iter() {
        let instr = stream.get(id);
        out.push_str(&instr.text);
        if instr.is_global() {
            out.push_str(" : GLOBAL OP");
        } else if instr.is_shared() {
            out.push_str(" : SHARED OP");
        } else if instr.is_local() {
            out.push_str(" : LOCAL OP");
        }
        out.push('\n');
    }
    out
}

/// Cycle totals, optionally with the per-loop breakdown.
pub fn format_cycle_summary(summary: &CycleSummary, with_loops: bool) -> String {
    let mut out = String::new();
    if with_loops {
        for lc in &summary.loops {
            out.push_str(&format!(
                "Total cycles in loop {} (Header bb: {}) = {}\n",
                lc.loop_id, lc.header_num, lc.cycles
            ));
        }
    }
    out.push_str(&format!(
        "Total number of cycles = {}\n",
        summary.total_cycles
    ));
    out.push_str(&format!("Total stall cycles = {}\n", summary.stall_cycles));
    out
}
