//! Graphviz rendering of a CFG.

use crate::cfg::{BlockId, Cfg, ENTRY_BLOCK_NUM, EXIT_BLOCK_NUM};
use crate::kernel::instr::{Instr, InstrStream};

fn class_tag(instr: &Instr) -> &'static str {
    if instr.is_alu() {
        "A"
    } else if instr.is_branch() {
        "B"
    } else if instr.is_local() {
        "L"
    } else if instr.is_shared() {
        "S"
    } else if instr.is_global() {
        "G"
    } else {
        "N"
    }
}

/// Render the CFG as a `digraph` with one record node per block: block
/// number, op count, loop markers, and each instruction with its class tag
/// and cycle stamp.
pub fn render_dot(cfg: &Cfg, stream: &InstrStream) -> String {
    let mut out = String::new();
    out.push_str("digraph structs {\n");
    out.push_str("size = \"7.5, 10\";\n");
    out.push_str("node [shape=record];\n");

    for (idx, bb) in cfg.blocks().iter().enumerate() {
        out.push_str(&format!("\t struct{}[shape=record, label=\"", bb.num));

        if bb.num == ENTRY_BLOCK_NUM {
            out.push_str("Entry block \\n\"];\n");
            continue;
        }
        if bb.num == EXIT_BLOCK_NUM {
            out.push_str("Exit block \\n\"];\n");
            continue;
        }

        out.push_str(&format!("BB {}\\n", bb.num));
        out.push_str(&format!("(Instruction count: {})\\n", bb.counts.total));
        if bb.is_loop_header {
            if let Some(lid) = cfg.loop_of_header(BlockId(idx as u32)) {
                out.push_str(&format!(
                    "Loop Header (Nesting depth {})\\n",
                    cfg.get_loop(lid).level
                ));
            }
        }
        if bb.is_loop_footer {
            out.push_str("Loop Footer\\n");
        }

        if let (Some(first), Some(last)) = (bb.first, bb.last) {
            let mut cur = Some(first);
            let stop = stream.next(last);
            while cur != stop {
                let id = cur.expect("block range is link-contiguous");
                let instr = stream.get(id);
                out.push_str(&instr.text.replace('|', "\\|"));
                out.push_str(&format!(" ({})\\n", class_tag(instr)));
                out.push_str(&format!("{}\\n", instr.cycles));
                cur = stream.next(id);
            }
        }
        out.push_str("\"];\n");
    }

    for bb in cfg.blocks() {
        for &succ in &bb.succs {
            let sb = cfg.block(succ);
            out.push_str(&format!("\t struct{} -> struct{}", bb.num, sb.num));
            // Self back edges render upwards.
            if bb.is_loop_footer && sb.is_loop_header && bb.num == sb.num {
                out.push_str(" [dir=back]");
            }
            out.push_str(";\n");
        }
    }

    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::inline::inline_calls;
    use crate::kernel::Kernel;
    use crate::syntax::parse_listing;

    #[test]
    fn test_dot_output_structure() {
        let (mut kernels, _) =
            parse_listing("label1: add $r1, $r1, $r1\n@$p0.ne bra label1\nreturn\n");
        let mut k = Kernel::from_parsed(kernels.remove(0));
        inline_calls(&mut k);
        let mut cfg = Cfg::build(&k.stream);
        cfg.detect_loops(256, None);

        let dot = render_dot(&cfg, &k.stream);
        assert!(dot.starts_with("digraph structs {"));
        assert!(dot.contains("Entry block"));
        assert!(dot.contains("Exit block"));
        assert!(dot.contains("Loop Header (Nesting depth 0)"));
        assert!(dot.contains("Loop Footer"));
        assert!(dot.contains("add $r1, $r1, $r1 (A)"));
        assert!(dot.contains("[dir=back]"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn test_dot_escapes_record_separators() {
        let (mut kernels, _) = parse_listing("add $r1, $r1|$o127, $r2\n");
        let mut k = Kernel::from_parsed(kernels.remove(0));
        inline_calls(&mut k);
        let cfg = Cfg::build(&k.stream);
        let dot = render_dot(&cfg, &k.stream);
        assert!(dot.contains("$r1\\|$o127"));
    }
}
