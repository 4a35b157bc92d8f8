//! Listing parser.
//!
//! Line-oriented classification of decuda-style assembly into labels,
//! directives, and typed instructions. Kernels are delimited by brace depth;
//! an `.entry` directive names the kernel that follows. Lines the classifier
//! cannot make sense of are skipped with a warning; analysis continues.

use crate::diagnostic::Diagnostic;
use crate::kernel::instr::{Instr, MemDir, MemSpace, Opcode};
use crate::span::Span;

/// One classified statement of a kernel body.
#[derive(Debug)]
pub enum Stmt {
    Instr(Instr),
    Label { number: u32 },
    Directive { text: String },
}

/// The raw statement sequence of one kernel.
#[derive(Debug, Default)]
pub struct ParsedKernel {
    pub name: Option<String>,
    pub stmts: Vec<Stmt>,
}

// Arithmetic, compare, logical, and misc opcodes all issue in one slot and
// are costed identically by the cycle model.
const ALU_OPCODES: &[&str] = &[
    "add", "sub", "addc", "subc", "mul", "mad", "mul24", "mad24", "sad", "div", "rem", "subr",
    "abs", "neg", "min", "max", "pre", "ex2", "set", "setp", "selp", "slct", "and", "or", "xor",
    "not", "cnot", "shl", "shr", "rcp", "sqrt", "rsqrt", "sin", "cos", "lg2", "trap", "brkpt",
    "nop", "join",
];

const BRANCH_OPCODES: &[&str] = &["bra", "call", "ret", "exit", "return"];

const MEM_OPCODES: &[&str] = &["mov", "ld", "st", "cvt", "tex", "movsh"];

const SYNC_OPCODES: &[&str] = &["bar", "atom", "red", "vote"];

const GLOBAL_MARKER: &str = "g[";
const SHARED_MARKER: &str = "s[";
const LOCAL_MARKER: &str = "l[";

/// Parse a whole listing into per-kernel statement sequences.
///
/// Brace lines delimit kernel bodies; a listing without braces is treated as
/// a single kernel. Unparseable lines are skipped with a warning.
pub fn parse_listing(source: &str) -> (Vec<ParsedKernel>, Vec<Diagnostic>) {
    let mut kernels = Vec::new();
    let mut diagnostics = Vec::new();
    let mut cur = ParsedKernel::default();
    let mut depth = 0i32;
    let mut saw_body = false;
    let mut offset = 0u32;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let span = Span::new(offset, offset + raw.len() as u32);
        offset += raw.len() as u32 + 1;

        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if is_comment(line) {
            // Braces only ever appear on comment-class lines; they carry the
            // kernel boundaries.
            if line.contains('{') {
                depth += 1;
                saw_body = true;
            } else if line.contains('}') {
                depth -= 1;
                if depth <= 0 && saw_body {
                    kernels.push(std::mem::take(&mut cur));
                    saw_body = false;
                    depth = 0;
                }
            }
            continue;
        }

        let line = strip_inline_comment(line);
        if line.is_empty() {
            continue;
        }

        if is_directive(line) {
            if let Some(rest) = line.strip_prefix(".entry") {
                cur.name = Some(rest.trim().to_string());
            }
            cur.stmts.push(Stmt::Directive {
                text: line.to_string(),
            });
            continue;
        }

        if line.contains(':') {
            if line.matches(':').count() != 1 {
                diagnostics.push(Diagnostic::warning(
                    format!("malformed label statement on line {}", line_no),
                    span,
                ));
                continue;
            }
            let (head, tail) = line.split_once(':').expect("guarded by contains check");
            match parse_label_number(head.trim()) {
                Some(number) => cur.stmts.push(Stmt::Label { number }),
                None => {
                    diagnostics.push(Diagnostic::warning(
                        format!("cannot parse label '{}' on line {}", head.trim(), line_no),
                        span,
                    ));
                    continue;
                }
            }
            // decuda puts the target instruction on the same line as the
            // label definition.
            let tail = tail.trim();
            if !tail.is_empty() {
                match parse_instruction(tail, line_no) {
                    Ok(instr) => cur.stmts.push(Stmt::Instr(instr)),
                    Err(message) => diagnostics.push(Diagnostic::warning(message, span)),
                }
            }
            continue;
        }

        match parse_instruction(line, line_no) {
            Ok(instr) => cur.stmts.push(Stmt::Instr(instr)),
            Err(message) => diagnostics.push(Diagnostic::warning(message, span)),
        }
    }

    if !cur.stmts.is_empty() {
        kernels.push(cur);
    }

    (kernels, diagnostics)
}

fn is_comment(line: &str) -> bool {
    line.starts_with("//") || line.contains('{') || line.contains('}') || line.contains('#')
}

fn is_directive(line: &str) -> bool {
    line.starts_with('.')
}

fn strip_inline_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) => line[..pos].trim_end(),
        None => line,
    }
}

/// "labelN" -> N.
fn parse_label_number(s: &str) -> Option<u32> {
    s.strip_prefix("label")?.parse().ok()
}

/// Classify one instruction line into a typed record.
fn parse_instruction(line: &str, line_no: u32) -> Result<Instr, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    // A leading `@$p..` predicate turns a branch into a conditional branch.
    let (predicated, tokens) = match tokens.first() {
        Some(t) if t.starts_with('@') => (true, &tokens[1..]),
        _ => (false, &tokens[..]),
    };

    if tokens.is_empty() || tokens.len() > 6 {
        return Err(format!("unrecognized statement on line {}", line_no));
    }

    let mnemonic = base_mnemonic(tokens[0]);
    let operands = &tokens[1..];

    let opcode = if ALU_OPCODES.contains(&mnemonic) {
        Opcode::Alu
    } else if BRANCH_OPCODES.contains(&mnemonic) {
        Opcode::Branch { cond: predicated }
    } else if MEM_OPCODES.contains(&mnemonic) {
        match classify_mem(mnemonic, operands) {
            Some((space, dir)) => Opcode::Mem { space, dir },
            // Register-to-register mov/cvt: costed as ALU.
            None => Opcode::Alu,
        }
    } else if SYNC_OPCODES.contains(&mnemonic) {
        Opcode::Sync
    } else {
        return Err(format!(
            "invalid opcode '{}' on line {}; line skipped",
            mnemonic, line_no
        ));
    };

    let mut instr = Instr::new(line.to_string(), line_no, opcode);

    if instr.is_branch() {
        instr.is_call = mnemonic == "call";
        instr.is_ret = matches!(mnemonic, "ret" | "return" | "exit");
        if !instr.is_ret {
            let label_op = operands
                .last()
                .ok_or_else(|| format!("branch without a label on line {}", line_no))?;
            instr.target_label = Some(parse_label_number(label_op).ok_or_else(|| {
                format!(
                    "cannot parse branch label '{}' on line {}",
                    label_op, line_no
                )
            })?);
        }
    }

    let (dst, srcs) = parse_regs(operands);
    instr.dst = dst;
    instr.srcs = srcs;

    Ok(instr)
}

/// Mnemonic with `.suffix` and decuda's stray `?` markers removed.
fn base_mnemonic(token: &str) -> &str {
    let end = token
        .find(|c| c == '.' || c == '?')
        .unwrap_or(token.len());
    &token[..end]
}

/// Determine memory space and direction from the operand markers.
///
/// The bracketed operand in position 0 is the destination, so the operation
/// is a store; anywhere else it is a load. `movsh` moves through shared
/// memory without a bracket marker and counts as a shared load.
fn classify_mem(mnemonic: &str, operands: &[&str]) -> Option<(MemSpace, MemDir)> {
    let (space, marker) = if operands.iter().any(|op| op.contains(GLOBAL_MARKER)) {
        (MemSpace::Global, GLOBAL_MARKER)
    } else if operands.iter().any(|op| op.contains(SHARED_MARKER)) {
        (MemSpace::Shared, SHARED_MARKER)
    } else if mnemonic == "movsh" {
        return Some((MemSpace::Shared, MemDir::Load));
    } else if operands.iter().any(|op| op.contains(LOCAL_MARKER)) {
        (MemSpace::Local, LOCAL_MARKER)
    } else {
        return None;
    };

    let dir = match operands.iter().position(|op| op.contains(marker)) {
        Some(0) => MemDir::Store,
        _ => MemDir::Load,
    };
    Some((space, dir))
}

/// Extract the register numbers referenced by the operands.
///
/// Operand 0 is the destination; the rest fill source slots in order. An
/// operand names a register when it contains `r` followed by digits, e.g.
/// `$r3`, `g[$r7]`, `$r10.lo`.
fn parse_regs(operands: &[&str]) -> (Option<u32>, [Option<u32>; 3]) {
    let mut dst = None;
    let mut srcs = [None; 3];

    for (i, op) in operands.iter().enumerate() {
        let Some(reg) = operand_reg(op) else {
            continue;
        };
        match i {
            0 => dst = Some(reg),
            1 => srcs[0] = Some(reg),
            2 => {
                if srcs[0].is_none() {
                    srcs[0] = Some(reg);
                } else {
                    srcs[1] = Some(reg);
                }
            }
            _ => {
                if let Some(slot) = srcs.iter_mut().find(|s| s.is_none()) {
                    *slot = Some(reg);
                }
            }
        }
    }

    (dst, srcs)
}

fn operand_reg(op: &str) -> Option<u32> {
    let pos = op.find('r')?;
    let rest = &op[pos + 1..];
    let end = rest
        .find(|c| c == '.' || c == ']' || c == ',')
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_instr(line: &str) -> Instr {
        match parse_instruction(line, 1) {
            Ok(i) => i,
            Err(e) => panic!("parse failed: {}", e),
        }
    }

    #[test]
    fn test_alu_classification() {
        let i = one_instr("add $r1, $r2, $r3");
        assert!(i.is_alu());
        assert_eq!(i.dst, Some(1));
        assert_eq!(i.srcs, [Some(2), Some(3), None]);
    }

    #[test]
    fn test_reg_reg_mov_is_alu() {
        let i = one_instr("mov $r1, $r2");
        assert!(i.is_alu());
    }

    #[test]
    fn test_global_load() {
        let i = one_instr("mov $r2, g[$r3]");
        assert!(i.is_global());
        assert!(i.is_load());
        assert_eq!(i.dst, Some(2));
        assert_eq!(i.srcs[0], Some(3));
    }

    #[test]
    fn test_global_store() {
        let i = one_instr("mov g[$r3], $r2");
        assert!(i.is_global());
        assert!(i.is_store());
        // Operand 0 holds the address register.
        assert_eq!(i.dst, Some(3));
        assert_eq!(i.srcs[0], Some(2));
    }

    #[test]
    fn test_shared_and_local() {
        assert!(one_instr("mov $r1, s[0x10]").is_shared());
        assert!(one_instr("mov $r1, l[$r4]").is_local());
        assert!(one_instr("movsh $r1, $r2").is_shared());
    }

    #[test]
    fn test_branches() {
        let b = one_instr("bra label5");
        assert!(b.is_branch());
        assert!(!b.is_cond_branch());
        assert_eq!(b.target_label, Some(5));

        let cb = one_instr("@$p0.ne bra label3");
        assert!(cb.is_cond_branch());
        assert_eq!(cb.target_label, Some(3));

        let r = one_instr("return");
        assert!(r.is_branch());
        assert!(r.is_ret);
        assert_eq!(r.target_label, None);

        let c = one_instr("call label2");
        assert!(c.is_call);
        assert_eq!(c.target_label, Some(2));
    }

    #[test]
    fn test_sync() {
        assert!(one_instr("bar.sync 0").is_sync());
    }

    #[test]
    fn test_suffix_stripping() {
        assert!(one_instr("add.u32 $r1, $r2, $r3").is_alu());
        assert!(one_instr("mov.b32 $r2, g[$r3]").is_global());
    }

    #[test]
    fn test_unknown_opcode_is_error() {
        assert!(parse_instruction("frobnicate $r1", 1).is_err());
    }

    #[test]
    fn test_listing_splits_kernels_on_braces() {
        let src = "\
.entry first
{
mov $r1, $r2
}
.entry second
{
add $r1, $r1, $r2
add $r2, $r2, $r3
}
";
        let (kernels, diags) = parse_listing(src);
        assert!(diags.is_empty());
        assert_eq!(kernels.len(), 2);
        assert_eq!(kernels[0].name.as_deref(), Some("first"));
        assert_eq!(kernels[1].name.as_deref(), Some("second"));
        let instrs = |k: &ParsedKernel| {
            k.stmts
                .iter()
                .filter(|s| matches!(s, Stmt::Instr(_)))
                .count()
        };
        assert_eq!(instrs(&kernels[0]), 1);
        assert_eq!(instrs(&kernels[1]), 2);
    }

    #[test]
    fn test_listing_without_braces_is_one_kernel() {
        let (kernels, diags) = parse_listing("mov $r1, $r2\nadd $r1, $r1, $r1\n");
        assert!(diags.is_empty());
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].stmts.len(), 2);
    }

    #[test]
    fn test_label_line_with_instruction() {
        let (kernels, diags) = parse_listing("label4: add $r1, $r1, $r1\nbra label4\n");
        assert!(diags.is_empty());
        assert_eq!(kernels.len(), 1);
        let stmts = &kernels[0].stmts;
        assert!(matches!(stmts[0], Stmt::Label { number: 4 }));
        assert!(matches!(stmts[1], Stmt::Instr(_)));
        assert!(matches!(stmts[2], Stmt::Instr(_)));
    }

    #[test]
    fn test_bad_line_is_skipped_with_warning() {
        let (kernels, diags) = parse_listing("mov $r1, $r2\nfrobnicate $r9\nadd $r1, $r1, $r1\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(kernels[0].stmts.len(), 2);
    }

    #[test]
    fn test_comment_lines_are_dropped() {
        let (kernels, _) = parse_listing("// header\nmov $r1, $r2 // trailing\n# other\n");
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].stmts.len(), 1);
        match &kernels[0].stmts[0] {
            Stmt::Instr(i) => assert_eq!(i.text, "mov $r1, $r2"),
            other => panic!("expected instruction, got {:?}", other),
        }
    }
}
