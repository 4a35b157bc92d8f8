//! Call-site inlining.
//!
//! A single forward pass resolves branch label numbers to instructions and
//! discovers call sites together with their callee bodies; each body is then
//! spliced in place of the call. Function bodies are emitted contiguously in
//! the listing, so entries and returns match up through a stack, and nested
//! calls match depth-first.

use std::collections::{HashMap, HashSet};

use super::instr::InstrId;
use super::Kernel;

/// Resolve branch targets, then splice every callee body next to its call
/// site. The callee's final `ret` becomes an unconditional branch back to
/// the instruction that originally followed the call; a top-level `ret`
/// (empty stack) stays a terminal branch with no target.
pub fn inline_calls(kernel: &mut Kernel) {
    let mut fn_entries: HashSet<InstrId> = HashSet::new();
    let mut call_to_entry: HashMap<InstrId, InstrId> = HashMap::new();
    let mut entry_to_exit: HashMap<InstrId, InstrId> = HashMap::new();
    let mut entry_stack: Vec<InstrId> = Vec::new();
    let mut call_sites: Vec<InstrId> = Vec::new();

    let mut cur = kernel.stream.head();
    while let Some(id) = cur {
        let (is_branch_target, is_branch, is_ret, is_call, target_label) = {
            let i = kernel.stream.get(id);
            (
                i.is_branch_target,
                i.is_branch(),
                i.is_ret,
                i.is_call,
                i.target_label,
            )
        };

        if is_branch_target && fn_entries.contains(&id) {
            // Start of a function body; the matching return pops it.
            entry_stack.push(id);
        }

        if is_branch {
            if is_ret {
                if let Some(entry) = entry_stack.pop() {
                    entry_to_exit.insert(entry, id);
                }
                kernel.stream.get_mut(id).branch_target = None;
            } else if let Some(number) = target_label {
                let label = kernel
                    .label(number)
                    .unwrap_or_else(|| panic!("branch references unseen label {}", number));
                let target = label
                    .first_instr
                    .unwrap_or_else(|| panic!("label {} has no target instruction", number));
                kernel.stream.get_mut(id).branch_target = Some(target);
                if is_call {
                    fn_entries.insert(target);
                    call_to_entry.insert(id, target);
                    call_sites.push(id);
                }
            }
        }

        cur = kernel.stream.next(id);
    }

    // Splice each discovered body after its call site. A body is moved at
    // most once; further calls to the same function keep plain branch
    // semantics.
    let mut spliced: HashSet<InstrId> = HashSet::new();
    for cs in call_sites {
        let entry = call_to_entry[&cs];
        let Some(&exit) = entry_to_exit.get(&entry) else {
            continue;
        };
        if !spliced.insert(entry) {
            continue;
        }

        if kernel.stream.next(cs) == Some(entry) {
            // Body already sits after the call; only the return needs a
            // target.
            let after_exit = kernel.stream.next(exit);
            kernel.stream.get_mut(exit).branch_target = after_exit;
        } else {
            let after_call = kernel.stream.next(cs);
            kernel.stream.splice_after(cs, entry, exit);
            kernel.stream.get_mut(exit).branch_target = after_call;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_listing;

    fn inlined_kernel(src: &str) -> Kernel {
        let (mut kernels, diags) = parse_listing(src);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        let mut k = Kernel::from_parsed(kernels.remove(0));
        inline_calls(&mut k);
        k
    }

    fn stream_texts(k: &Kernel) -> Vec<&str> {
        k.stream
            .iter()
            .map(|id| k.stream.get(id).text.as_str())
            .collect()
    }

    #[test]
    fn test_branch_targets_resolved() {
        let k = inlined_kernel("label1: add $r1, $r1, $r1\nbra label1\n");
        let bra = k.stream.tail().unwrap();
        let target = k.stream.get(bra).branch_target.unwrap();
        assert_eq!(k.stream.get(target).text, "add $r1, $r1, $r1");
    }

    #[test]
    fn test_callee_body_spliced_after_call() {
        let k = inlined_kernel(
            "mov $r1, $r2\n\
             call label2\n\
             bra label3\n\
             label2: add $r1, $r1, $r1\n\
             return\n\
             label3: mov $r4, $r1\n\
             return\n",
        );
        assert_eq!(
            stream_texts(&k),
            vec![
                "mov $r1, $r2",
                "call label2",
                "add $r1, $r1, $r1",
                "return",
                "bra label3",
                "mov $r4, $r1",
                "return",
            ]
        );
    }

    #[test]
    fn test_callee_return_branches_back() {
        let k = inlined_kernel(
            "call label2\n\
             bra label3\n\
             label2: add $r1, $r1, $r1\n\
             return\n\
             label3: return\n",
        );
        // Stream after inlining: call, add, return, bra, return.
        let ids: Vec<_> = k.stream.iter().collect();
        let callee_ret = ids[2];
        assert!(k.stream.get(callee_ret).is_ret);
        // The inlined return targets the instruction that followed the call.
        let back = k.stream.get(callee_ret).branch_target.unwrap();
        assert_eq!(k.stream.get(back).text, "bra label3");
        // The top-level return stays terminal.
        let top_ret = *ids.last().unwrap();
        assert!(k.stream.get(top_ret).branch_target.is_none());
    }

    #[test]
    fn test_nested_calls_inline_depth_first() {
        let k = inlined_kernel(
            "call label1\n\
             return\n\
             label1: call label2\n\
             return\n\
             label2: add $r1, $r1, $r1\n\
             return\n",
        );
        // The inner call's body lands after the inner call site, which
        // itself sits inside the outer callee body.
        assert_eq!(
            stream_texts(&k),
            vec![
                "call label1",
                "call label2",
                "add $r1, $r1, $r1",
                "return",
                "return",
                "return",
            ]
        );
    }

    #[test]
    fn test_top_level_return_untouched() {
        let k = inlined_kernel("mov $r1, $r2\nreturn\n");
        let ret = k.stream.tail().unwrap();
        assert!(k.stream.get(ret).branch_target.is_none());
        assert!(k.stream.get(ret).is_ret);
    }
}
