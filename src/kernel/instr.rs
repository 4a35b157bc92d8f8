//! Typed instruction records and the kernel instruction stream.
//!
//! The stream is an arena of instructions threaded as a doubly-linked list.
//! Handles (`InstrId`) index the arena and stay valid across splices, which
//! is what lets the inliner move a callee body next to its call site in O(1)
//! without disturbing references held elsewhere.

use std::fmt;

/// Handle into an [`InstrStream`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemSpace {
    Global,
    Shared,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemDir {
    Load,
    Store,
}

/// Instruction classification. Exactly one class per instruction; memory
/// operations carry exactly one space and one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Alu,
    Branch { cond: bool },
    Mem { space: MemSpace, dir: MemDir },
    Sync,
}

/// One classified instruction of a kernel.
#[derive(Debug, Clone)]
pub struct Instr {
    /// Raw listing text, kept for dumps and `.dot` output.
    pub text: String,
    /// 1-based source line number.
    pub line: u32,
    pub opcode: Opcode,
    /// Label number targeted by a branch. `None` for non-branches and for
    /// returns (which carry `is_ret` instead).
    pub target_label: Option<u32>,
    pub is_call: bool,
    pub is_ret: bool,
    /// Destination register, when one was parsed.
    pub dst: Option<u32>,
    /// Up to three source registers.
    pub srcs: [Option<u32>; 3],
    pub prev: Option<InstrId>,
    pub next: Option<InstrId>,
    /// Resolved by the inliner; stable afterwards.
    pub branch_target: Option<InstrId>,
    pub is_branch_target: bool,
    pub deleted: bool,
    /// Diagnostic stamp: committed cycle total when this instruction was
    /// processed by the cycle walk.
    pub cycles: u64,
}

impl Instr {
    pub fn new(text: String, line: u32, opcode: Opcode) -> Self {
        Self {
            text,
            line,
            opcode,
            target_label: None,
            is_call: false,
            is_ret: false,
            dst: None,
            srcs: [None; 3],
            prev: None,
            next: None,
            branch_target: None,
            is_branch_target: false,
            deleted: false,
            cycles: 0,
        }
    }

    pub fn is_alu(&self) -> bool {
        matches!(self.opcode, Opcode::Alu)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.opcode, Opcode::Branch { .. })
    }

    pub fn is_cond_branch(&self) -> bool {
        matches!(self.opcode, Opcode::Branch { cond: true })
    }

    pub fn is_mem(&self) -> bool {
        matches!(self.opcode, Opcode::Mem { .. })
    }

    pub fn is_sync(&self) -> bool {
        matches!(self.opcode, Opcode::Sync)
    }

    pub fn is_global(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Mem {
                space: MemSpace::Global,
                ..
            }
        )
    }

    pub fn is_shared(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Mem {
                space: MemSpace::Shared,
                ..
            }
        )
    }

    pub fn is_local(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Mem {
                space: MemSpace::Local,
                ..
            }
        )
    }

    pub fn is_load(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Mem {
                dir: MemDir::Load,
                ..
            }
        )
    }

    pub fn is_store(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Mem {
                dir: MemDir::Store,
                ..
            }
        )
    }

    /// Global or local memory: the high-latency class that triggers a warp
    /// switch in the baseline cycle model.
    pub fn is_high_latency_mem(&self) -> bool {
        self.is_global() || self.is_local()
    }
}

/// Arena-backed doubly-linked instruction stream.
#[derive(Debug, Default)]
pub struct InstrStream {
    instrs: Vec<Instr>,
    head: Option<InstrId>,
    tail: Option<InstrId>,
}

impl InstrStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn head(&self) -> Option<InstrId> {
        self.head
    }

    pub fn tail(&self) -> Option<InstrId> {
        self.tail
    }

    pub fn get(&self, id: InstrId) -> &Instr {
        &self.instrs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.0 as usize]
    }

    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.get(id).next
    }

    pub fn prev(&self, id: InstrId) -> Option<InstrId> {
        self.get(id).prev
    }

    /// Append an instruction, linking it after the current tail.
    pub fn push_back(&mut self, mut instr: Instr) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        instr.prev = self.tail;
        instr.next = None;
        self.instrs.push(instr);
        match self.tail {
            Some(t) => self.get_mut(t).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Iterate instruction ids in stream (link) order.
    pub fn iter(&self) -> StreamIter<'_> {
        StreamIter {
            stream: self,
            cur: self.head,
        }
    }

    /// Number of instructions not marked deleted.
    pub fn live_len(&self) -> usize {
        self.iter().filter(|&id| !self.get(id).deleted).count()
    }

    /// Detach the inclusive range `[first, last]` and re-insert it
    /// immediately after `at`. The range must be link-contiguous and must
    /// not contain `at`.
    pub fn splice_after(&mut self, at: InstrId, first: InstrId, last: InstrId) {
        if self.get(at).next == Some(first) {
            return;
        }

        // Detach [first, last] from its current position.
        let before = self.get(first).prev;
        let after = self.get(last).next;
        match before {
            Some(b) => self.get_mut(b).next = after,
            None => self.head = after,
        }
        match after {
            Some(a) => self.get_mut(a).prev = before,
            None => self.tail = before,
        }

        // Insert after `at`.
        let at_next = self.get(at).next;
        self.get_mut(at).next = Some(first);
        self.get_mut(first).prev = Some(at);
        self.get_mut(last).next = at_next;
        match at_next {
            Some(n) => self.get_mut(n).prev = Some(last),
            None => self.tail = Some(last),
        }
    }
}

pub struct StreamIter<'a> {
    stream: &'a InstrStream,
    cur: Option<InstrId>,
}

impl Iterator for StreamIter<'_> {
    type Item = InstrId;

    fn next(&mut self) -> Option<InstrId> {
        let id = self.cur?;
        self.cur = self.stream.get(id).next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alu(text: &str) -> Instr {
        Instr::new(text.to_string(), 0, Opcode::Alu)
    }

    fn texts(stream: &InstrStream) -> Vec<String> {
        stream
            .iter()
            .map(|id| stream.get(id).text.clone())
            .collect()
    }

    #[test]
    fn test_push_back_links() {
        let mut s = InstrStream::new();
        let a = s.push_back(alu("a"));
        let b = s.push_back(alu("b"));
        let c = s.push_back(alu("c"));
        assert_eq!(s.head(), Some(a));
        assert_eq!(s.tail(), Some(c));
        assert_eq!(s.next(a), Some(b));
        assert_eq!(s.prev(c), Some(b));
        assert_eq!(texts(&s), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_splice_moves_range_after_target() {
        let mut s = InstrStream::new();
        let a = s.push_back(alu("a"));
        let _b = s.push_back(alu("b"));
        let c = s.push_back(alu("c"));
        let d = s.push_back(alu("d"));
        let _e = s.push_back(alu("e"));
        // Move [c, d] right after a: a c d b e
        s.splice_after(a, c, d);
        assert_eq!(texts(&s), vec!["a", "c", "d", "b", "e"]);
        assert_eq!(s.head(), Some(a));
    }

    #[test]
    fn test_splice_range_at_tail() {
        let mut s = InstrStream::new();
        let a = s.push_back(alu("a"));
        let b = s.push_back(alu("b"));
        let c = s.push_back(alu("c"));
        // Move [b, c] after a: no-op position-wise.
        s.splice_after(a, b, c);
        assert_eq!(texts(&s), vec!["a", "b", "c"]);
        // Move [a, a]... instead move tail range [c, c] after a.
        s.splice_after(a, c, c);
        assert_eq!(texts(&s), vec!["a", "c", "b"]);
        assert_eq!(s.tail(), Some(b));
    }

    #[test]
    fn test_live_len_skips_deleted() {
        let mut s = InstrStream::new();
        let a = s.push_back(alu("a"));
        let _b = s.push_back(alu("b"));
        s.get_mut(a).deleted = true;
        assert_eq!(s.len(), 2);
        assert_eq!(s.live_len(), 1);
    }

    #[test]
    fn test_predicates() {
        let i = Instr::new(
            "mov $r1, g[$r2]".into(),
            1,
            Opcode::Mem {
                space: MemSpace::Global,
                dir: MemDir::Load,
            },
        );
        assert!(i.is_mem());
        assert!(i.is_global());
        assert!(i.is_load());
        assert!(i.is_high_latency_mem());
        assert!(!i.is_shared());
        assert!(!i.is_branch());
    }
}
