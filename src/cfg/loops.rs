//! Natural-loop discovery.
//!
//! A DFS over the CFG finds back edges; each back edge names a loop header
//! and footer. The natural loop is grown from the footer through
//! predecessors, nesting is resolved to a fixpoint, unroll factors rescale
//! trip counts, and only outermost loops stay on the CFG's loop list (inner
//! loops remain reachable through their enclosing loop).

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

use super::{BlockId, Cfg};

/// Handle into the CFG's loop arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop{}", self.0)
    }
}

/// A natural loop.
#[derive(Debug)]
pub struct Loop {
    pub id: u32,
    pub header: BlockId,
    primary_footer: BlockId,
    /// Additional back-edge sources, e.g. from `continue`-style branches.
    pub extra_footers: Vec<BlockId>,
    /// Blocks of the natural loop, including header and footers.
    pub nat_blocks: BTreeSet<BlockId>,
    /// Directly nested loops, in discovery order.
    pub inner: Vec<LoopId>,
    pub enclosing: Option<LoopId>,
    /// 0 for outermost loops.
    pub level: u16,
    /// Expected iteration count used for cost attribution.
    pub trip_count: u32,
    /// Instructions summed over the natural loop.
    pub num_instrs: u32,
}

impl Loop {
    fn new(id: u32, header: BlockId, footer: BlockId, trip_count: u32) -> Self {
        Self {
            id,
            header,
            primary_footer: footer,
            extra_footers: Vec::new(),
            nat_blocks: BTreeSet::new(),
            inner: Vec::new(),
            enclosing: None,
            level: 0,
            trip_count,
            num_instrs: 0,
        }
    }

    /// The primary footer, or `None` when the loop has several back edges
    /// (the cycle walk cannot handle those).
    pub fn footer(&self) -> Option<BlockId> {
        if self.extra_footers.is_empty() {
            Some(self.primary_footer)
        } else {
            None
        }
    }

    pub fn has_inner(&self) -> bool {
        !self.inner.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl Cfg {
    /// Discover loops, resolve nesting, and apply unroll factors.
    ///
    /// `unroll` is the factor table indexed by loop id; pass `None` when the
    /// input is not an unrolled kernel. Returned diagnostics are warnings
    /// only; analysis always proceeds with defaults on a bad table.
    pub fn detect_loops(
        &mut self,
        default_trip_count: u32,
        unroll: Option<&[u32]>,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        self.find_back_edges(default_trip_count);

        // Grow every natural loop, remembering which other loop headers
        // turned up in each body.
        let mut nested: Vec<Vec<LoopId>> = Vec::with_capacity(self.loops.len());
        for lid in 0..self.loops.len() {
            nested.push(self.construct_nat_loop(LoopId(lid as u32)));
        }

        // Resolve direct nesting, tightest loops first: the smallest body
        // containing a header is its direct encloser.
        let mut order: Vec<usize> = (0..self.loops.len()).collect();
        order.sort_by_key(|&i| (self.loops[i].nat_blocks.len(), self.loops[i].id));
        for &i in &order {
            for &inner in &nested[i] {
                if self.loops[inner.0 as usize].enclosing.is_none() {
                    self.loops[inner.0 as usize].enclosing = Some(LoopId(i as u32));
                    self.loops[i].inner.push(inner);
                }
            }
        }

        // Nesting levels to a fixpoint.
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..self.loops.len() {
                if let Some(enc) = self.loops[i].enclosing {
                    let new_level = self.loops[enc.0 as usize].level + 1;
                    if self.loops[i].level != new_level {
                        self.loops[i].level = new_level;
                        changed = true;
                    }
                }
            }
        }

        if let Some(factors) = unroll {
            if factors.len() != self.loops.len() {
                diagnostics.push(
                    Diagnostic::warning(
                        format!(
                            "unroll factor count ({}) does not match loop count ({})",
                            factors.len(),
                            self.loops.len()
                        ),
                        Span::dummy(),
                    )
                    .with_help("using the default trip count for every loop".to_string()),
                );
            } else {
                for lp in &mut self.loops {
                    let factor = factors[lp.id as usize];
                    if factor == 0 {
                        lp.trip_count = 0;
                    } else {
                        lp.trip_count /= factor;
                    }
                }
            }
        }

        // Keep only outermost loops on the CFG-level list; inner loops stay
        // reachable through `inner`.
        self.outer_loops = (0..self.loops.len() as u32)
            .map(LoopId)
            .filter(|&l| self.loops[l.0 as usize].level == 0)
            .collect();

        diagnostics
    }

    /// Iterative DFS in successor insertion order. A gray successor marks a
    /// back edge.
    fn find_back_edges(&mut self, default_trip_count: u32) {
        let mut color = vec![Color::White; self.blocks().len()];
        let mut stack: Vec<(BlockId, usize)> = Vec::new();

        color[self.entry.0 as usize] = Color::Gray;
        stack.push((self.entry, 0));

        while let Some(&mut (b, ref mut next_succ)) = stack.last_mut() {
            let succs = &self.block(b).succs;
            if *next_succ < succs.len() {
                let s = succs[*next_succ];
                *next_succ += 1;
                match color[s.0 as usize] {
                    Color::Gray => self.record_back_edge(s, b, default_trip_count),
                    Color::White => {
                        color[s.0 as usize] = Color::Gray;
                        stack.push((s, 0));
                    }
                    Color::Black => {}
                }
            } else {
                color[b.0 as usize] = Color::Black;
                stack.pop();
            }
        }
    }

    fn record_back_edge(&mut self, header: BlockId, footer: BlockId, default_trip_count: u32) {
        if !self.block(header).is_loop_header {
            self.blocks[header.0 as usize].is_loop_header = true;
            let lid = LoopId(self.loops.len() as u32);
            self.loops
                .push(Loop::new(lid.0, header, footer, default_trip_count));
            self.header_loop.insert(header, lid);
        } else {
            let lid = self.header_loop[&header];
            self.loops[lid.0 as usize].extra_footers.push(footer);
        }
        self.blocks[footer.0 as usize].is_loop_footer = true;
    }

    /// Grow the natural loop from the footer through predecessors. Returns
    /// the loops whose headers turned up in the body, in pop order.
    fn construct_nat_loop(&mut self, lid: LoopId) -> Vec<LoopId> {
        let header = self.loops[lid.0 as usize].header;
        let footer = self.loops[lid.0 as usize].primary_footer;

        let mut nat: BTreeSet<BlockId> = BTreeSet::new();
        let mut work: Vec<BlockId> = Vec::new();
        let mut inner_found: Vec<LoopId> = Vec::new();
        let mut num_instrs = 0u32;

        nat.insert(header);
        num_instrs += self.block(header).counts.total;

        if nat.insert(footer) {
            work.push(footer);
            num_instrs += self.block(footer).counts.total;
        }

        while let Some(b) = work.pop() {
            if self.block(b).is_loop_header {
                assert!(b != header, "inconsistent natural-loop state");
                let inner = *self
                    .header_loop
                    .get(&b)
                    .expect("loop header is registered in the header map");
                inner_found.push(inner);
            }
            let preds: Vec<BlockId> = self.block(b).preds.clone();
            for p in preds {
                if nat.insert(p) {
                    work.push(p);
                    num_instrs += self.block(p).counts.total;
                }
            }
        }

        self.loops[lid.0 as usize].nat_blocks = nat;
        self.loops[lid.0 as usize].num_instrs = num_instrs;
        inner_found
    }
}

/// Read a whitespace-separated unroll-factor table.
pub fn load_unroll_table(path: &Path) -> Result<Vec<u32>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    let mut factors = Vec::new();
    for token in content.split_whitespace() {
        let factor = token
            .parse::<u32>()
            .map_err(|_| format!("invalid unroll factor '{}' in '{}'", token, path.display()))?;
        factors.push(factor);
    }
    Ok(factors)
}
