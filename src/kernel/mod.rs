//! Kernel construction: turns a parsed statement sequence into a linked
//! instruction stream with resolved labels, then inlines function calls.

pub mod inline;
pub mod instr;

use std::collections::HashMap;

use crate::syntax::{ParsedKernel, Stmt};
use instr::{InstrId, InstrStream};

/// A label definition: its number and the first instruction that follows it.
#[derive(Debug, Clone, Copy)]
pub struct Label {
    pub number: u32,
    pub first_instr: Option<InstrId>,
}

/// One GPU kernel: an instruction stream plus its label table.
#[derive(Debug)]
pub struct Kernel {
    pub name: Option<String>,
    pub stream: InstrStream,
    labels: HashMap<u32, Label>,
}

impl Kernel {
    /// Build the instruction stream from parsed statements.
    ///
    /// Labels attach to the next instruction pushed, which is also marked as
    /// a branch target. Duplicate label numbers keep the first definition.
    pub fn from_parsed(parsed: ParsedKernel) -> Kernel {
        let mut stream = InstrStream::new();
        let mut labels: HashMap<u32, Label> = HashMap::new();
        let mut pending: Vec<u32> = Vec::new();

        for stmt in parsed.stmts {
            match stmt {
                Stmt::Label { number } => pending.push(number),
                Stmt::Instr(instr) => {
                    let id = stream.push_back(instr);
                    for number in pending.drain(..) {
                        stream.get_mut(id).is_branch_target = true;
                        labels.entry(number).or_insert(Label {
                            number,
                            first_instr: Some(id),
                        });
                    }
                }
                // Directives carry no analysis content.
                Stmt::Directive { .. } => {}
            }
        }

        Kernel {
            name: parsed.name,
            stream,
            labels,
        }
    }

    pub fn label(&self, number: u32) -> Option<&Label> {
        self.labels.get(&number)
    }
}
