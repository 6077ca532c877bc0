//! Instruction-level liveness
//!
//! Backward dataflow over the abstract instruction sequence of one function:
//!
//! ```text
//! out(n) = U in(s) for s in succ(n)
//! in(n)  = uses(n) U (out(n) - defs(n))
//! ```
//!
//! An instruction's successors are its jump targets if it has any, otherwise
//! the next instruction. A jump to the function's exit label keeps the return
//! value alive when the function writes one.

use std::collections::{HashMap, HashSet};

use log::trace;
use smallvec::SmallVec;

use super::asm::{Code, Temp};
use super::ir::Label;
use super::unit::CompilationUnit;

/// Successor relation of one function's instructions
#[derive(Debug, Clone)]
pub struct FlowGraph {
    succs: Vec<SmallVec<[usize; 2]>>,
    exits: Vec<bool>,
    exit_live: Option<Temp>,
}

impl FlowGraph {
    pub fn build(code: &Code) -> Self {
        let labels: HashMap<&Label, usize> = code
            .instrs
            .iter()
            .enumerate()
            .filter_map(|(index, instr)| instr.as_label().map(|label| (label, index)))
            .collect();

        let len = code.instrs.len();
        let mut succs = Vec::with_capacity(len);
        let mut exits = Vec::with_capacity(len);
        for (index, instr) in code.instrs.iter().enumerate() {
            let mut targets: SmallVec<[usize; 2]> = SmallVec::new();
            let mut exit = false;
            if instr.jumps().is_empty() {
                if index + 1 < len {
                    targets.push(index + 1);
                }
            } else {
                for label in instr.jumps() {
                    if let Some(&target) = labels.get(label) {
                        if !targets.contains(&target) {
                            targets.push(target);
                        }
                    } else if *label == code.exit {
                        exit = true;
                    }
                }
            }
            succs.push(targets);
            exits.push(exit);
        }

        FlowGraph {
            succs,
            exits,
            exit_live: code.defines_return_value().then_some(code.frame.rv),
        }
    }

    pub fn successors(&self, index: usize) -> &[usize] {
        &self.succs[index]
    }

    /// Whether instruction `index` jumps to the function's exit label
    pub fn jumps_to_exit(&self, index: usize) -> bool {
        self.exits[index]
    }

    pub fn len(&self) -> usize {
        self.succs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.succs.is_empty()
    }
}

/// Recompute every instruction's in/out sets from scratch.
///
/// Returns the number of passes taken, the last of which changed nothing.
pub fn analyze(code: &mut Code) -> usize {
    for instr in &mut code.instrs {
        instr.live_in.clear();
        instr.live_out.clear();
    }
    let graph = FlowGraph::build(code);
    let mut passes = 1;
    while iterate_once(code, &graph) {
        passes += 1;
    }
    trace!(
        "liveness for {} converged after {passes} passes",
        code.frame.label
    );
    passes
}

/// One backward pass over `code`; `true` if any set changed.
pub fn iterate_once(code: &mut Code, graph: &FlowGraph) -> bool {
    let mut changed = false;
    for index in (0..code.instrs.len()).rev() {
        let mut live_out: HashSet<Temp> = HashSet::new();
        for &succ in graph.successors(index) {
            live_out.extend(code.instrs[succ].live_in.iter().copied());
        }
        if graph.jumps_to_exit(index) {
            live_out.extend(graph.exit_live);
        }

        let instr = &code.instrs[index];
        let mut live_in: HashSet<Temp> = live_out
            .iter()
            .copied()
            .filter(|temp| !instr.defs().contains(temp))
            .collect();
        live_in.extend(instr.uses().iter().copied());

        let instr = &mut code.instrs[index];
        if instr.live_in != live_in || instr.live_out != live_out {
            instr.live_in = live_in;
            instr.live_out = live_out;
            changed = true;
        }
    }
    changed
}

/// Analyze every function of the unit.
pub fn analyze_unit(unit: &mut CompilationUnit) -> usize {
    unit.codes.iter_mut().map(analyze).sum()
}
