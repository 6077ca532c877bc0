//! Allocation pipeline
//!
//! Selection runs once. Liveness and coloring then repeat, with a spill
//! rewrite between rounds, until a round colors everything or the round
//! budget in [`TargetConfig`] runs out. A round that leaves only temporaries
//! from earlier spill rewrites uncolored ends the loop early: some
//! instruction needs more registers at once than the target has.

use std::collections::{HashMap, HashSet};

use log::{Level, debug, log_enabled, warn};

use super::CompileError;
use super::asm::{AsmInstr, Code, MachInst, PhysReg, Temp};
use super::config::TargetConfig;
use super::graph_coloring::{ColoringResult, color_program};
use super::ir::{CodeChunk, Frame, Label};
use super::liveness;
use super::spill;
use super::unit::CompilationUnit;

/// Counters for one compilation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Coloring rounds run, the successful one included
    pub rounds: usize,
    /// Temporaries spilled across all rounds
    pub spilled: usize,
    /// Moves coalesced in the final round
    pub coalesced_moves: usize,
}

/// One function after register allocation
#[derive(Debug, Clone)]
pub struct AllocatedFunction {
    pub frame: Frame,
    pub entry: Label,
    pub exit: Label,
    /// Bytes of spill slots the emitter must reserve below the locals
    pub temp_size: i64,
    /// Register holding the return value, if the function writes one
    pub rv_reg: Option<PhysReg>,
    /// Final abstract code, liveness included, redundant moves removed
    pub code: Code,
    /// `code` with every operand bound to a register
    pub instrs: Vec<MachInst>,
}

impl AllocatedFunction {
    /// MMIX text of the body, one instruction per line
    pub fn render(&self) -> String {
        self.instrs
            .iter()
            .map(|instr| match instr {
                MachInst::Label(_) => format!("{instr}\n"),
                MachInst::Op { .. } => format!("\t{instr}\n"),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct AllocatedProgram {
    pub functions: Vec<AllocatedFunction>,
    /// Register of every temporary that survived, coalesced ones included
    pub colors: HashMap<Temp, PhysReg>,
    pub stats: AllocationStats,
}

/// Select, allocate and resolve every function.
pub fn compile(
    chunks: &[CodeChunk],
    config: &TargetConfig,
) -> Result<AllocatedProgram, CompileError> {
    config.validate()?;
    let unit = CompilationUnit::select(chunks)?;
    allocate(unit, config)
}

/// Register-allocate already selected code.
pub fn allocate(
    mut unit: CompilationUnit,
    config: &TargetConfig,
) -> Result<AllocatedProgram, CompileError> {
    config.validate()?;
    let mut no_spill: HashSet<Temp> = HashSet::new();
    let mut stats = AllocationStats::default();

    for spill_round in 0..=config.max_spill_rounds {
        liveness::analyze_unit(&mut unit);
        let result = color_program(&unit.codes, config.num_regs, &no_spill)?;
        stats.rounds = spill_round + 1;
        stats.coalesced_moves = result.coalesced_moves;

        if result.spilled.is_empty() {
            debug!(
                "allocation converged after {} rounds, {} temps spilled, {} instructions",
                stats.rounds,
                stats.spilled,
                unit.instr_count()
            );
            return finish(unit, result, config, stats);
        }

        // Rewriting spill temporaries again only grows the code
        if result.spilled.iter().all(|temp| no_spill.contains(temp)) {
            warn!(
                "round {}: only spill temporaries {:?} left uncolored",
                stats.rounds, result.spilled
            );
            return Err(CompileError::SpillLimit {
                rounds: spill_round,
            });
        }

        stats.spilled += result.spilled.len();
        let slots = spill::rewrite_program(&mut unit, &result.spilled, &mut no_spill);
        debug!(
            "round {}: spilled {:?} into {slots} new slots, {} moves coalesced, {} temps allocated",
            stats.rounds,
            result.spilled,
            result.coalesced_moves,
            unit.temps.count()
        );
    }

    Err(CompileError::SpillLimit {
        rounds: config.max_spill_rounds,
    })
}

fn finish(
    unit: CompilationUnit,
    result: ColoringResult,
    config: &TargetConfig,
    stats: AllocationStats,
) -> Result<AllocatedProgram, CompileError> {
    let colors = result.colors;
    let window = config.call_window();
    let color_of = |temp: Temp| colors.get(&temp).copied();

    let mut functions = Vec::with_capacity(unit.codes.len());
    for mut code in unit.codes {
        code.instrs.retain(|instr| !is_redundant_move(instr, color_of));
        log_allocation(&code, &colors);

        let instrs = code
            .instrs
            .iter()
            .map(|instr| MachInst::resolve(instr, window, color_of))
            .collect::<Result<Vec<_>, _>>()?;

        functions.push(AllocatedFunction {
            frame: code.frame.clone(),
            entry: code.entry.clone(),
            exit: code.exit.clone(),
            temp_size: code.temp_size,
            rv_reg: color_of(code.frame.rv),
            code,
            instrs,
        });
    }

    Ok(AllocatedProgram {
        functions,
        colors,
        stats,
    })
}

/// A move whose ends landed in the same register
fn is_redundant_move<F>(instr: &AsmInstr, color_of: F) -> bool
where
    F: Fn(Temp) -> Option<PhysReg>,
{
    match instr.move_pair() {
        Some((dst, src)) => {
            let dst = color_of(dst);
            dst.is_some() && dst == color_of(src)
        }
        None => false,
    }
}

fn log_allocation(code: &Code, colors: &HashMap<Temp, PhysReg>) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    debug!("{}:", code.frame.label);
    for instr in &code.instrs {
        let mut live_in: Vec<_> = instr.live_in.iter().copied().collect();
        let mut live_out: Vec<_> = instr.live_out.iter().copied().collect();
        live_in.sort();
        live_out.sort();
        debug!(
            "  {instr}  uses={:?} defs={:?} in={live_in:?} out={live_out:?}",
            instr.uses(),
            instr.defs()
        );
    }

    let mut temps: Vec<Temp> = code.instrs.iter().flat_map(|i| i.temps()).collect();
    temps.sort();
    temps.dedup();
    for temp in temps {
        match colors.get(&temp) {
            Some(reg) => debug!("  {temp} -> {reg}"),
            None => debug!("  {temp} -> <none>"),
        }
    }
}
