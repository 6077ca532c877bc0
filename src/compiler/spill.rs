//! Spill code insertion
//!
//! Every spilled temporary gets one 8-byte frame slot per function, below
//! the locals and the saved-register area. Each instruction that touches a
//! spilled temporary gets a fresh temporary in its place, loaded from the slot
//! before the instruction and stored back after it, so no value produced here
//! lives across more than one instruction.
//!
//! The return value is pinned to its temporary by the exit liveness, so a
//! spilled return value is also reloaded into that temporary right before
//! every jump to the exit label.

use std::collections::{BTreeSet, HashSet};

use log::debug;
use smallvec::SmallVec;

use super::asm::{AsmInstr, Code, FRAME_POINTER, Temp, TempGen};
use super::isel::load_immediate;
use super::unit::CompilationUnit;

/// Bytes between the frame pointer and the first spill slot, past the locals
const SAVED_AREA: i64 = 16;
const SLOT_SIZE: i64 = 8;

/// Rewrite every function that touches a spilled temporary.
///
/// Every temporary created here, and a reloaded return value, is added to
/// `no_spill`. Returns the number of slots allocated.
pub fn rewrite_program(
    unit: &mut CompilationUnit,
    spilled: &BTreeSet<Temp>,
    no_spill: &mut HashSet<Temp>,
) -> usize {
    let CompilationUnit { codes, temps } = unit;
    codes
        .iter_mut()
        .map(|code| rewrite_code(code, spilled, temps, no_spill))
        .sum()
}

/// Rewrite one function, returning the number of slots it gained.
pub fn rewrite_code(
    code: &mut Code,
    spilled: &BTreeSet<Temp>,
    temps: &mut TempGen,
    no_spill: &mut HashSet<Temp>,
) -> usize {
    let touches = |instr: &AsmInstr| {
        instr
            .uses()
            .iter()
            .chain(instr.defs())
            .any(|t| spilled.contains(t))
    };
    if !code.instrs.iter().any(touches) {
        return 0;
    }

    let rv = code.frame.rv;
    let reload_rv = spilled.contains(&rv) && code.defines_return_value();
    let slots_before = code.spill_slots.len();
    let mut out = Vec::with_capacity(code.instrs.len() * 2);
    let instrs = std::mem::take(&mut code.instrs);

    for mut instr in instrs {
        // One replacement per spilled temporary, shared by its uses and defs here
        let mut renamed: SmallVec<[(Temp, Temp); 2]> = SmallVec::new();
        for &temp in instr.uses().iter().chain(instr.defs()) {
            if spilled.contains(&temp) && !renamed.iter().any(|&(old, _)| old == temp) {
                let fresh = temps.fresh();
                no_spill.insert(fresh);
                renamed.push((temp, fresh));
            }
        }
        let replacement = |temp: Temp| {
            renamed
                .iter()
                .find(|&&(old, _)| old == temp)
                .map(|&(_, fresh)| fresh)
        };

        let mut loads: SmallVec<[Temp; 2]> = SmallVec::new();
        for &temp in instr.uses() {
            if replacement(temp).is_some() && !loads.contains(&temp) {
                loads.push(temp);
            }
        }
        let mut stores: SmallVec<[Temp; 1]> = SmallVec::new();
        for &temp in instr.defs() {
            if replacement(temp).is_some() && !stores.contains(&temp) {
                stores.push(temp);
            }
        }

        for &temp in &loads {
            let addr = slot_address(code, &mut out, temps, no_spill, temp);
            if let Some(fresh) = replacement(temp) {
                out.push(AsmInstr::oper("LDO `d0,`s0,0", &[addr], &[fresh]));
            }
        }
        // Slots are numbered by first occurrence, defs included
        for &temp in &stores {
            slot_offset(code, temp);
        }
        if reload_rv && instr.jumps().contains(&code.exit) {
            let addr = slot_address(code, &mut out, temps, no_spill, rv);
            out.push(AsmInstr::oper("LDO `d0,`s0,0", &[addr], &[rv]));
            no_spill.insert(rv);
        }

        instr.rename_temps(|temp| replacement(temp).unwrap_or(temp));
        out.push(instr);

        for &temp in &stores {
            let addr = slot_address(code, &mut out, temps, no_spill, temp);
            if let Some(fresh) = replacement(temp) {
                out.push(AsmInstr::oper("STO `s0,`s1,0", &[fresh, addr], &[]));
            }
        }
    }

    code.instrs = out;
    let added = code.spill_slots.len() - slots_before;
    debug!(
        "{}: {added} new spill slots, {} bytes of temporaries",
        code.frame.label, code.temp_size
    );
    added
}

/// Frame-pointer distance of `temp`'s slot, allocating it on first sight
fn slot_offset(code: &mut Code, temp: Temp) -> i64 {
    let Code {
        frame,
        temp_size,
        spill_slots,
        ..
    } = code;
    *spill_slots.entry(temp).or_insert_with(|| {
        *temp_size += SLOT_SIZE;
        frame.locals_size + SAVED_AREA + *temp_size
    })
}

/// Emit `a = $253 - offset` for `temp`'s slot into a fresh temporary and return it.
fn slot_address(
    code: &mut Code,
    out: &mut Vec<AsmInstr>,
    temps: &mut TempGen,
    no_spill: &mut HashSet<Temp>,
    temp: Temp,
) -> Temp {
    let offset = slot_offset(code, temp);
    let addr = temps.fresh();
    no_spill.insert(addr);
    out.extend(load_immediate(addr, offset.unsigned_abs()));
    out.push(AsmInstr::oper(
        format!("SUB `d0,{FRAME_POINTER},`s0"),
        &[addr],
        &[addr],
    ));
    addr
}
