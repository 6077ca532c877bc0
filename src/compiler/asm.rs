//! Abstract MMIX instructions
//!
//! Instructions are operand templates over virtual temporaries. A template
//! names its operands by slot: `` `s0 `` is the first use, `` `d0 `` the
//! first def, and `` `k `` the register window pushed by a call. Liveness
//! annotates each instruction with its live-in and live-out sets; register
//! allocation later resolves every slot to a physical register.

use std::collections::{HashMap, HashSet};
use std::fmt;

use smallvec::SmallVec;

use super::CompileError;
use super::ir::{Frame, Label};

/// Global register holding the frame pointer
pub const FRAME_POINTER: &str = "$253";
/// Global register holding the stack pointer
pub const STACK_POINTER: &str = "$254";

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Temp(pub u32);

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Allocator of fresh temporaries, shared by every function of a unit
#[derive(Debug, Clone)]
pub struct TempGen {
    next: u32,
}

impl TempGen {
    /// Start numbering at `first`; temporaries below it belong to earlier phases.
    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    pub fn fresh(&mut self) -> Temp {
        let temp = Temp(self.next);
        self.next += 1;
        temp
    }

    /// One past the highest temporary handed out so far
    pub fn count(&self) -> u32 {
        self.next
    }
}

/// Physical register index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(pub u8);

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Operand slot referenced from a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Use(usize),
    Def(usize),
    Window,
}

/// Expand every slot reference in `template` through `operand`.
pub(crate) fn expand_template<F>(template: &str, mut operand: F) -> Result<String, CompileError>
where
    F: FnMut(Slot) -> Result<String, CompileError>,
{
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '`' {
            out.push(c);
            continue;
        }
        let kind = chars.next().ok_or_else(|| {
            CompileError::Internal(format!("dangling operand marker in `{template}`"))
        })?;
        if kind == 'k' {
            out.push_str(&operand(Slot::Window)?);
            continue;
        }
        let mut index = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            index.push(d);
            chars.next();
        }
        let index: usize = index.parse().map_err(|_| {
            CompileError::Internal(format!("operand slot without index in `{template}`"))
        })?;
        let slot = match kind {
            's' => Slot::Use(index),
            'd' => Slot::Def(index),
            other => {
                return Err(CompileError::Internal(format!(
                    "unknown operand slot `{other}` in `{template}`"
                )));
            }
        };
        out.push_str(&operand(slot)?);
    }
    Ok(out)
}

fn slot_operand<T: fmt::Display>(
    template: &str,
    slot: Slot,
    uses: &[T],
    defs: &[T],
) -> Result<String, CompileError> {
    let (list, index) = match slot {
        Slot::Use(i) => (uses, i),
        Slot::Def(i) => (defs, i),
        Slot::Window => return Ok("`k".to_string()),
    };
    list.get(index)
        .map(ToString::to_string)
        .ok_or_else(|| CompileError::Internal(format!("slot {slot:?} out of range in `{template}`")))
}

/// The three instruction shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmKind {
    /// General operation with ordered use and def slots and optional jump targets
    Oper {
        template: String,
        uses: SmallVec<[Temp; 2]>,
        defs: SmallVec<[Temp; 1]>,
        jumps: SmallVec<[Label; 2]>,
    },
    /// Register copy `dst := src`, a candidate for coalescing
    Move {
        template: String,
        dst: Temp,
        src: Temp,
    },
    /// Jump target; carries no operands
    Label(Label),
}

/// Abstract instruction with its liveness annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmInstr {
    pub kind: AsmKind,
    pub live_in: HashSet<Temp>,
    pub live_out: HashSet<Temp>,
}

/// Template used for register copies
pub const MOVE_TEMPLATE: &str = "ADD `d0,`s0,0";

impl AsmInstr {
    fn with_kind(kind: AsmKind) -> Self {
        Self {
            kind,
            live_in: HashSet::new(),
            live_out: HashSet::new(),
        }
    }

    pub fn oper(template: impl Into<String>, uses: &[Temp], defs: &[Temp]) -> Self {
        Self::with_kind(AsmKind::Oper {
            template: template.into(),
            uses: uses.iter().copied().collect(),
            defs: defs.iter().copied().collect(),
            jumps: SmallVec::new(),
        })
    }

    pub fn jump(template: impl Into<String>, uses: &[Temp], targets: &[Label]) -> Self {
        Self::with_kind(AsmKind::Oper {
            template: template.into(),
            uses: uses.iter().copied().collect(),
            defs: SmallVec::new(),
            jumps: targets.iter().cloned().collect(),
        })
    }

    pub fn mov(dst: Temp, src: Temp) -> Self {
        Self::with_kind(AsmKind::Move {
            template: MOVE_TEMPLATE.to_string(),
            dst,
            src,
        })
    }

    pub fn label(label: Label) -> Self {
        Self::with_kind(AsmKind::Label(label))
    }

    pub fn uses(&self) -> &[Temp] {
        match &self.kind {
            AsmKind::Oper { uses, .. } => uses,
            AsmKind::Move { src, .. } => std::slice::from_ref(src),
            AsmKind::Label(_) => &[],
        }
    }

    pub fn defs(&self) -> &[Temp] {
        match &self.kind {
            AsmKind::Oper { defs, .. } => defs,
            AsmKind::Move { dst, .. } => std::slice::from_ref(dst),
            AsmKind::Label(_) => &[],
        }
    }

    pub fn jumps(&self) -> &[Label] {
        match &self.kind {
            AsmKind::Oper { jumps, .. } => jumps,
            AsmKind::Move { .. } | AsmKind::Label(_) => &[],
        }
    }

    pub fn template(&self) -> &str {
        match &self.kind {
            AsmKind::Oper { template, .. } | AsmKind::Move { template, .. } => template,
            AsmKind::Label(_) => "",
        }
    }

    /// `(dst, src)` if this is a register copy
    pub fn move_pair(&self) -> Option<(Temp, Temp)> {
        match &self.kind {
            AsmKind::Move { dst, src, .. } => Some((*dst, *src)),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&Label> {
        match &self.kind {
            AsmKind::Label(label) => Some(label),
            _ => None,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self.kind, AsmKind::Move { .. })
    }

    /// Substitute every use and def through `rename`.
    pub fn rename_temps<F>(&mut self, mut rename: F)
    where
        F: FnMut(Temp) -> Temp,
    {
        match &mut self.kind {
            AsmKind::Oper { uses, defs, .. } => {
                for temp in uses.iter_mut().chain(defs.iter_mut()) {
                    *temp = rename(*temp);
                }
            }
            AsmKind::Move { dst, src, .. } => {
                *dst = rename(*dst);
                *src = rename(*src);
            }
            AsmKind::Label(_) => {}
        }
    }

    /// Every temporary this instruction touches, in use, def, in, out order
    pub fn temps(&self) -> impl Iterator<Item = Temp> + '_ {
        self.uses()
            .iter()
            .chain(self.defs())
            .chain(&self.live_in)
            .chain(&self.live_out)
            .copied()
    }
}

impl fmt::Display for AsmInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let AsmKind::Label(label) = &self.kind {
            return write!(f, "{label}:");
        }
        let template = self.template();
        let text = expand_template(template, |slot| {
            slot_operand(template, slot, self.uses(), self.defs())
        })
        .map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Selected code of one function
#[derive(Debug, Clone)]
pub struct Code {
    pub frame: Frame,
    pub entry: Label,
    pub exit: Label,
    pub instrs: Vec<AsmInstr>,
    /// Bytes of frame space taken by spill slots
    pub temp_size: i64,
    /// Frame-pointer distance of each spill slot, kept across spill rounds
    pub spill_slots: HashMap<Temp, i64>,
}

impl Code {
    pub fn new(frame: Frame, entry: Label, exit: Label, instrs: Vec<AsmInstr>) -> Self {
        Self {
            frame,
            entry,
            exit,
            instrs,
            temp_size: 0,
            spill_slots: HashMap::new(),
        }
    }

    /// Whether any instruction writes the return-value temporary
    pub fn defines_return_value(&self) -> bool {
        let rv = self.frame.rv;
        self.instrs.iter().any(|instr| instr.defs().contains(&rv))
    }
}

/// Instruction with every operand bound to a physical register
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachInst {
    Op {
        template: String,
        uses: SmallVec<[PhysReg; 2]>,
        defs: SmallVec<[PhysReg; 1]>,
        jumps: SmallVec<[Label; 2]>,
    },
    Label(Label),
}

impl MachInst {
    /// Bind `instr`'s temporaries through `color`, resolving the call window to `window`.
    pub fn resolve<F>(instr: &AsmInstr, window: PhysReg, mut color: F) -> Result<Self, CompileError>
    where
        F: FnMut(Temp) -> Option<PhysReg>,
    {
        if let AsmKind::Label(label) = &instr.kind {
            return Ok(MachInst::Label(label.clone()));
        }
        let mut bind = |temps: &[Temp]| -> Result<SmallVec<[PhysReg; 2]>, CompileError> {
            temps
                .iter()
                .map(|&t| {
                    color(t).ok_or_else(|| {
                        CompileError::Internal(format!("{t} in `{instr}` has no register"))
                    })
                })
                .collect()
        };
        let uses = bind(instr.uses())?;
        let defs = bind(instr.defs())?.into_iter().collect();
        let template = expand_template(instr.template(), |slot| match slot {
            Slot::Use(i) => Ok(format!("`s{i}")),
            Slot::Def(i) => Ok(format!("`d{i}")),
            Slot::Window => Ok(window.to_string()),
        })?;
        Ok(MachInst::Op {
            template,
            uses,
            defs,
            jumps: instr.jumps().iter().cloned().collect(),
        })
    }
}

impl fmt::Display for MachInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachInst::Label(label) => write!(f, "{label}:"),
            MachInst::Op {
                template,
                uses,
                defs,
                ..
            } => {
                let text = expand_template(template, |slot| {
                    slot_operand(template, slot, &uses[..], &defs[..])
                })
                .map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
        }
    }
}
