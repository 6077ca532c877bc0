//! IR -> abstract MMIX instruction selection
//!
//! A single top-down pass over each statement. Operands are evaluated left to
//! right before the instruction consuming them is emitted, so calls and loads
//! keep their source order. Every computed value gets a fresh temporary; the
//! frame pointer is never allocated and is written inline as `$253`.

use log::trace;
use smallvec::SmallVec;

use super::CompileError;
use super::asm::{
    AsmInstr, Code, FRAME_POINTER, STACK_POINTER, Slot, Temp, TempGen, expand_template,
};
use super::ir::{BinOpKind, CodeChunk, Expr, Label, Stmt, UnOpKind};

/// Largest unsigned immediate an MMIX instruction encodes
pub const IMM_MAX: i64 = 255;

const SET_OPS: [&str; 4] = ["SETL", "SETML", "SETMH", "SETH"];
const INC_OPS: [&str; 4] = ["INCL", "INCML", "INCMH", "INCH"];

/// Select instructions for a whole function.
pub fn select_code(chunk: &CodeChunk, temps: &mut TempGen) -> Result<Code, CompileError> {
    let mut selector = Selector::new(chunk.frame.fp, temps);
    for stmt in &chunk.stmts {
        selector.stmt(stmt)?;
    }
    trace!(
        "selected {} instructions for {}",
        selector.out.len(),
        chunk.frame.label
    );
    Ok(Code::new(
        chunk.frame.clone(),
        chunk.entry.clone(),
        chunk.exit.clone(),
        selector.out,
    ))
}

/// Select instructions for one statement.
pub fn select_stmt(
    stmt: &Stmt,
    fp: Temp,
    temps: &mut TempGen,
) -> Result<Vec<AsmInstr>, CompileError> {
    let mut selector = Selector::new(fp, temps);
    selector.stmt(stmt)?;
    Ok(selector.out)
}

/// Select instructions for one expression, returning the temporary that holds its value.
pub fn select_expr(
    expr: &Expr,
    fp: Temp,
    temps: &mut TempGen,
) -> Result<(Vec<AsmInstr>, Temp), CompileError> {
    let mut selector = Selector::new(fp, temps);
    let result = selector.expr(expr)?;
    Ok((selector.out, result))
}

/// Materialize `value` into `dst` with at most four 16-bit set/increment steps.
///
/// The first nonzero 16-bit group is set, later nonzero groups are added;
/// zero groups cost nothing.
pub(crate) fn load_immediate(dst: Temp, value: u64) -> Vec<AsmInstr> {
    if value == 0 {
        return vec![AsmInstr::oper("SETL `d0,0", &[], &[dst])];
    }
    let group = |i: usize| (value >> (16 * i)) & 0xFFFF;
    let start = (0..4).find(|&i| group(i) != 0).unwrap_or(0);
    let mut out = vec![AsmInstr::oper(
        format!("{} `d0,{}", SET_OPS[start], group(start)),
        &[],
        &[dst],
    )];
    for i in (start + 1)..4 {
        if group(i) != 0 {
            // INC reads the partial value it adds to
            out.push(AsmInstr::oper(
                format!("{} `d0,{}", INC_OPS[i], group(i)),
                &[dst],
                &[dst],
            ));
        }
    }
    out
}

/// `base ± c` with `|c|` inside the immediate range, as `(base, signed offset)`
fn split_offset(addr: &Expr) -> Option<(&Expr, i64)> {
    let Expr::BinOp { op, lhs, rhs } = addr else {
        return None;
    };
    let Expr::Const(c) = **rhs else {
        return None;
    };
    if c.unsigned_abs() > IMM_MAX as u64 {
        return None;
    }
    match op {
        BinOpKind::Add => Some((lhs.as_ref(), c)),
        BinOpKind::Sub => Some((lhs.as_ref(), -c)),
        _ => None,
    }
}

struct Selector<'a> {
    fp: Temp,
    temps: &'a mut TempGen,
    out: Vec<AsmInstr>,
}

impl<'a> Selector<'a> {
    fn new(fp: Temp, temps: &'a mut TempGen) -> Self {
        Self {
            fp,
            temps,
            out: Vec::new(),
        }
    }

    fn fresh(&mut self) -> Temp {
        self.temps.fresh()
    }

    /// Rewrite frame-pointer use slots to `$253` and renumber the remaining ones.
    fn strip_frame_pointer(
        &self,
        template: &str,
        uses: &[Temp],
    ) -> Result<(String, SmallVec<[Temp; 2]>), CompileError> {
        if !uses.contains(&self.fp) {
            return Ok((template.to_string(), uses.iter().copied().collect()));
        }
        let mut kept: SmallVec<[Temp; 2]> = SmallVec::new();
        let mut renumber: SmallVec<[Option<usize>; 2]> = SmallVec::new();
        for &temp in uses {
            if temp == self.fp {
                renumber.push(None);
            } else {
                renumber.push(Some(kept.len()));
                kept.push(temp);
            }
        }
        let template = expand_template(template, |slot| match slot {
            Slot::Use(i) => match renumber.get(i) {
                Some(Some(n)) => Ok(format!("`s{n}")),
                Some(None) => Ok(FRAME_POINTER.to_string()),
                None => Err(CompileError::Internal(format!(
                    "use slot {i} out of range in `{template}`"
                ))),
            },
            Slot::Def(i) => Ok(format!("`d{i}")),
            Slot::Window => Ok("`k".to_string()),
        })?;
        Ok((template, kept))
    }

    fn check_def(&self, defs: &[Temp]) -> Result<(), CompileError> {
        if defs.contains(&self.fp) {
            return Err(CompileError::UnsupportedIr(format!(
                "frame pointer {} cannot be written",
                self.fp
            )));
        }
        Ok(())
    }

    fn emit(
        &mut self,
        template: impl AsRef<str>,
        uses: &[Temp],
        defs: &[Temp],
    ) -> Result<(), CompileError> {
        self.emit_jump(template, uses, defs, &[])
    }

    fn emit_jump(
        &mut self,
        template: impl AsRef<str>,
        uses: &[Temp],
        defs: &[Temp],
        targets: &[Label],
    ) -> Result<(), CompileError> {
        self.check_def(defs)?;
        let (template, uses) = self.strip_frame_pointer(template.as_ref(), uses)?;
        let instr = if targets.is_empty() {
            AsmInstr::oper(template, &uses, defs)
        } else {
            AsmInstr::jump(template, &uses, targets)
        };
        self.out.push(instr);
        Ok(())
    }

    /// Copy `src` into `dst`. Copies out of the frame pointer are plain operations.
    fn emit_move(&mut self, dst: Temp, src: Temp) -> Result<(), CompileError> {
        self.check_def(&[dst])?;
        if src == self.fp {
            self.out.push(AsmInstr::oper(
                format!("ADD `d0,{FRAME_POINTER},0"),
                &[],
                &[dst],
            ));
        } else {
            self.out.push(AsmInstr::mov(dst, src));
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Move { dst, src } => self.move_stmt(dst, src),
            Stmt::CJump { cond, pos, neg } => {
                let cond = self.expr(cond)?;
                self.emit_jump(
                    format!("BNZ `s0,{pos}"),
                    &[cond],
                    &[],
                    &[pos.clone(), neg.clone()],
                )
            }
            Stmt::Jump(label) => self.emit_jump(format!("JMP {label}"), &[], &[], &[label.clone()]),
            Stmt::Label(label) => {
                self.out.push(AsmInstr::label(label.clone()));
                Ok(())
            }
            Stmt::Expr(Expr::Call { label, args }) => self.call(label, args),
            Stmt::Expr(expr) => self.expr(expr).map(|_| ()),
        }
    }

    fn move_stmt(&mut self, dst: &Expr, src: &Expr) -> Result<(), CompileError> {
        match dst {
            Expr::Temp(dst) => {
                self.check_def(&[*dst])?;
                if let Expr::Call { label, args } = src {
                    self.call(label, args)?;
                    return self.emit(format!("LDO `d0,{STACK_POINTER},0"), &[], &[*dst]);
                }
                let src = self.expr(src)?;
                self.emit_move(*dst, src)
            }
            Expr::Mem(addr) => self.store(addr, src),
            other => Err(CompileError::UnsupportedIr(format!(
                "move into {other:?}, expected a temporary or memory"
            ))),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<Temp, CompileError> {
        match expr {
            Expr::Const(value) => self.constant(*value),
            Expr::Name(label) => {
                let dst = self.fresh();
                self.emit(format!("LDA `d0,{label}"), &[], &[dst])?;
                Ok(dst)
            }
            Expr::Temp(temp) => Ok(*temp),
            Expr::Mem(addr) => self.load(addr),
            Expr::UnOp { op, expr } => {
                let src = self.expr(expr)?;
                let dst = self.fresh();
                let template = match op {
                    UnOpKind::Neg => "NEG `d0,`s0",
                    UnOpKind::Not => "ZSZ `d0,`s0,1",
                };
                self.emit(template, &[src], &[dst])?;
                Ok(dst)
            }
            Expr::BinOp { op, lhs, rhs } => self.binop(*op, lhs, rhs),
            Expr::Call { label, args } => {
                self.call(label, args)?;
                let dst = self.fresh();
                self.emit(format!("LDO `d0,{STACK_POINTER},0"), &[], &[dst])?;
                Ok(dst)
            }
        }
    }

    fn constant(&mut self, value: i64) -> Result<Temp, CompileError> {
        let dst = self.fresh();
        let negate = (-IMM_MAX..0).contains(&value);
        let magnitude = if negate {
            value.unsigned_abs()
        } else {
            value as u64
        };
        self.out.extend(load_immediate(dst, magnitude));
        if negate {
            self.emit("NEG `d0,`s0", &[dst], &[dst])?;
        }
        Ok(dst)
    }

    fn binop(&mut self, op: BinOpKind, lhs: &Expr, rhs: &Expr) -> Result<Temp, CompileError> {
        let left = self.expr(lhs)?;
        if let Expr::Const(c) = rhs {
            if let Some(dst) = self.binop_immediate(op, left, *c)? {
                return Ok(dst);
            }
        }
        let right = self.expr(rhs)?;
        let dst = self.fresh();
        let operands = [left, right];
        let mnemonic = match op {
            BinOpKind::Add => "ADD",
            BinOpKind::Sub => "SUB",
            BinOpKind::Mul => "MUL",
            BinOpKind::Div => "DIV",
            BinOpKind::And => "AND",
            BinOpKind::Or => "OR",
            BinOpKind::Mod => {
                self.emit("DIV `d0,`s0,`s1", &operands, &[dst])?;
                self.emit("GET `d0,rR", &[], &[dst])?;
                return Ok(dst);
            }
            BinOpKind::Eq
            | BinOpKind::Ne
            | BinOpKind::Lt
            | BinOpKind::Gt
            | BinOpKind::Le
            | BinOpKind::Ge => {
                let zero_set = match op {
                    BinOpKind::Eq => "ZSZ",
                    BinOpKind::Ne => "ZSNZ",
                    BinOpKind::Lt => "ZSN",
                    BinOpKind::Gt => "ZSP",
                    BinOpKind::Le => "ZSNP",
                    _ => "ZSNN",
                };
                self.emit("CMP `d0,`s0,`s1", &operands, &[dst])?;
                self.emit(format!("{zero_set} `d0,`s0,1"), &[dst], &[dst])?;
                return Ok(dst);
            }
        };
        self.emit(format!("{mnemonic} `d0,`s0,`s1"), &operands, &[dst])?;
        Ok(dst)
    }

    /// Immediate-operand forms; `None` when `c` does not fit.
    fn binop_immediate(
        &mut self,
        op: BinOpKind,
        left: Temp,
        c: i64,
    ) -> Result<Option<Temp>, CompileError> {
        let positive = (1..=IMM_MAX).contains(&c);
        let negative = (-IMM_MAX..0).contains(&c);
        let (mnemonic, imm) = match op {
            BinOpKind::Add | BinOpKind::Sub if c == 0 => return self.copy_of(left).map(Some),
            BinOpKind::Mul | BinOpKind::Div if c == 1 => return self.copy_of(left).map(Some),
            BinOpKind::Add if positive => ("ADD", c),
            BinOpKind::Add if negative => ("SUB", -c),
            BinOpKind::Sub if positive => ("SUB", c),
            BinOpKind::Sub if negative => ("ADD", -c),
            BinOpKind::Mul if positive => ("MUL", c),
            BinOpKind::Div if positive => ("DIV", c),
            _ => return Ok(None),
        };
        let dst = self.fresh();
        self.emit(format!("{mnemonic} `d0,`s0,{imm}"), &[left], &[dst])?;
        Ok(Some(dst))
    }

    fn copy_of(&mut self, src: Temp) -> Result<Temp, CompileError> {
        let dst = self.fresh();
        self.emit_move(dst, src)?;
        Ok(dst)
    }

    fn load(&mut self, addr: &Expr) -> Result<Temp, CompileError> {
        match split_offset(addr) {
            Some((base, offset)) if offset >= 0 => {
                let base = self.expr(base)?;
                let dst = self.fresh();
                self.emit(format!("LDO `d0,`s0,{offset}"), &[base], &[dst])?;
                Ok(dst)
            }
            Some((base, offset)) => {
                let base = self.expr(base)?;
                let dst = self.fresh();
                self.emit(format!("SUB `d0,`s0,{}", -offset), &[base], &[dst])?;
                self.emit("LDO `d0,`s0,0", &[dst], &[dst])?;
                Ok(dst)
            }
            None => {
                let addr = self.expr(addr)?;
                let dst = self.fresh();
                self.emit("LDO `d0,`s0,0", &[addr], &[dst])?;
                Ok(dst)
            }
        }
    }

    fn store(&mut self, addr: &Expr, src: &Expr) -> Result<(), CompileError> {
        match split_offset(addr) {
            Some((base, offset)) if offset >= 0 => {
                let base = self.expr(base)?;
                let value = self.expr(src)?;
                self.emit(format!("STO `s0,`s1,{offset}"), &[value, base], &[])
            }
            Some((base, offset)) => {
                let base = self.expr(base)?;
                let addr = self.fresh();
                self.emit(format!("SUB `d0,`s0,{}", -offset), &[base], &[addr])?;
                let value = self.expr(src)?;
                self.emit("STO `s0,`s1,0", &[value, addr], &[])
            }
            None => {
                let addr = self.expr(addr)?;
                let value = self.expr(src)?;
                self.emit("STO `s0,`s1,0", &[value, addr], &[])
            }
        }
    }

    /// Store arguments into the callee's frame, then push the register window.
    fn call(&mut self, label: &Label, args: &[Expr]) -> Result<(), CompileError> {
        for (index, arg) in args.iter().enumerate() {
            let value = self.expr(arg)?;
            let offset = index as i64 * 8;
            if offset <= IMM_MAX {
                self.emit(format!("STO `s0,{STACK_POINTER},{offset}"), &[value], &[])?;
            } else {
                let slot = self.fresh();
                self.out.extend(load_immediate(slot, offset as u64));
                self.emit(format!("STO `s0,{STACK_POINTER},`s1"), &[value, slot], &[])?;
            }
        }
        self.emit(format!("PUSHJ `k,{label}"), &[], &[])
    }
}
