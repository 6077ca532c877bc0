//! MMIX compiler back end
//!
//! Instruction selection, liveness analysis and iterated register coalescing
//! for linearized intermediate code. The entry point is [`compile`], which
//! takes one [`CodeChunk`] per function and returns MMIX instructions bound
//! to physical registers.

pub mod compiler;

pub use compiler::{
    AllocatedFunction, AllocatedProgram, AllocationStats, BinOpKind, CodeChunk, CompileError,
    Expr, Frame, Label, Stmt, TargetConfig, Temp, UnOpKind, compile,
};
