//! MMIX back end
//!
//! Turns linearized intermediate code into MMIX instructions bound to a
//! fixed pool of physical registers:
//!
//! ```text
//! CodeChunk ──isel──▶ Code (temps) ──liveness──▶ Code (in/out sets)
//!                                        ▲                │
//!                                        │          graph_coloring
//!                                   spill rewrite ◀── spills?
//!                                                         │ no
//!                                                         ▼
//!                                              AllocatedProgram
//! ```
//!
//! Each stage is a plain function over an explicit [`CompilationUnit`];
//! nothing is kept in global state.

use thiserror::Error;

pub mod asm;
pub mod config;
pub mod driver;
pub mod graph_coloring;
pub mod ir;
pub mod isel;
pub mod liveness;
pub mod spill;
pub mod unit;

pub use asm::{AsmInstr, AsmKind, Code, MachInst, PhysReg, Temp, TempGen};
pub use config::TargetConfig;
pub use driver::{AllocatedFunction, AllocatedProgram, AllocationStats, compile};
pub use ir::{BinOpKind, CodeChunk, Expr, Frame, Label, Stmt, UnOpKind};
pub use unit::CompilationUnit;

/// Errors raised inside the back end.
///
/// Every variant is an internal consistency failure: input programs have
/// already been checked by the time they reach this stage.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Unsupported IR: {0}")]
    UnsupportedIr(String),

    #[error("Internal allocator error: {0}")]
    Internal(String),

    #[error("Register allocation did not converge after {rounds} spill rounds")]
    SpillLimit { rounds: usize },

    #[error("Invalid target configuration: {0}")]
    InvalidConfig(String),
}
