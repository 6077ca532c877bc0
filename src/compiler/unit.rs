//! Compilation unit context
//!
//! Owns the selected code of every function together with the temporary
//! arena. Every pass takes the unit by reference; temporaries created by
//! the selector or by spill rewriting all come from the same [`TempGen`],
//! so identities never collide across functions.

use super::CompileError;
use super::asm::{Code, TempGen};
use super::ir::CodeChunk;
use super::isel;

#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub codes: Vec<Code>,
    pub temps: TempGen,
}

impl CompilationUnit {
    /// An empty unit whose fresh temporaries start at `first_free`.
    pub fn new(first_free: u32) -> Self {
        Self {
            codes: Vec::new(),
            temps: TempGen::starting_at(first_free),
        }
    }

    /// Run instruction selection over every chunk.
    pub fn select(chunks: &[CodeChunk]) -> Result<Self, CompileError> {
        let first_free = chunks
            .iter()
            .map(|chunk| chunk.max_temp().0 + 1)
            .max()
            .unwrap_or(0);
        let mut unit = Self::new(first_free);
        for chunk in chunks {
            let code = isel::select_code(chunk, &mut unit.temps)?;
            unit.codes.push(code);
        }
        Ok(unit)
    }

    pub fn instr_count(&self) -> usize {
        self.codes.iter().map(|code| code.instrs.len()).sum()
    }
}
