//! Target configuration

use super::CompileError;
use super::asm::PhysReg;

/// Registers `$251`..`$255` are global registers owned by the runtime.
pub const MAX_ALLOCATABLE_REGS: usize = 250;

const DEFAULT_NUM_REGS: usize = 8;
const DEFAULT_MAX_SPILL_ROUNDS: usize = 32;

/// Knobs for register allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig {
    /// Number of allocatable registers, `$0` up to `$num_regs - 1`
    pub num_regs: usize,
    /// Upper bound on spill-and-retry rounds
    pub max_spill_rounds: usize,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            num_regs: DEFAULT_NUM_REGS,
            max_spill_rounds: DEFAULT_MAX_SPILL_ROUNDS,
        }
    }
}

impl TargetConfig {
    pub fn with_num_regs(mut self, num_regs: usize) -> Self {
        self.num_regs = num_regs;
        self
    }

    pub fn with_max_spill_rounds(mut self, rounds: usize) -> Self {
        self.max_spill_rounds = rounds;
        self
    }

    pub fn validate(&self) -> Result<(), CompileError> {
        if self.num_regs == 0 {
            return Err(CompileError::InvalidConfig(
                "at least one allocatable register is required".into(),
            ));
        }
        if self.num_regs > MAX_ALLOCATABLE_REGS {
            return Err(CompileError::InvalidConfig(format!(
                "at most {MAX_ALLOCATABLE_REGS} allocatable registers, got {}",
                self.num_regs
            )));
        }
        if self.max_spill_rounds == 0 {
            return Err(CompileError::InvalidConfig(
                "max_spill_rounds must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Register hole used by `PUSHJ`: everything below it is saved across calls.
    pub fn call_window(&self) -> PhysReg {
        PhysReg(self.num_regs as u8)
    }
}
