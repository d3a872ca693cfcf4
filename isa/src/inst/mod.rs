//! # Instruction descriptors
//!
//! A descriptor is produced once per decoded instruction by the decode
//! stage and is read-only afterwards. The only exception is the micro-op
//! sequence of a macro-op, which is built on first use and cached.
//!
//! ```text
//!                      ┌──────────────────────┐
//!                      │      StaticInst      │  mnemonic, predicate, flags,
//!                      └──────────┬───────────┘  disassembly, PC advance
//!          ┌──────────────────────┼───────────────────────┐
//!   ┌──────┴──────┐      ┌────────┴────────┐     ┌────────┴────────┐
//!   │  MemoryOp   │      │ ReturnFromExc.  │     │ StoreReturnState│
//!   │ shape × mode│      │  3 micro-ops    │     │  2 micro-ops    │
//!   └─────────────┘      └────────┬────────┘     └────────┬────────┘
//!                                 └──────── MicroOp ──────┘
//! ```
//!
//! ## Submodules
//!
//! - [`address`] - Displacement and effective address computation
//! - [`mode`] - Offset / pre-indexed / post-indexed addressing
//! - [`operand`] - Register shapes of a transfer
//! - [`memory`] - Load/store descriptors composed from the above
//! - [`macro_op`] - `RFE`/`SRS` and their micro-op sequences
//! - [`disasm`] - Disassembly helpers and symbol lookup

pub mod address;
pub mod disasm;
pub mod macro_op;
pub mod memory;
pub mod mode;
pub mod operand;

use serde::{Deserialize, Serialize};

use crate::cpu::condition::Condition;
use crate::cpu::pc_state::{PcState, advance_pc};
use crate::cpu::registers::RegIndex;
use crate::cpu::thread::ThreadContext;
use disasm::SymbolTable;
use macro_op::{MicroOp, MicroOpSequence, ReturnFromException, StoreReturnState};
use memory::MemoryOp;

/// Classification flags of a descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct InstFlags {
    /// One step of a decomposed instruction.
    pub is_microop: bool,

    /// Final step of a decomposed instruction.
    pub is_last_microop: bool,

    /// First step of a decomposed instruction.
    pub is_first_microop: bool,

    /// Effects are only architecturally visible once the last step commits.
    pub is_delayed_commit: bool,

    /// Executes as a sequence of micro-ops.
    pub is_macroop: bool,

    /// Reads memory into registers.
    pub is_load: bool,

    /// Writes registers to memory.
    pub is_store: bool,
}

/// Behaviour shared by every instruction descriptor.
pub trait StaticInst {
    fn mnemonic(&self) -> &str;

    fn condition(&self) -> Condition;

    fn flags(&self) -> InstFlags;

    /// Registers written by the instruction.
    fn dest_regs(&self) -> Vec<RegIndex>;

    /// Registers read by the instruction.
    fn src_regs(&self) -> Vec<RegIndex>;

    fn generate_disassembly(&self, pc: u32, symtab: Option<&dyn SymbolTable>) -> String;

    fn num_microops(&self) -> usize {
        0
    }

    /// Builds the micro-op sequence if needed and returns it.
    /// `None` for instructions that execute atomically.
    fn microops(&self) -> Option<&MicroOpSequence> {
        None
    }

    /// The micro-op at `upc`.
    ///
    /// # Panics
    /// Calling it on an atomic instruction, before the sequence was
    /// populated, or with `upc` out of range is a contract violation.
    fn fetch_microop(&self, upc: u16) -> &MicroOp {
        panic!(
            "{} is not a macro-op, cannot fetch micro-op {upc}",
            self.mnemonic()
        )
    }

    /// Advances a transient PC copy past this step.
    fn advance_pc(&self, pc: &mut PcState) {
        advance_pc(pc, self.flags());
    }

    /// Advances the committed PC of `tc` past this step.
    fn advance_thread_pc(&self, tc: &mut dyn ThreadContext) {
        advance_pc(tc, self.flags());
    }
}

/// Any instruction handled by this crate, as supplied by the decode stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Memory(MemoryOp),
    Rfe(ReturnFromException),
    Srs(StoreReturnState),
}

impl Instruction {
    fn inner(&self) -> &dyn StaticInst {
        match self {
            Self::Memory(op) => op,
            Self::Rfe(op) => op,
            Self::Srs(op) => op,
        }
    }
}

impl StaticInst for Instruction {
    fn mnemonic(&self) -> &str {
        self.inner().mnemonic()
    }

    fn condition(&self) -> Condition {
        self.inner().condition()
    }

    fn flags(&self) -> InstFlags {
        self.inner().flags()
    }

    fn dest_regs(&self) -> Vec<RegIndex> {
        self.inner().dest_regs()
    }

    fn src_regs(&self) -> Vec<RegIndex> {
        self.inner().src_regs()
    }

    fn generate_disassembly(&self, pc: u32, symtab: Option<&dyn SymbolTable>) -> String {
        self.inner().generate_disassembly(pc, symtab)
    }

    fn num_microops(&self) -> usize {
        self.inner().num_microops()
    }

    fn microops(&self) -> Option<&MicroOpSequence> {
        self.inner().microops()
    }

    fn fetch_microop(&self, upc: u16) -> &MicroOp {
        self.inner().fetch_microop(upc)
    }
}

impl From<MemoryOp> for Instruction {
    fn from(op: MemoryOp) -> Self {
        Self::Memory(op)
    }
}

impl From<ReturnFromException> for Instruction {
    fn from(op: ReturnFromException) -> Self {
        Self::Rfe(op)
    }
}

impl From<StoreReturnState> for Instruction {
    fn from(op: StoreReturnState) -> Self {
        Self::Srs(op)
    }
}
