//! # Program counter advancement
//!
//! The PC state is a pair of cursors: the whole-instruction cursor
//! (`pc`/`npc`) and the micro-op cursor (`upc`/`nupc`) inside the current
//! instruction. After every executed step exactly one of three transitions
//! is applied:
//!
//! ```text
//!   last micro-op   ──► EndMicro      pc ← npc, npc += 4, upc ← 0, nupc ← 1
//!   other micro-op  ──► MicroAdvance  upc ← nupc, nupc += 1   (pc untouched)
//!   atomic          ──► Advance       pc ← npc, npc += 4, upc ← 0, nupc ← 1
//! ```
//!
//! A branch is expressed by the executing instruction overwriting `npc`
//! before the transition runs.
//!
//! The same decision is used whether the PC being advanced is a transient
//! copy or the committed PC of a thread: both sit behind [`ProgramCounter`].

use serde::{Deserialize, Serialize};

use crate::inst::InstFlags;

/// Size in bytes of one instruction.
pub const INSTRUCTION_SIZE: u32 = 4;

/// Which transition a step applies to the PC state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcStep {
    /// Move to the next whole instruction.
    Advance,

    /// Move to the next micro-op of the current instruction.
    MicroAdvance,

    /// Finish the micro-op sequence and move to the next instruction.
    EndMicro,
}

impl PcStep {
    /// The transition for a step with the given flags.
    #[must_use]
    pub const fn for_flags(flags: InstFlags) -> Self {
        if flags.is_last_microop {
            Self::EndMicro
        } else if flags.is_microop {
            Self::MicroAdvance
        } else {
            Self::Advance
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcState {
    pc: u32,
    npc: u32,
    upc: u16,
    nupc: u16,
}

impl Default for PcState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PcState {
    #[must_use]
    pub const fn new(pc: u32) -> Self {
        Self {
            pc,
            npc: pc.wrapping_add(INSTRUCTION_SIZE),
            upc: 0,
            nupc: 1,
        }
    }

    /// Address of the instruction being executed.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// Address of the next instruction.
    #[must_use]
    pub const fn npc(&self) -> u32 {
        self.npc
    }

    /// Index of the micro-op being executed.
    #[must_use]
    pub const fn upc(&self) -> u16 {
        self.upc
    }

    #[must_use]
    pub const fn nupc(&self) -> u16 {
        self.nupc
    }

    /// Redirects the next instruction, used by steps that write the PC.
    pub const fn set_npc(&mut self, npc: u32) {
        self.npc = npc;
    }

    /// Value of R15 as seen by the current instruction.
    #[must_use]
    pub const fn read_pc(&self) -> u32 {
        self.pc.wrapping_add(2 * INSTRUCTION_SIZE)
    }

    pub const fn advance(&mut self) {
        self.pc = self.npc;
        self.npc = self.npc.wrapping_add(INSTRUCTION_SIZE);
        self.upc = 0;
        self.nupc = 1;
    }

    pub const fn u_advance(&mut self) {
        self.upc = self.nupc;
        self.nupc += 1;
    }

    pub const fn u_end(&mut self) {
        self.advance();
        self.upc = 0;
        self.nupc = 1;
    }

    pub const fn apply(&mut self, step: PcStep) {
        match step {
            PcStep::Advance => self.advance(),
            PcStep::MicroAdvance => self.u_advance(),
            PcStep::EndMicro => self.u_end(),
        }
    }

    /// The state after executing a step carrying `flags`.
    #[must_use]
    pub const fn next(mut self, flags: InstFlags) -> Self {
        self.apply(PcStep::for_flags(flags));
        self
    }
}

/// Anything holding a PC that a step can advance.
pub trait ProgramCounter {
    fn pc_state(&self) -> PcState;

    fn set_pc_state(&mut self, state: PcState);
}

impl ProgramCounter for PcState {
    fn pc_state(&self) -> PcState {
        *self
    }

    fn set_pc_state(&mut self, state: PcState) {
        *self = state;
    }
}

/// Advances `target` past a step carrying `flags`.
pub fn advance_pc<P: ProgramCounter + ?Sized>(target: &mut P, flags: InstFlags) {
    let current = target.pc_state();
    let next = current.next(flags);
    tracing::trace!(
        "pc 0x{:08X}.{} -> 0x{:08X}.{} ({:?})",
        current.pc,
        current.upc,
        next.pc,
        next.upc,
        PcStep::for_flags(flags)
    );
    target.set_pc_state(next);
}
