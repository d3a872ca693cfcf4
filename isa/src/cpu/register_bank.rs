//! # Banked registers
//!
//! Each exception mode has its own R13 (SP), R14 (LR) and SPSR. User and
//! System share bank 0. FIQ's extra R8-R12 bank is not modelled.
//!
//! The bank of the current mode is stale while that mode runs: its values
//! live in the register file and are stored back when the mode is left.

use serde::{Deserialize, Serialize};

use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::Psr;

pub const NUM_BANKS: usize = 6;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankedRegisters {
    pub sp: u32,
    pub lr: u32,
    pub spsr: Psr,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBank([BankedRegisters; NUM_BANKS]);

impl RegisterBank {
    #[must_use]
    pub const fn for_mode(&self, mode: Mode) -> &BankedRegisters {
        &self.0[mode.bank()]
    }

    pub const fn for_mode_mut(&mut self, mode: Mode) -> &mut BankedRegisters {
        &mut self.0[mode.bank()]
    }
}
