//! # Thread context
//!
//! The state an instruction reads and writes while it executes: the
//! register file, CPSR/SPSR, the banked registers of every mode, memory,
//! the exclusive monitor and the committed PC.
//!
//! Writing R15 never moves the PC directly. It redirects `npc`, and the PC
//! advance that follows every step makes it visible.

use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::pc_state::{PcState, ProgramCounter};
use crate::cpu::psr::Psr;
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{RegIndex, Registers};

/// Everything an executing step can touch.
pub trait ThreadContext: ProgramCounter {
    /// Reads a register of the current mode. R15 reads as the instruction
    /// address + 8.
    fn read_reg(&self, reg: RegIndex) -> u32;

    /// Writes a register of the current mode. Writing R15 is a branch.
    fn write_reg(&mut self, reg: RegIndex, value: u32);

    fn cpsr(&self) -> Psr;

    /// Replaces the CPSR, switching register banks if the mode changes.
    fn set_cpsr(&mut self, psr: Psr);

    /// SPSR of the current mode.
    fn spsr(&self) -> Psr;

    fn set_spsr(&mut self, psr: Psr);

    /// SP or LR as seen by `mode`, whatever the current mode is.
    fn read_banked(&self, reg: RegIndex, mode: Mode) -> u32;

    fn write_banked(&mut self, reg: RegIndex, mode: Mode, value: u32);

    fn read_word(&self, address: u32) -> u32;

    fn write_word(&mut self, address: u32, value: u32);

    fn read_byte(&self, address: u32) -> u8;

    fn write_byte(&mut self, address: u32, value: u8);

    /// Opens an exclusive reservation on `address`.
    fn set_exclusive(&mut self, address: u32);

    /// Whether a store-exclusive to `address` may go ahead. The reservation
    /// is cleared either way.
    fn check_exclusive(&mut self, address: u32) -> bool;
}

/// Reference single-thread state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleThread {
    registers: Registers,
    cpsr: Psr,
    register_bank: RegisterBank,
    bus: Bus,
    exclusive: Option<u32>,
    pc_state: PcState,
}

impl SimpleThread {
    /// A thread in `mode` about to execute the instruction at `entry`.
    #[must_use]
    pub fn new(entry: u32, mode: Mode) -> Self {
        Self {
            cpsr: Psr::from(mode),
            pc_state: PcState::new(entry),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn bus(&self) -> &Bus {
        &self.bus
    }

    pub const fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    #[must_use]
    pub const fn registers(&self) -> &Registers {
        &self.registers
    }

    #[must_use]
    pub const fn exclusive_reservation(&self) -> Option<u32> {
        self.exclusive
    }

    /// Stores the banked registers of the current mode to the register bank.
    /// It should be used before leaving the current mode.
    fn store_registers_in_bank(&mut self) {
        let mode = self.cpsr.mode();
        let bank = self.register_bank.for_mode_mut(mode);
        bank.sp = self.registers.register_at(RegIndex::SP);
        bank.lr = self.registers.register_at(RegIndex::LR);
    }

    /// Restores the banked registers of the current mode from the register
    /// bank. It should be used after changing the mode.
    fn restore_registers_from_bank(&mut self) {
        let bank = *self.register_bank.for_mode(self.cpsr.mode());
        self.registers.set_register_at(RegIndex::SP, bank.sp);
        self.registers.set_register_at(RegIndex::LR, bank.lr);
    }

    fn is_live(&self, mode: Mode) -> bool {
        self.cpsr.mode().bank() == mode.bank()
    }
}

impl ProgramCounter for SimpleThread {
    fn pc_state(&self) -> PcState {
        self.pc_state
    }

    fn set_pc_state(&mut self, state: PcState) {
        self.pc_state = state;
    }
}

impl ThreadContext for SimpleThread {
    fn read_reg(&self, reg: RegIndex) -> u32 {
        if reg.is_pc() {
            self.pc_state.read_pc()
        } else {
            self.registers.register_at(reg)
        }
    }

    fn write_reg(&mut self, reg: RegIndex, value: u32) {
        if reg.is_pc() {
            tracing::trace!("branch to 0x{value:08X}");
            self.pc_state.set_npc(value);
        } else {
            self.registers.set_register_at(reg, value);
        }
    }

    fn cpsr(&self) -> Psr {
        self.cpsr
    }

    fn set_cpsr(&mut self, psr: Psr) {
        let old_mode = self.cpsr.mode();
        let new_mode = psr.mode();

        if old_mode.bank() == new_mode.bank() {
            self.cpsr = psr;
            return;
        }

        tracing::debug!("switching mode {old_mode} -> {new_mode}");
        self.store_registers_in_bank();
        self.cpsr = psr;
        self.restore_registers_from_bank();
    }

    fn spsr(&self) -> Psr {
        let mode = self.cpsr.mode();
        if !mode.has_spsr() {
            tracing::warn!("reading SPSR in {mode} mode, which has none");
        }
        self.register_bank.for_mode(mode).spsr
    }

    fn set_spsr(&mut self, psr: Psr) {
        let mode = self.cpsr.mode();
        if !mode.has_spsr() {
            tracing::warn!("writing SPSR in {mode} mode, which has none");
        }
        self.register_bank.for_mode_mut(mode).spsr = psr;
    }

    fn read_banked(&self, reg: RegIndex, mode: Mode) -> u32 {
        if self.is_live(mode) {
            return self.read_reg(reg);
        }

        let bank = self.register_bank.for_mode(mode);
        match reg {
            RegIndex::SP => bank.sp,
            RegIndex::LR => bank.lr,
            _ => self.read_reg(reg),
        }
    }

    fn write_banked(&mut self, reg: RegIndex, mode: Mode, value: u32) {
        if self.is_live(mode) {
            self.write_reg(reg, value);
            return;
        }

        let bank = self.register_bank.for_mode_mut(mode);
        match reg {
            RegIndex::SP => bank.sp = value,
            RegIndex::LR => bank.lr = value,
            _ => self.write_reg(reg, value),
        }
    }

    fn read_word(&self, address: u32) -> u32 {
        self.bus.read_word(address)
    }

    fn write_word(&mut self, address: u32, value: u32) {
        self.bus.write_word(address, value);
    }

    fn read_byte(&self, address: u32) -> u8 {
        self.bus.read_byte(address)
    }

    fn write_byte(&mut self, address: u32, value: u8) {
        self.bus.write_byte(address, value);
    }

    fn set_exclusive(&mut self, address: u32) {
        self.exclusive = Some(address);
    }

    fn check_exclusive(&mut self, address: u32) -> bool {
        self.exclusive.take() == Some(address)
    }
}
