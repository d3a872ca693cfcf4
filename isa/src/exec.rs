//! # Reference execution
//!
//! Runs descriptors against a [`ThreadContext`]. One call to
//! [`Executor::step`] executes one step: a whole atomic instruction, or the
//! micro-op of a macro-op selected by the current `upc`. Every step ends
//! with the PC advance, whether its predicate passed or not.
//!
//! The shifter is a parameter so that address resolution can be run against
//! another evaluator, see [`Executor::with_shifter`].
//!
//! Order of effects for a load/store:
//!
//! 1. store data is read from the source registers;
//! 2. pre-indexed write-back;
//! 3. the memory access;
//! 4. post-indexed write-back;
//! 5. loaded values are written to their destinations, so a load into the
//!    base register wins over the write-back.

use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::Psr;
use crate::cpu::registers::RegIndex;
use crate::cpu::shifter::{BarrelShifter, Shifter};
use crate::cpu::thread::ThreadContext;
use crate::inst::address::{Address, AddressResolver};
use crate::inst::macro_op::{BLOCK_WORDS, BlockAddressing, MicroOp, MicroOpKind};
use crate::inst::memory::{LoadStoreKind, MemoryOp, ReadWriteKind};
use crate::inst::mode::{EffectiveAddress, WriteBackTiming};
use crate::inst::{Instruction, StaticInst};

/// What happened to a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Executed,

    /// The condition did not hold; only the PC moved.
    PredicateFailed,
}

#[derive(Debug, Default, Clone)]
pub struct Executor<S: Shifter = BarrelShifter> {
    shifter: S,
}

impl Executor<BarrelShifter> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            shifter: BarrelShifter,
        }
    }
}

impl<S: Shifter> Executor<S> {
    #[must_use]
    pub const fn with_shifter(shifter: S) -> Self {
        Self { shifter }
    }

    /// Executes the next step of `inst` and advances the PC of `tc`.
    pub fn step<T: ThreadContext>(&self, inst: &Instruction, tc: &mut T) -> StepOutcome {
        match inst {
            Instruction::Memory(op) if !op.is_microcoded() => {
                let outcome = Self::predicated(op, tc, |tc| self.execute_memory(op, tc));
                op.advance_thread_pc(tc);
                outcome
            }
            _ => {
                inst.microops();
                let uop = inst.fetch_microop(tc.pc_state().upc());
                let outcome = Self::predicated(uop, tc, |tc| self.execute_microop(uop, tc));
                uop.advance_thread_pc(tc);
                outcome
            }
        }
    }

    /// Steps `inst` until it has completed, i.e. the micro-op cursor is back
    /// at the start.
    pub fn execute<T: ThreadContext>(&self, inst: &Instruction, tc: &mut T) -> StepOutcome {
        loop {
            let outcome = self.step(inst, tc);
            if tc.pc_state().upc() == 0 {
                return outcome;
            }
        }
    }

    fn predicated<I, T, F>(inst: &I, tc: &mut T, execute: F) -> StepOutcome
    where
        I: StaticInst + ?Sized,
        T: ThreadContext,
        F: FnOnce(&mut T),
    {
        let pc = tc.pc_state().pc();
        if !tc.cpsr().can_execute(inst.condition()) {
            tracing::debug!(
                "0x{pc:08X}: {} skipped, condition not met",
                inst.generate_disassembly(pc, None)
            );
            return StepOutcome::PredicateFailed;
        }

        tracing::debug!("0x{pc:08X}: {}", inst.generate_disassembly(pc, None));
        execute(tc);
        StepOutcome::Executed
    }

    fn effective_address<T: ThreadContext>(&self, address: &Address, tc: &T) -> EffectiveAddress {
        let carry = tc.cpsr().carry_flag();
        let base_value = tc.read_reg(address.base);
        AddressResolver::new(&self.shifter).resolve(
            base_value,
            address,
            |reg| tc.read_reg(reg),
            carry,
        )
    }

    fn execute_memory<T: ThreadContext>(&self, op: &MemoryOp, tc: &mut T) {
        let address = op.address();
        let effective = self.effective_address(address, tc);

        let data_regs = op.shape().data_registers();
        let store_values: Vec<u32> = match op.kind() {
            LoadStoreKind::Store => data_regs.iter().map(|r| tc.read_reg(*r)).collect(),
            LoadStoreKind::Load => Vec::new(),
        };

        let timing = address.mode.write_back_timing();
        if timing == WriteBackTiming::WithAccess {
            Self::write_back(address.base, effective.write_back, tc);
        }

        let loaded = match op.kind() {
            LoadStoreKind::Load => {
                if op.is_exclusive() {
                    tc.set_exclusive(effective.access);
                }
                Self::load(op.quantity(), effective.access, data_regs.len(), tc)
            }
            LoadStoreKind::Store => {
                let success = !op.is_exclusive() || tc.check_exclusive(effective.access);
                if success {
                    Self::store(op.quantity(), effective.access, &store_values, tc);
                }
                if let Some(result) = op.shape().result() {
                    tc.write_reg(result, u32::from(!success));
                }
                Vec::new()
            }
        };

        if timing == WriteBackTiming::AfterAccess {
            Self::write_back(address.base, effective.write_back, tc);
        }

        for (reg, value) in data_regs.iter().zip(loaded) {
            tc.write_reg(*reg, value);
        }
    }

    fn load<T: ThreadContext>(
        quantity: ReadWriteKind,
        address: u32,
        count: usize,
        tc: &T,
    ) -> Vec<u32> {
        (0..count)
            .map(|i| address.wrapping_add(4 * i as u32))
            .map(|address| Self::load_one(quantity, address, tc))
            .collect()
    }

    fn load_one<T: ThreadContext>(quantity: ReadWriteKind, address: u32, tc: &T) -> u32 {
        match quantity {
            ReadWriteKind::Word => tc.read_word(address),
            ReadWriteKind::Byte => u32::from(tc.read_byte(address)),
        }
    }

    fn store<T: ThreadContext>(quantity: ReadWriteKind, address: u32, values: &[u32], tc: &mut T) {
        for (i, value) in values.iter().enumerate() {
            let address = address.wrapping_add(4 * i as u32);
            match quantity {
                ReadWriteKind::Word => tc.write_word(address, *value),
                ReadWriteKind::Byte => tc.write_byte(address, *value as u8),
            }
        }
    }

    fn write_back<T: ThreadContext>(base: RegIndex, value: Option<u32>, tc: &mut T) {
        if let Some(value) = value {
            tracing::trace!("write-back {base} <- 0x{value:08X}");
            tc.write_reg(base, value);
        }
    }

    fn execute_microop<T: ThreadContext>(&self, uop: &MicroOp, tc: &mut T) {
        match *uop.kind() {
            MicroOpKind::LoadReturnState {
                base,
                addressing,
                pc,
                psr,
                write_back,
            } => {
                let base_value = tc.read_reg(base);
                let start = addressing.start_address(base_value, BLOCK_WORDS);
                let new_pc = tc.read_word(start);
                let new_psr = tc.read_word(start.wrapping_add(4));
                tc.write_reg(pc, new_pc);
                tc.write_reg(psr, new_psr);
                tc.write_reg(
                    write_back,
                    addressing.write_back_address(base_value, BLOCK_WORDS),
                );
            }
            MicroOpKind::WriteBackBase {
                base,
                source,
                enabled,
            } => {
                if enabled {
                    let value = tc.read_reg(source);
                    Self::write_back(base, Some(value), tc);
                }
            }
            MicroOpKind::CommitReturnState { pc, psr } => {
                let new_pc = tc.read_reg(pc);
                let new_psr = Psr::from(tc.read_reg(psr));
                tc.set_cpsr(new_psr);
                tc.write_reg(RegIndex::PC, new_pc);
            }
            MicroOpKind::StoreReturnState { mode, addressing } => {
                let start = Self::banked_block_start(mode, addressing, tc);
                let lr = tc.read_reg(RegIndex::LR);
                let spsr = u32::from(tc.spsr());
                tc.write_word(start, lr);
                tc.write_word(start.wrapping_add(4), spsr);
            }
            MicroOpKind::WriteBackBankedSp {
                mode,
                addressing,
                enabled,
            } => {
                if enabled {
                    let sp = tc.read_banked(RegIndex::SP, mode);
                    let value = addressing.write_back_address(sp, BLOCK_WORDS);
                    tracing::trace!("write-back sp_{mode} <- 0x{value:08X}");
                    tc.write_banked(RegIndex::SP, mode, value);
                }
            }
            MicroOpKind::LoadToScratch {
                address,
                quantity,
                exclusive,
                dest,
                write_back,
            } => {
                let effective = self.effective_address(&address, tc);
                if exclusive {
                    tc.set_exclusive(effective.access);
                }
                let value = Self::load_one(quantity, effective.access, tc);
                tc.write_reg(dest, value);
                if let Some(new_base) = effective.write_back {
                    tc.write_reg(write_back, new_base);
                }
            }
            MicroOpKind::BranchToScratch { target } => {
                let target = tc.read_reg(target);
                tc.write_reg(RegIndex::PC, target);
            }
        }
    }

    fn banked_block_start<T: ThreadContext>(
        mode: Mode,
        addressing: BlockAddressing,
        tc: &T,
    ) -> u32 {
        let sp = tc.read_banked(RegIndex::SP, mode);
        addressing.start_address(sp, BLOCK_WORDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::condition::Condition;
    use crate::cpu::pc_state::{PcState, ProgramCounter};
    use crate::cpu::shifter::ShiftKind;
    use crate::cpu::thread::SimpleThread;
    use crate::inst::address::{Address, Offset, Offsetting};
    use crate::inst::macro_op::{ReturnFromException, StoreReturnState};
    use crate::inst::mode::AddressingMode;
    use pretty_assertions::assert_eq;

    const R0: RegIndex = RegIndex::new(0);
    const R1: RegIndex = RegIndex::new(1);
    const R2: RegIndex = RegIndex::new(2);
    const R3: RegIndex = RegIndex::new(3);

    fn thread() -> SimpleThread {
        SimpleThread::new(0x100, Mode::Supervisor)
    }

    fn r1(offsetting: Offsetting, imm: i32, mode: AddressingMode) -> Address {
        Address::new(R1, offsetting, Offset::from(imm), mode)
    }

    fn load_pc(mode: AddressingMode) -> MemoryOp {
        MemoryOp::single(
            "ldr",
            LoadStoreKind::Load,
            RegIndex::PC,
            r1(Offsetting::Up, 4, mode),
        )
    }

    #[test]
    fn load_offset_leaves_base() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_word(0x1008, 0xCAFE);

        let op = MemoryOp::single(
            "ldr",
            LoadStoreKind::Load,
            R0,
            r1(Offsetting::Up, 8, AddressingMode::Offset),
        );
        Executor::new().step(&op.into(), &mut tc);

        assert_eq!(tc.read_reg(R0), 0xCAFE);
        assert_eq!(tc.read_reg(R1), 0x1000);
        assert_eq!(tc.pc_state(), PcState::new(0x104));
    }

    #[test]
    fn store_pre_index_writes_back() {
        let mut tc = thread();
        tc.write_reg(R0, 0x55);
        tc.write_reg(R1, 0x1000);

        let op = MemoryOp::single(
            "str",
            LoadStoreKind::Store,
            R0,
            r1(Offsetting::Down, 8, AddressingMode::PreIndex),
        );
        Executor::new().step(&op.into(), &mut tc);

        assert_eq!(tc.read_word(0xFF8), 0x55);
        assert_eq!(tc.read_reg(R1), 0xFF8);
    }

    #[test]
    fn load_post_index_with_shifted_register() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_reg(R2, 3);
        tc.write_word(0x1000, 0x77);

        let op = MemoryOp::single(
            "ldr",
            LoadStoreKind::Load,
            R0,
            Address::new(
                R1,
                Offsetting::Up,
                Offset::Register {
                    shift_amount: 2,
                    shift_kind: ShiftKind::Lsl,
                    index: R2,
                },
                AddressingMode::PostIndex,
            ),
        );
        Executor::new().step(&op.into(), &mut tc);

        assert_eq!(tc.read_reg(R0), 0x77);
        assert_eq!(tc.read_reg(R1), 0x100C);
    }

    #[test]
    fn load_into_base_wins_over_write_back() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_word(0x1000, 0xABCD);

        let op = MemoryOp::single(
            "ldr",
            LoadStoreKind::Load,
            R1,
            r1(Offsetting::Up, 4, AddressingMode::PostIndex),
        );
        Executor::new().step(&op.into(), &mut tc);

        assert_eq!(tc.read_reg(R1), 0xABCD);
    }

    #[test]
    fn byte_load_is_zero_extended() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_word(0x1000, 0xFFFF_FF80);

        let op = MemoryOp::single(
            "ldrb",
            LoadStoreKind::Load,
            R0,
            r1(Offsetting::Up, 0, AddressingMode::Offset),
        )
        .with_quantity(ReadWriteKind::Byte);
        Executor::new().step(&op.into(), &mut tc);

        assert_eq!(tc.read_reg(R0), 0x80);
    }

    #[test]
    fn pair_uses_consecutive_words() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_reg(R2, 0x11);
        tc.write_reg(R3, 0x22);

        let op = MemoryOp::pair(
            "strd",
            LoadStoreKind::Store,
            R2,
            R3,
            r1(Offsetting::Up, 8, AddressingMode::Offset),
        );
        Executor::new().step(&op.into(), &mut tc);

        assert_eq!(tc.read_word(0x1008), 0x11);
        assert_eq!(tc.read_word(0x100C), 0x22);
    }

    #[test]
    fn exclusive_pair_succeeds_after_load() {
        let mut tc = thread();
        tc.write_reg(R1, 0x2000);
        tc.write_reg(R2, 0xA);
        tc.write_reg(R3, 0xB);
        let address = Address::new(R1, Offsetting::Up, 0, AddressingMode::Offset);
        let exec = Executor::new();

        let ldrex = MemoryOp::load_exclusive("ldrex", R0, address);
        exec.step(&ldrex.into(), &mut tc);
        let strexd = MemoryOp::store_exclusive_pair("strexd", RegIndex::new(4), R2, R3, address);
        exec.step(&strexd.clone().into(), &mut tc);
        assert_eq!(tc.read_reg(RegIndex::new(4)), 0);
        assert_eq!(tc.read_word(0x2000), 0xA);
        assert_eq!(tc.read_word(0x2004), 0xB);

        tc.write_reg(R2, 0xC);
        exec.step(&strexd.into(), &mut tc);
        assert_eq!(tc.read_reg(RegIndex::new(4)), 1);
        assert_eq!(tc.read_word(0x2000), 0xA);
    }

    #[test]
    fn failed_predicate_only_moves_pc() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_word(0x1000, 0x99);

        let op = MemoryOp::single(
            "ldr",
            LoadStoreKind::Load,
            R0,
            r1(Offsetting::Up, 0, AddressingMode::PreIndex),
        )
        .with_condition(Condition::EQ);
        let outcome = Executor::new().step(&op.into(), &mut tc);

        assert_eq!(outcome, StepOutcome::PredicateFailed);
        assert_eq!(tc.read_reg(R0), 0);
        assert_eq!(tc.pc_state(), PcState::new(0x104));
    }

    #[test]
    fn load_into_pc_branches() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_word(0x1000, 0x4000);

        let op = MemoryOp::single(
            "ldr",
            LoadStoreKind::Load,
            RegIndex::PC,
            r1(Offsetting::Up, 0, AddressingMode::Offset),
        );
        Executor::new().step(&op.into(), &mut tc);
        assert_eq!(tc.pc_state(), PcState::new(0x4000));
    }

    #[test]
    fn rfe_steps_through_its_microops() {
        let mut tc = SimpleThread::new(0x100, Mode::Irq);
        tc.write_reg(RegIndex::SP, 0x3000);
        tc.write_word(0x3000, 0x0800_0040);
        tc.write_word(0x3004, u32::from(Psr::from(Mode::User)));

        let rfe: Instruction =
            ReturnFromException::new(RegIndex::SP, BlockAddressing::IncrementAfter, true).into();
        let exec = Executor::new();

        exec.step(&rfe, &mut tc);
        assert_eq!(tc.pc_state().upc(), 1);
        assert_eq!(tc.read_reg(RegIndex::UREG0), 0x0800_0040);
        assert_eq!(tc.read_reg(RegIndex::UREG2), 0x3008);

        exec.step(&rfe, &mut tc);
        assert_eq!(tc.pc_state().upc(), 2);
        assert_eq!(tc.read_reg(RegIndex::SP), 0x3008);
        assert_eq!(tc.pc_state().pc(), 0x100);

        exec.step(&rfe, &mut tc);
        assert_eq!(tc.pc_state(), PcState::new(0x0800_0040));
        assert_eq!(tc.cpsr().mode(), Mode::User);
        assert_eq!(tc.read_banked(RegIndex::SP, Mode::Irq), 0x3008);
    }

    #[test]
    fn srs_stores_on_the_selected_stack() {
        let mut tc = SimpleThread::new(0x100, Mode::Irq);
        tc.write_reg(RegIndex::LR, 0x0800_0124);
        tc.set_spsr(Psr::new(0x2000_001F));
        tc.write_banked(RegIndex::SP, Mode::Supervisor, 0x0300_7FE0);

        let srs: Instruction =
            StoreReturnState::new(Mode::Supervisor, BlockAddressing::DecrementBefore, true).into();
        let outcome = Executor::new().execute(&srs, &mut tc);

        assert_eq!(outcome, StepOutcome::Executed);
        assert_eq!(tc.read_word(0x0300_7FD8), 0x0800_0124);
        assert_eq!(tc.read_word(0x0300_7FDC), 0x2000_001F);
        assert_eq!(tc.read_banked(RegIndex::SP, Mode::Supervisor), 0x0300_7FD8);
        assert_eq!(tc.pc_state(), PcState::new(0x104));
    }

    #[test]
    fn load_into_pc_with_write_back_steps_through_microops() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_word(0x1000, 0x0800_0200);

        let ldr: Instruction = load_pc(AddressingMode::PostIndex).into();
        let exec = Executor::new();

        assert_eq!(exec.step(&ldr, &mut tc), StepOutcome::Executed);
        assert_eq!(tc.pc_state().upc(), 1);
        assert_eq!(tc.read_reg(RegIndex::UREG0), 0x0800_0200);
        assert_eq!(tc.read_reg(RegIndex::UREG1), 0x1004);
        assert_eq!(tc.read_reg(R1), 0x1000);

        exec.step(&ldr, &mut tc);
        assert_eq!(tc.pc_state().upc(), 2);
        assert_eq!(tc.read_reg(R1), 0x1004);
        assert_eq!(tc.pc_state().pc(), 0x100);

        exec.step(&ldr, &mut tc);
        assert_eq!(tc.pc_state(), PcState::new(0x0800_0200));
    }

    #[test]
    fn pre_indexed_load_into_pc_writes_back_before_branching() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_word(0x1004, 0x0800_0300);

        let ldr: Instruction = load_pc(AddressingMode::PreIndex).into();
        let outcome = Executor::new().execute(&ldr, &mut tc);

        assert_eq!(outcome, StepOutcome::Executed);
        assert_eq!(tc.read_reg(R1), 0x1004);
        assert_eq!(tc.pc_state(), PcState::new(0x0800_0300));
    }

    #[test]
    fn failed_predicate_walks_the_microops_without_effect() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_word(0x1000, 0x0800_0200);

        let op = load_pc(AddressingMode::PostIndex).with_condition(Condition::EQ);
        let ldr: Instruction = op.into();
        let exec = Executor::new();

        for upc in 1..=2 {
            assert_eq!(exec.step(&ldr, &mut tc), StepOutcome::PredicateFailed);
            assert_eq!(tc.pc_state().upc(), upc);
        }
        assert_eq!(exec.step(&ldr, &mut tc), StepOutcome::PredicateFailed);
        assert_eq!(tc.pc_state(), PcState::new(0x104));
        assert_eq!(tc.read_reg(R1), 0x1000);
        assert_eq!(tc.read_reg(RegIndex::UREG0), 0);
    }

    struct FixedShifter(u32);

    impl Shifter for FixedShifter {
        fn shift(&self, _value: u32, _kind: ShiftKind, _amount: u32, _carry: bool) -> u32 {
            self.0
        }
    }

    #[test]
    fn custom_shifter_feeds_register_offsets() {
        let mut tc = thread();
        tc.write_reg(R1, 0x1000);
        tc.write_reg(R2, 1);
        tc.write_word(0x1010, 0x5A);

        let address = Address::new(
            R1,
            Offsetting::Up,
            Offset::register(R2),
            AddressingMode::Offset,
        );
        let op = MemoryOp::single("ldr", LoadStoreKind::Load, R0, address);
        let exec = Executor::with_shifter(FixedShifter(0x10));
        exec.step(&op.into(), &mut tc);

        assert_eq!(tc.read_reg(R0), 0x5A);
        assert_eq!(tc.read_reg(R1), 0x1000);
    }
}
