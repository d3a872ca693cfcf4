//! # Micro-coded instructions
//!
//! `RFE` (return from exception) and `SRS` (store return state) move a
//! two-word block between memory and system state. Neither can complete in
//! one atomic step, so each is split into a fixed sequence of micro-ops:
//!
//! ```text
//! RFE{da,db,ia,ib} rn{!}                    SRS{da,db,ia,ib} sp{!}, #mode
//! ┌───┬──────────────────────────────┐      ┌───┬──────────────────────────────┐
//! │ 0 │ ureg0 ← [addr]               │      │ 0 │ [addr]   ← lr                │
//! │   │ ureg1 ← [addr + 4]           │      │   │ [addr+4] ← spsr              │
//! │   │ ureg2 ← write-back address   │      │   │  (addr from sp_<mode>)       │
//! │ 1 │ rn ← ureg2       (if !)      │      │ 1 │ sp_<mode> ← wb   (if !) LAST │
//! │ 2 │ cpsr ← ureg1, pc ← ureg0 LAST│      └───┴──────────────────────────────┘
//! └───┴──────────────────────────────┘
//! ```
//!
//! Block addressing for a two-word block:
//!
//! | Mode | First word | Write-back |
//! |------|------------|------------|
//! | DA   | base - 4   | base - 8   |
//! | DB   | base - 8   | base - 8   |
//! | IA   | base       | base + 8   |
//! | IB   | base + 4   | base + 8   |
//!
//! A load into the PC that also writes back its base goes through the same
//! machinery with three steps (load into `ureg0`, base update, branch), so
//! the branch is the last thing it does. See
//! [`MemoryOp::is_microcoded`](super::memory::MemoryOp::is_microcoded).
//!
//! The sequence is built the first time it is asked for and then lives as
//! long as the instruction. Building it again gives the same micro-ops, so
//! speculative passes over the same descriptor are harmless.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::cpu::condition::Condition;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::registers::RegIndex;
use crate::inst::address::Address;
use crate::inst::disasm::{self, SymbolTable};
use crate::inst::memory::ReadWriteKind;
use crate::inst::{InstFlags, StaticInst};

/// Words moved by `RFE` and `SRS`.
pub const BLOCK_WORDS: u32 = 2;

/// Direction and timing of a block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockAddressing {
    DecrementAfter,
    DecrementBefore,
    IncrementAfter,
    IncrementBefore,
}

impl BlockAddressing {
    /// Address of the lowest word of a `words` long block.
    #[must_use]
    pub const fn start_address(self, base: u32, words: u32) -> u32 {
        let size = words * 4;
        match self {
            Self::DecrementAfter => base.wrapping_sub(size).wrapping_add(4),
            Self::DecrementBefore => base.wrapping_sub(size),
            Self::IncrementAfter => base,
            Self::IncrementBefore => base.wrapping_add(4),
        }
    }

    /// Base value after the transfer when write-back is requested.
    #[must_use]
    pub const fn write_back_address(self, base: u32, words: u32) -> u32 {
        let size = words * 4;
        match self {
            Self::DecrementAfter | Self::DecrementBefore => base.wrapping_sub(size),
            Self::IncrementAfter | Self::IncrementBefore => base.wrapping_add(size),
        }
    }

    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::DecrementAfter => "da",
            Self::DecrementBefore => "db",
            Self::IncrementAfter => "ia",
            Self::IncrementBefore => "ib",
        }
    }
}

/// What a single micro-op does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicroOpKind {
    /// Loads the return address and the saved PSR into scratch registers and
    /// latches the write-back address.
    LoadReturnState {
        base: RegIndex,
        addressing: BlockAddressing,
        pc: RegIndex,
        psr: RegIndex,
        write_back: RegIndex,
    },

    /// Copies the latched write-back address into the base register.
    /// Does nothing when the instruction has no write-back.
    WriteBackBase {
        base: RegIndex,
        source: RegIndex,
        enabled: bool,
    },

    /// Restores CPSR and branches to the loaded return address.
    CommitReturnState { pc: RegIndex, psr: RegIndex },

    /// Stores LR and SPSR of the current mode on the stack of `mode`.
    StoreReturnState {
        mode: Mode,
        addressing: BlockAddressing,
    },

    /// Updates the banked SP of `mode`.
    /// Does nothing when the instruction has no write-back.
    WriteBackBankedSp {
        mode: Mode,
        addressing: BlockAddressing,
        enabled: bool,
    },

    /// Loads through `address` into a scratch register and latches the
    /// base write-back value in another one.
    LoadToScratch {
        address: Address,
        quantity: ReadWriteKind,
        exclusive: bool,
        dest: RegIndex,
        write_back: RegIndex,
    },

    /// Branches to the address held in `target`.
    BranchToScratch { target: RegIndex },
}

/// One step of a micro-coded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroOp {
    mnemonic: &'static str,
    condition: Condition,
    flags: InstFlags,
    kind: MicroOpKind,
}

impl MicroOp {
    #[must_use]
    pub const fn new(mnemonic: &'static str, condition: Condition, kind: MicroOpKind) -> Self {
        Self {
            mnemonic,
            condition,
            flags: InstFlags {
                is_microop: true,
                is_last_microop: false,
                is_first_microop: false,
                is_delayed_commit: false,
                is_macroop: false,
                is_load: matches!(
                    kind,
                    MicroOpKind::LoadReturnState { .. } | MicroOpKind::LoadToScratch { .. }
                ),
                is_store: matches!(kind, MicroOpKind::StoreReturnState { .. }),
            },
            kind,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &MicroOpKind {
        &self.kind
    }
}

impl StaticInst for MicroOp {
    fn mnemonic(&self) -> &str {
        self.mnemonic
    }

    fn condition(&self) -> Condition {
        self.condition
    }

    fn flags(&self) -> InstFlags {
        self.flags
    }

    fn dest_regs(&self) -> Vec<RegIndex> {
        match self.kind {
            MicroOpKind::LoadReturnState {
                pc,
                psr,
                write_back,
                ..
            } => vec![pc, psr, write_back],
            MicroOpKind::WriteBackBase {
                base,
                enabled: true,
                ..
            } => vec![base],
            MicroOpKind::LoadToScratch {
                dest,
                write_back,
                ..
            } => vec![dest, write_back],
            MicroOpKind::CommitReturnState { .. } | MicroOpKind::BranchToScratch { .. } => {
                vec![RegIndex::PC]
            }
            MicroOpKind::WriteBackBase { .. }
            | MicroOpKind::StoreReturnState { .. }
            | MicroOpKind::WriteBackBankedSp { .. } => Vec::new(),
        }
    }

    fn src_regs(&self) -> Vec<RegIndex> {
        match self.kind {
            MicroOpKind::LoadReturnState { base, .. } => vec![base],
            MicroOpKind::WriteBackBase {
                source,
                enabled: true,
                ..
            } => vec![source],
            MicroOpKind::CommitReturnState { pc, psr } => vec![pc, psr],
            MicroOpKind::LoadToScratch { address, .. } => {
                let mut regs = vec![address.base];
                regs.extend(address.offset.index_register());
                regs
            }
            MicroOpKind::BranchToScratch { target } => vec![target],
            MicroOpKind::StoreReturnState { .. } => vec![RegIndex::LR],
            MicroOpKind::WriteBackBase { .. } | MicroOpKind::WriteBackBankedSp { .. } => {
                Vec::new()
            }
        }
    }

    fn generate_disassembly(&self, _pc: u32, _symtab: Option<&dyn SymbolTable>) -> String {
        let mnemonic = disasm::mnemonic(self.mnemonic, "", self.condition);
        match self.kind {
            MicroOpKind::LoadReturnState {
                base,
                addressing,
                pc,
                psr,
                write_back,
            } => format!(
                "{mnemonic} {pc}, {psr}, {write_back}, [{base}] {}",
                addressing.suffix()
            ),
            MicroOpKind::WriteBackBase {
                base,
                source,
                enabled,
            } => {
                if enabled {
                    format!("{mnemonic} {base}, {source}")
                } else {
                    format!("{mnemonic} (none)")
                }
            }
            MicroOpKind::CommitReturnState { pc, psr } => {
                format!("{mnemonic} cpsr, {psr}, pc, {pc}")
            }
            MicroOpKind::StoreReturnState { mode, addressing } => {
                format!("{mnemonic} lr, spsr, [sp_{mode}] {}", addressing.suffix())
            }
            MicroOpKind::WriteBackBankedSp {
                mode,
                addressing,
                enabled,
            } => {
                if enabled {
                    format!("{mnemonic} sp_{mode} {}", addressing.suffix())
                } else {
                    format!("{mnemonic} (none)")
                }
            }
            MicroOpKind::LoadToScratch {
                address,
                dest,
                write_back,
                ..
            } => {
                let offset = address.offset.render(address.offsetting);
                format!(
                    "{mnemonic} {dest}, {write_back}, {}",
                    address.mode.render(address.base, &offset)
                )
            }
            MicroOpKind::BranchToScratch { target } => format!("{mnemonic} pc, {target}"),
        }
    }
}

/// The micro-ops of one instruction, in execution order.
///
/// Every element is flagged as a micro-op, the first one as first and only
/// the last one as last; all but the last delay their commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroOpSequence(Box<[MicroOp]>);

impl MicroOpSequence {
    /// # Panics
    /// An empty sequence cannot be executed.
    #[must_use]
    pub fn new(mut uops: Vec<MicroOp>) -> Self {
        assert!(!uops.is_empty(), "a micro-op sequence cannot be empty");
        let last = uops.len() - 1;
        for (i, uop) in uops.iter_mut().enumerate() {
            uop.flags.is_microop = true;
            uop.flags.is_first_microop = i == 0;
            uop.flags.is_last_microop = i == last;
            uop.flags.is_delayed_commit = i != last;
        }
        Self(uops.into_boxed_slice())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, upc: u16) -> Option<&MicroOp> {
        self.0.get(usize::from(upc))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MicroOp> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a MicroOpSequence {
    type Item = &'a MicroOp;
    type IntoIter = std::slice::Iter<'a, MicroOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Lazily built, owned micro-op storage of a macro-op.
#[derive(Debug, Default, Clone)]
pub(crate) struct MicroOpCache(OnceCell<MicroOpSequence>);

impl MicroOpCache {
    pub(crate) fn get_or_build(
        &self,
        mnemonic: &str,
        build: impl FnOnce() -> MicroOpSequence,
    ) -> &MicroOpSequence {
        self.0.get_or_init(|| {
            tracing::debug!("building micro-ops of {mnemonic}");
            build()
        })
    }

    pub(crate) fn fetch(&self, mnemonic: &str, expected: usize, upc: u16) -> &MicroOp {
        let Some(uops) = self.0.get() else {
            panic!("micro-ops of {mnemonic} fetched before they were built")
        };
        assert_eq!(
            uops.len(),
            expected,
            "{mnemonic} has a malformed micro-op sequence"
        );
        uops.get(upc).unwrap_or_else(|| {
            panic!("{mnemonic} has {expected} micro-ops, micro-op {upc} requested")
        })
    }

    pub(crate) fn is_built(&self) -> bool {
        self.0.get().is_some()
    }
}

/// `RFE`: return from exception, loading PC and CPSR from memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnFromException {
    base: RegIndex,
    addressing: BlockAddressing,
    write_back: bool,
    #[serde(skip)]
    uops: MicroOpCache,
}

impl ReturnFromException {
    pub const NUM_MICROOPS: usize = 3;

    const URA: RegIndex = RegIndex::UREG0;
    const URB: RegIndex = RegIndex::UREG1;
    const URC: RegIndex = RegIndex::UREG2;

    #[must_use]
    pub fn new(base: RegIndex, addressing: BlockAddressing, write_back: bool) -> Self {
        Self {
            base,
            addressing,
            write_back,
            uops: MicroOpCache::default(),
        }
    }

    #[must_use]
    pub const fn base(&self) -> RegIndex {
        self.base
    }

    #[must_use]
    pub const fn addressing(&self) -> BlockAddressing {
        self.addressing
    }

    #[must_use]
    pub const fn write_back(&self) -> bool {
        self.write_back
    }

    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.uops.is_built()
    }

    /// Builds a fresh sequence from the addressing parameters.
    #[must_use]
    pub fn build_microops(&self) -> MicroOpSequence {
        let cond = self.condition();
        MicroOpSequence::new(vec![
            MicroOp::new(
                "rfe_ld",
                cond,
                MicroOpKind::LoadReturnState {
                    base: self.base,
                    addressing: self.addressing,
                    pc: Self::URA,
                    psr: Self::URB,
                    write_back: Self::URC,
                },
            ),
            MicroOp::new(
                "rfe_wb",
                cond,
                MicroOpKind::WriteBackBase {
                    base: self.base,
                    source: Self::URC,
                    enabled: self.write_back,
                },
            ),
            MicroOp::new(
                "rfe_ret",
                cond,
                MicroOpKind::CommitReturnState {
                    pc: Self::URA,
                    psr: Self::URB,
                },
            ),
        ])
    }
}

impl PartialEq for ReturnFromException {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && self.addressing == other.addressing
            && self.write_back == other.write_back
    }
}

impl Eq for ReturnFromException {}

impl StaticInst for ReturnFromException {
    fn mnemonic(&self) -> &'static str {
        "rfe"
    }

    fn condition(&self) -> Condition {
        Condition::NV
    }

    fn flags(&self) -> InstFlags {
        InstFlags {
            is_macroop: true,
            is_load: true,
            ..InstFlags::default()
        }
    }

    fn dest_regs(&self) -> Vec<RegIndex> {
        let mut regs = vec![RegIndex::PC];
        if self.write_back {
            regs.push(self.base);
        }
        regs
    }

    fn src_regs(&self) -> Vec<RegIndex> {
        vec![self.base]
    }

    fn generate_disassembly(&self, _pc: u32, _symtab: Option<&dyn SymbolTable>) -> String {
        let wb = if self.write_back { "!" } else { "" };
        format!(
            "{} {}{wb}",
            disasm::mnemonic("rfe", self.addressing.suffix(), self.condition()),
            self.base
        )
    }

    fn num_microops(&self) -> usize {
        Self::NUM_MICROOPS
    }

    fn microops(&self) -> Option<&MicroOpSequence> {
        Some(self.uops.get_or_build("rfe", || self.build_microops()))
    }

    fn fetch_microop(&self, upc: u16) -> &MicroOp {
        self.uops.fetch("rfe", Self::NUM_MICROOPS, upc)
    }
}

/// `SRS`: store LR and SPSR of the current mode on the stack of another mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReturnState {
    reg_mode: Mode,
    addressing: BlockAddressing,
    write_back: bool,
    #[serde(skip)]
    uops: MicroOpCache,
}

impl StoreReturnState {
    pub const NUM_MICROOPS: usize = 2;

    #[must_use]
    pub fn new(reg_mode: Mode, addressing: BlockAddressing, write_back: bool) -> Self {
        Self {
            reg_mode,
            addressing,
            write_back,
            uops: MicroOpCache::default(),
        }
    }

    #[must_use]
    pub const fn reg_mode(&self) -> Mode {
        self.reg_mode
    }

    #[must_use]
    pub const fn addressing(&self) -> BlockAddressing {
        self.addressing
    }

    #[must_use]
    pub const fn write_back(&self) -> bool {
        self.write_back
    }

    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.uops.is_built()
    }

    #[must_use]
    pub fn build_microops(&self) -> MicroOpSequence {
        let cond = self.condition();
        MicroOpSequence::new(vec![
            MicroOp::new(
                "srs_st",
                cond,
                MicroOpKind::StoreReturnState {
                    mode: self.reg_mode,
                    addressing: self.addressing,
                },
            ),
            MicroOp::new(
                "srs_wb",
                cond,
                MicroOpKind::WriteBackBankedSp {
                    mode: self.reg_mode,
                    addressing: self.addressing,
                    enabled: self.write_back,
                },
            ),
        ])
    }
}

impl PartialEq for StoreReturnState {
    fn eq(&self, other: &Self) -> bool {
        self.reg_mode == other.reg_mode
            && self.addressing == other.addressing
            && self.write_back == other.write_back
    }
}

impl Eq for StoreReturnState {}

impl StaticInst for StoreReturnState {
    fn mnemonic(&self) -> &'static str {
        "srs"
    }

    fn condition(&self) -> Condition {
        Condition::NV
    }

    fn flags(&self) -> InstFlags {
        InstFlags {
            is_macroop: true,
            is_store: true,
            ..InstFlags::default()
        }
    }

    fn dest_regs(&self) -> Vec<RegIndex> {
        Vec::new()
    }

    fn src_regs(&self) -> Vec<RegIndex> {
        vec![RegIndex::LR]
    }

    fn generate_disassembly(&self, _pc: u32, _symtab: Option<&dyn SymbolTable>) -> String {
        let wb = if self.write_back { "!" } else { "" };
        format!(
            "{} {}{wb}, #{}",
            disasm::mnemonic("srs", self.addressing.suffix(), self.condition()),
            RegIndex::SP,
            self.reg_mode
        )
    }

    fn num_microops(&self) -> usize {
        Self::NUM_MICROOPS
    }

    fn microops(&self) -> Option<&MicroOpSequence> {
        Some(self.uops.get_or_build("srs", || self.build_microops()))
    }

    fn fetch_microop(&self, upc: u16) -> &MicroOp {
        self.uops.fetch("srs", Self::NUM_MICROOPS, upc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn check_markers(uops: &MicroOpSequence) {
        let last = uops.len() - 1;
        for (i, uop) in uops.iter().enumerate() {
            let flags = uop.flags();
            assert!(flags.is_microop);
            assert_eq!(flags.is_last_microop, i == last);
            assert_eq!(flags.is_first_microop, i == 0);
            assert_eq!(flags.is_delayed_commit, i != last);
        }
    }

    #[test]
    fn block_addresses() {
        let base = 0x1000;
        let table = [
            (BlockAddressing::DecrementAfter, 0xFFC, 0xFF8),
            (BlockAddressing::DecrementBefore, 0xFF8, 0xFF8),
            (BlockAddressing::IncrementAfter, 0x1000, 0x1008),
            (BlockAddressing::IncrementBefore, 0x1004, 0x1008),
        ];
        for (addressing, start, write_back) in table {
            assert_eq!(addressing.start_address(base, 2), start);
            assert_eq!(addressing.write_back_address(base, 2), write_back);
        }
    }

    #[test]
    fn rfe_has_three_microops() {
        let rfe = ReturnFromException::new(RegIndex::SP, BlockAddressing::IncrementAfter, true);
        let uops = rfe.microops().unwrap();
        assert_eq!(uops.len(), 3);
        check_markers(uops);
        assert!(matches!(
            uops.get(2).unwrap().kind(),
            MicroOpKind::CommitReturnState { .. }
        ));
    }

    #[test]
    fn srs_has_two_microops() {
        let srs = StoreReturnState::new(Mode::Supervisor, BlockAddressing::DecrementBefore, false);
        let uops = srs.microops().unwrap();
        assert_eq!(uops.len(), 2);
        check_markers(uops);
    }

    #[test]
    fn population_is_lazy_and_cached() {
        let rfe =
            ReturnFromException::new(RegIndex::new(0), BlockAddressing::DecrementAfter, false);
        assert!(!rfe.is_populated());

        let first: *const MicroOpSequence = rfe.microops().unwrap();
        assert!(rfe.is_populated());
        let second: *const MicroOpSequence = rfe.microops().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rebuilding_gives_identical_sequences() {
        let srs = StoreReturnState::new(Mode::Irq, BlockAddressing::IncrementBefore, true);
        assert_eq!(srs.build_microops(), srs.build_microops());
        assert_eq!(srs.microops().unwrap(), &srs.build_microops());

        let copy = srs.clone();
        assert_eq!(copy.microops(), srs.microops());
    }

    #[test]
    fn fetch_microop_after_population() {
        let rfe = ReturnFromException::new(RegIndex::new(0), BlockAddressing::IncrementAfter, true);
        rfe.microops();
        assert_eq!(rfe.fetch_microop(0).mnemonic(), "rfe_ld");
        assert_eq!(rfe.fetch_microop(1).mnemonic(), "rfe_wb");
        assert_eq!(rfe.fetch_microop(2).mnemonic(), "rfe_ret");
    }

    #[test]
    #[should_panic = "fetched before they were built"]
    fn fetch_microop_before_population() {
        let rfe = ReturnFromException::new(RegIndex::new(0), BlockAddressing::IncrementAfter, true);
        rfe.fetch_microop(0);
    }

    #[test]
    #[should_panic = "srs has 2 micro-ops, micro-op 2 requested"]
    fn fetch_microop_out_of_range() {
        let srs = StoreReturnState::new(Mode::Irq, BlockAddressing::IncrementBefore, true);
        srs.microops();
        srs.fetch_microop(2);
    }

    #[test]
    fn disassembly() {
        let rfe = ReturnFromException::new(RegIndex::SP, BlockAddressing::IncrementAfter, true);
        assert_eq!(rfe.generate_disassembly(0, None), "rfeia sp!");

        let rfe =
            ReturnFromException::new(RegIndex::new(3), BlockAddressing::DecrementBefore, false);
        assert_eq!(rfe.generate_disassembly(0, None), "rfedb r3");

        let srs = StoreReturnState::new(Mode::Supervisor, BlockAddressing::DecrementBefore, true);
        assert_eq!(srs.generate_disassembly(0, None), "srsdb sp!, #svc");
    }

    #[test]
    fn microop_disassembly() {
        let rfe =
            ReturnFromException::new(RegIndex::new(2), BlockAddressing::IncrementAfter, false);
        let uops = rfe.microops().unwrap();
        let text: Vec<String> = uops
            .iter()
            .map(|u| u.generate_disassembly(0, None))
            .collect();
        assert_eq!(
            text,
            vec![
                "rfe_ld ureg0, ureg1, ureg2, [r2] ia".to_string(),
                "rfe_wb (none)".to_string(),
                "rfe_ret cpsr, ureg1, pc, ureg0".to_string(),
            ]
        );
    }

    #[test]
    fn descriptors_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReturnFromException>();
        assert_send_sync::<StoreReturnState>();
    }
}
