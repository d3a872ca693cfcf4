//! # Load/store descriptors
//!
//! A [`MemoryOp`] is the composition of three independent parts:
//!
//! ```text
//!   OperandShape  ×  AddressingMode  ×  Offset
//!   ────────────     ──────────────     ──────────────────────
//!   Single           Offset             Immediate(imm)
//!   SingleExclusive  PreIndex           Register(Rm, shift)
//!   Pair             PostIndex
//!   PairExclusive
//! ```
//!
//! Every combination goes through the same code: the shape decides which
//! registers are printed and transferred, the mode decides the access
//! address and the write-back. Exclusive transfers only take immediate
//! offsets, which their constructors enforce through [`Address<i32>`].
//!
//! A single load into the PC that writes back its base is the one transfer
//! that does not execute atomically: it runs as three micro-ops so the
//! write-back lands before the branch.
//!
//! ```text
//! ┌───┬──────────────────────────────────────┐
//! │ 0 │ ureg0 ← [addr], ureg1 ← new base     │
//! │ 1 │ rn ← ureg1                           │
//! │ 2 │ pc ← ureg0                      LAST │
//! └───┴──────────────────────────────────────┘
//! ```
//!
//! ## Examples
//!
//! ```text
//! ldr    r0, [r1, #8]           Single,          Offset
//! ldrd   r2, r3, [r1, #-8]!     Pair,            PreIndex
//! str    r0, [r1], -r2, lsl #2  Single,          PostIndex
//! strex  r4, r0, [r1, #0]       SingleExclusive, Offset
//! ```

use serde::{Deserialize, Serialize};

use crate::cpu::condition::Condition;
use crate::cpu::registers::RegIndex;
use crate::error::DecodeError;
use crate::inst::address::{Address, Offset, Offsetting};
use crate::inst::disasm::{self, SymbolTable};
use crate::inst::macro_op::{MicroOp, MicroOpCache, MicroOpKind, MicroOpSequence};
use crate::inst::mode::AddressingMode;
use crate::inst::operand::OperandShape;
use crate::inst::{InstFlags, StaticInst};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStoreKind {
    Load,
    Store,
}

impl From<bool> for LoadStoreKind {
    fn from(b: bool) -> Self {
        if b { Self::Load } else { Self::Store }
    }
}

/// There two different kind of write or read for memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadWriteKind {
    #[default]
    Word,

    /// Zero-extended on load, low byte on store.
    Byte,
}

/// A load or store of one or two registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MemoryOpFields", into = "MemoryOpFields")]
pub struct MemoryOp {
    mnemonic: String,
    condition: Condition,
    kind: LoadStoreKind,
    quantity: ReadWriteKind,
    exclusive: bool,
    shape: OperandShape,
    address: Address,
    uops: MicroOpCache,
}

impl MemoryOp {
    /// Steps of a micro-coded load into the PC.
    pub const NUM_MICROOPS: usize = 3;

    fn compose(
        mnemonic: impl Into<String>,
        kind: LoadStoreKind,
        exclusive: bool,
        shape: OperandShape,
        address: Address,
    ) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            condition: Condition::AL,
            kind,
            quantity: ReadWriteKind::Word,
            exclusive,
            shape,
            address,
            uops: MicroOpCache::default(),
        }
    }

    /// `ldr`/`str` style transfer of one register.
    pub fn single(
        mnemonic: impl Into<String>,
        kind: LoadStoreKind,
        dest: RegIndex,
        address: Address,
    ) -> Self {
        let shape = OperandShape::Single { dest };
        Self::compose(mnemonic, kind, false, shape, address)
    }

    /// `ldrd`/`strd` style transfer of two registers from consecutive words.
    pub fn pair(
        mnemonic: impl Into<String>,
        kind: LoadStoreKind,
        dest: RegIndex,
        dest2: RegIndex,
        address: Address,
    ) -> Self {
        let shape = OperandShape::Pair { dest, dest2 };
        Self::compose(mnemonic, kind, false, shape, address)
    }

    /// `ldrex`: load and open an exclusive reservation.
    pub fn load_exclusive(
        mnemonic: impl Into<String>,
        dest: RegIndex,
        address: Address<i32>,
    ) -> Self {
        let shape = OperandShape::Single { dest };
        Self::compose(mnemonic, LoadStoreKind::Load, true, shape, address.into())
    }

    /// `ldrexd`
    pub fn load_exclusive_pair(
        mnemonic: impl Into<String>,
        dest: RegIndex,
        dest2: RegIndex,
        address: Address<i32>,
    ) -> Self {
        let shape = OperandShape::Pair { dest, dest2 };
        Self::compose(mnemonic, LoadStoreKind::Load, true, shape, address.into())
    }

    /// `strex`: store if the reservation holds, reporting the outcome in `result`.
    pub fn store_exclusive(
        mnemonic: impl Into<String>,
        result: RegIndex,
        dest: RegIndex,
        address: Address<i32>,
    ) -> Self {
        let shape = OperandShape::SingleExclusive { result, dest };
        Self::compose(mnemonic, LoadStoreKind::Store, true, shape, address.into())
    }

    /// `strexd`
    pub fn store_exclusive_pair(
        mnemonic: impl Into<String>,
        result: RegIndex,
        dest: RegIndex,
        dest2: RegIndex,
        address: Address<i32>,
    ) -> Self {
        let shape = OperandShape::PairExclusive {
            result,
            dest,
            dest2,
        };
        Self::compose(mnemonic, LoadStoreKind::Store, true, shape, address.into())
    }

    /// # Panics
    /// `NV` is reserved for the unconditional instructions.
    #[must_use]
    pub const fn with_condition(mut self, condition: Condition) -> Self {
        assert!(
            !matches!(condition, Condition::NV),
            "load/store transfers cannot be predicated on nv"
        );
        self.condition = condition;
        self
    }

    /// # Panics
    /// Register pairs are always word sized.
    #[must_use]
    pub fn with_quantity(mut self, quantity: ReadWriteKind) -> Self {
        assert!(
            quantity == ReadWriteKind::Word || !self.shape.is_pair(),
            "register pairs are always transferred as words"
        );
        self.quantity = quantity;
        self
    }

    #[must_use]
    pub const fn kind(&self) -> LoadStoreKind {
        self.kind
    }

    #[must_use]
    pub const fn quantity(&self) -> ReadWriteKind {
        self.quantity
    }

    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    #[must_use]
    pub const fn shape(&self) -> &OperandShape {
        &self.shape
    }

    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub const fn base(&self) -> RegIndex {
        self.address.base
    }

    #[must_use]
    pub const fn mode(&self) -> AddressingMode {
        self.address.mode
    }

    /// Whether the transfer runs as micro-ops: a single load into the PC
    /// with base write-back.
    #[must_use]
    pub const fn is_microcoded(&self) -> bool {
        matches!(self.kind, LoadStoreKind::Load)
            && matches!(self.shape, OperandShape::Single { dest } if dest.is_pc())
            && self.address.mode.writes_back()
    }

    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.uops.is_built()
    }

    /// Builds a fresh sequence, `None` for atomic transfers.
    #[must_use]
    pub fn build_microops(&self) -> Option<MicroOpSequence> {
        self.is_microcoded().then(|| self.load_pc_sequence())
    }

    fn load_pc_sequence(&self) -> MicroOpSequence {
        const TARGET: RegIndex = RegIndex::UREG0;
        const NEW_BASE: RegIndex = RegIndex::UREG1;

        let cond = self.condition;
        MicroOpSequence::new(vec![
            MicroOp::new(
                "ldr_ld",
                cond,
                MicroOpKind::LoadToScratch {
                    address: self.address,
                    quantity: self.quantity,
                    exclusive: self.exclusive,
                    dest: TARGET,
                    write_back: NEW_BASE,
                },
            ),
            MicroOp::new(
                "ldr_wb",
                cond,
                MicroOpKind::WriteBackBase {
                    base: self.address.base,
                    source: NEW_BASE,
                    enabled: true,
                },
            ),
            MicroOp::new(
                "ldr_br",
                cond,
                MicroOpKind::BranchToScratch { target: TARGET },
            ),
        ])
    }

    /// Target of a PC-relative access with an immediate offset, as known at
    /// disassembly time.
    const fn literal_address(&self, pc: u32) -> Option<u32> {
        let address = &self.address;
        match (address.base.is_pc(), address.offset, address.mode) {
            (true, Offset::Immediate(imm), AddressingMode::Offset) => {
                let base = pc.wrapping_add(8);
                #[allow(clippy::cast_sign_loss)]
                let imm = imm as u32;
                Some(match address.offsetting {
                    Offsetting::Up => base.wrapping_add(imm),
                    Offsetting::Down => base.wrapping_sub(imm),
                })
            }
            _ => None,
        }
    }
}

impl PartialEq for MemoryOp {
    fn eq(&self, other: &Self) -> bool {
        self.mnemonic == other.mnemonic
            && self.condition == other.condition
            && self.kind == other.kind
            && self.quantity == other.quantity
            && self.exclusive == other.exclusive
            && self.shape == other.shape
            && self.address == other.address
    }
}

impl Eq for MemoryOp {}

impl StaticInst for MemoryOp {
    fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    fn condition(&self) -> Condition {
        self.condition
    }

    fn flags(&self) -> InstFlags {
        InstFlags {
            is_macroop: self.is_microcoded(),
            is_load: self.kind == LoadStoreKind::Load,
            is_store: self.kind == LoadStoreKind::Store,
            ..InstFlags::default()
        }
    }

    fn dest_regs(&self) -> Vec<RegIndex> {
        let mut regs = Vec::new();
        regs.extend(self.shape.result());
        if self.kind == LoadStoreKind::Load {
            regs.extend(self.shape.data_registers());
        }
        if self.address.mode.writes_back() {
            regs.push(self.address.base);
        }
        regs
    }

    fn src_regs(&self) -> Vec<RegIndex> {
        let mut regs = vec![self.address.base];
        regs.extend(self.address.offset.index_register());
        if self.kind == LoadStoreKind::Store {
            regs.extend(self.shape.data_registers());
        }
        regs
    }

    fn generate_disassembly(&self, pc: u32, symtab: Option<&dyn SymbolTable>) -> String {
        let offset = self.address.offset.render(self.address.offsetting);
        let mut s = format!(
            "{} {}, {}",
            disasm::mnemonic(&self.mnemonic, "", self.condition),
            self.shape.render(),
            self.address.mode.render(self.address.base, &offset)
        );

        if let Some(target) = self.literal_address(pc) {
            s.push_str(" @ ");
            s.push_str(&disasm::address(target, symtab));
        }

        s
    }

    fn num_microops(&self) -> usize {
        if self.is_microcoded() {
            Self::NUM_MICROOPS
        } else {
            0
        }
    }

    fn microops(&self) -> Option<&MicroOpSequence> {
        if !self.is_microcoded() {
            return None;
        }
        let build = || self.load_pc_sequence();
        Some(self.uops.get_or_build(&self.mnemonic, build))
    }

    fn fetch_microop(&self, upc: u16) -> &MicroOp {
        assert!(
            self.is_microcoded(),
            "{} is not a macro-op, cannot fetch micro-op {upc}",
            self.mnemonic
        );
        self.uops.fetch(&self.mnemonic, Self::NUM_MICROOPS, upc)
    }
}

/// Flat form of a [`MemoryOp`], as it comes out of a decoder.
///
/// Converting it checks that the fields describe a transfer that exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOpFields {
    pub mnemonic: String,
    #[serde(default)]
    pub condition: Condition,
    pub kind: LoadStoreKind,
    #[serde(default)]
    pub quantity: ReadWriteKind,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RegIndex>,
    pub dest: RegIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest2: Option<RegIndex>,
    pub base: RegIndex,
    #[serde(default)]
    pub offsetting: Offsetting,
    #[serde(default)]
    pub offset: Offset,
    #[serde(default)]
    pub mode: AddressingMode,
}

impl TryFrom<MemoryOpFields> for MemoryOp {
    type Error = DecodeError;

    fn try_from(f: MemoryOpFields) -> Result<Self, Self::Error> {
        let store_exclusive = f.exclusive && f.kind == LoadStoreKind::Store;

        if f.result.is_some() && !store_exclusive {
            return Err(DecodeError::ResultOnNonExclusiveStore);
        }
        if store_exclusive && f.result.is_none() {
            return Err(DecodeError::MissingResult);
        }
        if f.exclusive && f.offset.index_register().is_some() {
            return Err(DecodeError::RegisterOffsetOnExclusive);
        }
        if f.dest2.is_some() && f.quantity == ReadWriteKind::Byte {
            return Err(DecodeError::ByteSizedPair);
        }
        if f.condition == Condition::NV {
            return Err(DecodeError::UnconditionalSpace);
        }

        let shape = match (f.result, f.dest2) {
            (None, None) => OperandShape::Single { dest: f.dest },
            (None, Some(dest2)) => OperandShape::Pair {
                dest: f.dest,
                dest2,
            },
            (Some(result), None) => OperandShape::SingleExclusive {
                result,
                dest: f.dest,
            },
            (Some(result), Some(dest2)) => OperandShape::PairExclusive {
                result,
                dest: f.dest,
                dest2,
            },
        };

        Ok(Self {
            mnemonic: f.mnemonic,
            condition: f.condition,
            kind: f.kind,
            quantity: f.quantity,
            exclusive: f.exclusive,
            shape,
            address: Address::new(f.base, f.offsetting, f.offset, f.mode),
            uops: MicroOpCache::default(),
        })
    }
}

impl From<MemoryOp> for MemoryOpFields {
    fn from(op: MemoryOp) -> Self {
        Self {
            mnemonic: op.mnemonic,
            condition: op.condition,
            kind: op.kind,
            quantity: op.quantity,
            exclusive: op.exclusive,
            result: op.shape.result(),
            dest: op.shape.dest(),
            dest2: op.shape.dest2(),
            base: op.address.base,
            offsetting: op.address.offsetting,
            offset: op.address.offset,
            mode: op.address.mode,
        }
    }
}
