//! # Register references and the register file
//!
//! - **R0-R12**: General purpose
//! - **R13 (SP)**: Stack pointer
//! - **R14 (LR)**: Link register
//! - **R15 (PC)**: Program counter (reads as the instruction address + 8)
//! - **UREG0-UREG2**: Scratch registers only visible to micro-ops
//!
//! Descriptors never own registers: they carry [`RegIndex`] values and the
//! execution layer resolves them through a register file.

use serde::{Deserialize, Serialize};

/// Number of architectural integer registers.
pub const NUM_ARCH_REGS: usize = 16;

/// Number of micro-op scratch registers.
pub const NUM_SCRATCH_REGS: usize = 3;

/// An index into the integer register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RegIndex(u8);

impl RegIndex {
    pub const SP: Self = Self(13);
    pub const LR: Self = Self(14);
    pub const PC: Self = Self(15);

    pub const UREG0: Self = Self(16);
    pub const UREG1: Self = Self(17);
    pub const UREG2: Self = Self(18);

    /// # Panics
    /// Panics when `index` is outside the architectural and scratch registers.
    #[must_use]
    pub const fn new(index: u8) -> Self {
        assert!(
            (index as usize) < NUM_ARCH_REGS + NUM_SCRATCH_REGS,
            "Invalid register index"
        );
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn is_scratch(self) -> bool {
        self.0 as usize >= NUM_ARCH_REGS
    }

    #[must_use]
    pub const fn is_pc(self) -> bool {
        self.0 == Self::PC.0
    }
}

impl TryFrom<u8> for RegIndex {
    type Error = String;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        if usize::from(index) < NUM_ARCH_REGS + NUM_SCRATCH_REGS {
            Ok(Self(index))
        } else {
            Err(format!("Invalid register index: {index}"))
        }
    }
}

impl From<RegIndex> for u8 {
    fn from(r: RegIndex) -> Self {
        r.0
    }
}

impl std::fmt::Display for RegIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::SP => f.write_str("sp"),
            Self::LR => f.write_str("lr"),
            Self::PC => f.write_str("pc"),
            r if r.is_scratch() => write!(f, "ureg{}", r.index() - NUM_ARCH_REGS),
            r => write!(f, "r{}", r.0),
        }
    }
}

/// The registers visible to the executing core: sixteen architectural
/// registers followed by the micro-op scratch registers.
///
/// R15 holds the architectural PC value as seen by an instruction, i.e.
/// the instruction address + 8. [`ThreadContext`](super::thread::ThreadContext)
/// keeps it in sync with the PC state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers([u32; NUM_ARCH_REGS + NUM_SCRATCH_REGS]);

impl Registers {
    #[must_use]
    pub const fn register_at(&self, reg: RegIndex) -> u32 {
        self.0[reg.index()]
    }

    pub const fn set_register_at(&mut self, reg: RegIndex, new_value: u32) {
        self.0[reg.index()] = new_value;
    }

    /// The architectural registers, scratch registers excluded.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        self.0[..NUM_ARCH_REGS].to_vec()
    }
}
