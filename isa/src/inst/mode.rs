//! # Addressing modes
//!
//! | Mode          | Access address | Base write-back | Assembly        |
//! |---------------|----------------|-----------------|-----------------|
//! | `Offset`      | base + disp    | none            | `[rn, off]`     |
//! | `PreIndex`    | base + disp    | base + disp     | `[rn, off]!`    |
//! | `PostIndex`   | base           | base + disp     | `[rn], off`     |
//!
//! Pre-indexed write-back happens together with the access, post-indexed
//! write-back after it. The faulting address and the final register state
//! both depend on getting this table exactly right.
//!
//! A mode is a plain tag applied on top of any operand shape, see
//! [`MemoryOp`](super::memory::MemoryOp).

use serde::{Deserialize, Serialize};

use crate::cpu::registers::RegIndex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressingMode {
    #[default]
    Offset,
    PreIndex,
    PostIndex,
}

/// When the updated base is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBackTiming {
    None,
    WithAccess,
    AfterAccess,
}

/// Result of applying an addressing mode to a base value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveAddress {
    /// Address used for the data access.
    pub access: u32,

    /// Value to write back to the base register, if any.
    pub write_back: Option<u32>,
}

impl AddressingMode {
    #[must_use]
    pub const fn resolve(self, base: u32, displacement: u32) -> EffectiveAddress {
        let offset_address = base.wrapping_add(displacement);
        match self {
            Self::Offset => EffectiveAddress {
                access: offset_address,
                write_back: None,
            },
            Self::PreIndex => EffectiveAddress {
                access: offset_address,
                write_back: Some(offset_address),
            },
            Self::PostIndex => EffectiveAddress {
                access: base,
                write_back: Some(offset_address),
            },
        }
    }

    #[must_use]
    pub const fn write_back_timing(self) -> WriteBackTiming {
        match self {
            Self::Offset => WriteBackTiming::None,
            Self::PreIndex => WriteBackTiming::WithAccess,
            Self::PostIndex => WriteBackTiming::AfterAccess,
        }
    }

    #[must_use]
    pub const fn writes_back(self) -> bool {
        !matches!(self, Self::Offset)
    }

    /// Bracketed address operand, `offset` already rendered.
    #[must_use]
    pub fn render(self, base: RegIndex, offset: &str) -> String {
        match self {
            Self::Offset => format!("[{base}, {offset}]"),
            Self::PreIndex => format!("[{base}, {offset}]!"),
            Self::PostIndex => format!("[{base}], {offset}"),
        }
    }
}
