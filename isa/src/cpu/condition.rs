//! # Predicates
//!
//! Every instruction handled here is predicated: the top 4 bits of the
//! machine word hold a condition that is tested against the N, Z, C and V
//! flags of the CPSR before the instruction is allowed to change any state.
//!
//! ```text
//! ┌───────┬────────┬─────────────────────┬─────────────────────────────────┐
//! │ Code  │ Suffix │     Meaning         │          Flags Tested           │
//! ├───────┼────────┼─────────────────────┼─────────────────────────────────┤
//! │ 0000  │   EQ   │ Equal               │ Z=1                             │
//! │ 0001  │   NE   │ Not equal           │ Z=0                             │
//! │ 0010  │   CS   │ Carry set / ≥ (uns) │ C=1                             │
//! │ 0011  │   CC   │ Carry clear / < (u) │ C=0                             │
//! │ 0100  │   MI   │ Minus / negative    │ N=1                             │
//! │ 0101  │   PL   │ Plus / non-negative │ N=0                             │
//! │ 0110  │   VS   │ Overflow set        │ V=1                             │
//! │ 0111  │   VC   │ Overflow clear      │ V=0                             │
//! │ 1000  │   HI   │ Higher (unsigned)   │ C=1 AND Z=0                     │
//! │ 1001  │   LS   │ Lower/same (unsig)  │ C=0 OR Z=1                      │
//! │ 1010  │   GE   │ ≥ (signed)          │ N=V                             │
//! │ 1011  │   LT   │ < (signed)          │ N≠V                             │
//! │ 1100  │   GT   │ > (signed)          │ Z=0 AND N=V                     │
//! │ 1101  │   LE   │ ≤ (signed)          │ Z=1 OR N≠V                      │
//! │ 1110  │   AL   │ Always              │ (unconditional)                 │
//! │ 1111  │   NV   │ Never (reserved)    │ (unconditional space)           │
//! └───────┴────────┴─────────────────────┴─────────────────────────────────┘
//! ```
//!
//! A predicated instruction whose condition fails still occupies its slot:
//! the program counter moves past it exactly as if it had executed.
//! Evaluation lives in [`Psr::can_execute`](super::psr::Psr::can_execute).

use serde::{Deserialize, Serialize};

/// Condition attached to an instruction descriptor.
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Condition {
    /// Equal (Z=1)
    EQ = 0x0,

    /// Not equal (Z=0)
    NE = 0x1,

    /// Carry set / unsigned higher or same (C=1)
    CS = 0x2,

    /// Carry clear / unsigned lower (C=0)
    CC = 0x3,

    /// Minus / negative (N=1)
    MI = 0x4,

    /// Plus / positive or zero (N=0)
    PL = 0x5,

    /// Overflow set (V=1)
    VS = 0x6,

    /// Overflow clear (V=0)
    VC = 0x7,

    /// Unsigned higher (C=1 AND Z=0)
    HI = 0x8,

    /// Unsigned lower or same (C=0 OR Z=1)
    LS = 0x9,

    /// Signed greater or equal (N=V)
    GE = 0xA,

    /// Signed less than (N≠V)
    LT = 0xB,

    /// Signed greater than (Z=0 AND N=V)
    GT = 0xC,

    /// Signed less than or equal (Z=1 OR N≠V)
    LE = 0xD,

    /// Always (unconditional). No suffix is printed for it.
    #[default]
    AL = 0xE,

    /// The unconditional instruction space. `RFE` and `SRS` are encoded
    /// here, so for them it behaves like [`Condition::AL`].
    ///
    /// Loads and stores have no encoding in this space: decoding one with
    /// `NV` fails with [`DecodeError::UnconditionalSpace`] and
    /// [`MemoryOp::with_condition`] panics on it.
    ///
    /// [`DecodeError::UnconditionalSpace`]: crate::error::DecodeError::UnconditionalSpace
    /// [`MemoryOp::with_condition`]: crate::inst::memory::MemoryOp::with_condition
    NV = 0xF,
}

impl From<u8> for Condition {
    fn from(item: u8) -> Self {
        match item & 0xF {
            0x0 => Self::EQ,
            0x1 => Self::NE,
            0x2 => Self::CS,
            0x3 => Self::CC,
            0x4 => Self::MI,
            0x5 => Self::PL,
            0x6 => Self::VS,
            0x7 => Self::VC,
            0x8 => Self::HI,
            0x9 => Self::LS,
            0xA => Self::GE,
            0xB => Self::LT,
            0xC => Self::GT,
            0xD => Self::LE,
            0xE => Self::AL,
            _ => Self::NV,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EQ => f.write_str("eq"),
            Self::NE => f.write_str("ne"),
            Self::CS => f.write_str("cs"),
            Self::CC => f.write_str("cc"),
            Self::MI => f.write_str("mi"),
            Self::PL => f.write_str("pl"),
            Self::VS => f.write_str("vs"),
            Self::VC => f.write_str("vc"),
            Self::HI => f.write_str("hi"),
            Self::LS => f.write_str("ls"),
            Self::GE => f.write_str("ge"),
            Self::LT => f.write_str("lt"),
            Self::GT => f.write_str("gt"),
            Self::LE => f.write_str("le"),
            Self::AL | Self::NV => Ok(()),
        }
    }
}
