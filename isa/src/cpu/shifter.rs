//! # Shifted register offsets
//!
//! A register offset is the index register run through the barrel shifter
//! with an immediate amount. The amount field is 5 bits wide, so a few
//! encodings are repurposed:
//!
//! | Encoding | Meaning                                   |
//! |----------|-------------------------------------------|
//! | `LSL #0` | no shift                                  |
//! | `LSR #0` | `LSR #32`: result is 0                    |
//! | `ASR #0` | `ASR #32`: every bit is a copy of bit 31  |
//! | `ROR #0` | `RRX`: rotate right by one through carry  |
//!
//! Address resolution only needs the shifted value, never the shifter
//! carry-out, so [`Shifter::shift`] returns the result alone.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl From<u32> for ShiftKind {
    fn from(op: u32) -> Self {
        match op & 0b11 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

impl std::fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lsl => f.write_str("lsl"),
            Self::Lsr => f.write_str("lsr"),
            Self::Asr => f.write_str("asr"),
            Self::Ror => f.write_str("ror"),
        }
    }
}

/// The shift-operation evaluator consumed by address resolution.
pub trait Shifter {
    /// Shifts `value` by an immediate `amount`. `carry` is the current C
    /// flag, consumed by `RRX`.
    fn shift(&self, value: u32, kind: ShiftKind, amount: u32, carry: bool) -> u32;
}

/// Immediate-amount barrel shifter.
#[derive(Debug, Default, Clone, Copy)]
pub struct BarrelShifter;

impl Shifter for BarrelShifter {
    fn shift(&self, value: u32, kind: ShiftKind, amount: u32, carry: bool) -> u32 {
        match kind {
            ShiftKind::Lsl => match amount {
                0 => value,
                1..=31 => value << amount,
                _ => 0,
            },
            ShiftKind::Lsr => match amount {
                1..=31 => value >> amount,
                // LSR#0 encodes LSR#32
                _ => 0,
            },
            ShiftKind::Asr => match amount {
                1..=31 => ((value as i32) >> amount) as u32,
                // ASR#0 encodes ASR#32
                _ => {
                    if value.get_bit(31) {
                        u32::MAX
                    } else {
                        0
                    }
                }
            },
            ShiftKind::Ror => match amount {
                // ROR#0 encodes RRX
                0 => (u32::from(carry) << 31) | (value >> 1),
                _ => value.rotate_right(amount),
            },
        }
    }
}
