//! # Address resolution
//!
//! The access address of a transfer is derived from a base register and an
//! offset, which is either an immediate embedded in the instruction or an
//! index register run through the barrel shifter:
//!
//! ```text
//!   displacement = U ? +offset : -offset
//!   offset       = imm
//!                | shift(Rm, kind, amount)
//! ```
//!
//! Everything here is pure: the decode stage already validated immediates
//! and no faults can occur. How the displacement combines with the base is
//! decided by the [`AddressingMode`].

use serde::{Deserialize, Serialize};

use crate::cpu::registers::RegIndex;
use crate::cpu::shifter::{ShiftKind, Shifter};
use crate::inst::mode::{AddressingMode, EffectiveAddress};

/// Direction the offset is applied in (the U bit).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Offsetting {
    /// Substract the offset from base.
    Down,

    /// Add the offset to base.
    #[default]
    Up,
}

impl From<bool> for Offsetting {
    fn from(state: bool) -> Self {
        if state { Self::Up } else { Self::Down }
    }
}

/// The offset part of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Offset {
    Immediate(i32),
    Register {
        shift_amount: u32,
        shift_kind: ShiftKind,
        index: RegIndex,
    },
}

impl Default for Offset {
    fn default() -> Self {
        Self::Immediate(0)
    }
}

impl From<i32> for Offset {
    fn from(imm: i32) -> Self {
        Self::Immediate(imm)
    }
}

impl Offset {
    /// Register offset with no shift applied.
    #[must_use]
    pub const fn register(index: RegIndex) -> Self {
        Self::Register {
            shift_amount: 0,
            shift_kind: ShiftKind::Lsl,
            index,
        }
    }

    #[must_use]
    pub const fn index_register(&self) -> Option<RegIndex> {
        match self {
            Self::Immediate(_) => None,
            Self::Register { index, .. } => Some(*index),
        }
    }

    /// Assembly form of the offset, `U` applied.
    #[must_use]
    pub fn render(&self, offsetting: Offsetting) -> String {
        match *self {
            Self::Immediate(imm) => {
                let imm = match offsetting {
                    Offsetting::Up => i64::from(imm),
                    Offsetting::Down => -i64::from(imm),
                };
                format!("#{imm}")
            }
            Self::Register {
                shift_amount,
                shift_kind,
                index,
            } => {
                let sign = match offsetting {
                    Offsetting::Up => "",
                    Offsetting::Down => "-",
                };
                let shift = match (shift_kind, shift_amount) {
                    (ShiftKind::Lsl, 0) => String::new(),
                    (ShiftKind::Lsr | ShiftKind::Asr, 0) => format!(", {shift_kind} #32"),
                    (ShiftKind::Ror, 0) => String::from(", rrx"),
                    (kind, amount) => format!(", {kind} #{amount}"),
                };
                format!("{sign}{index}{shift}")
            }
        }
    }
}

/// Base register, offset and addressing mode of a transfer.
///
/// The offset type is a parameter so that transfers restricted to
/// immediate offsets (the exclusive ones) take an `Address<i32>` and a
/// shifted register cannot even be written down for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address<O = Offset> {
    pub base: RegIndex,
    pub offsetting: Offsetting,
    pub offset: O,
    pub mode: AddressingMode,
}

impl<O> Address<O> {
    pub const fn new(
        base: RegIndex,
        offsetting: Offsetting,
        offset: O,
        mode: AddressingMode,
    ) -> Self {
        Self {
            base,
            offsetting,
            offset,
            mode,
        }
    }
}

impl From<Address<i32>> for Address {
    fn from(a: Address<i32>) -> Self {
        Self {
            base: a.base,
            offsetting: a.offsetting,
            offset: Offset::Immediate(a.offset),
            mode: a.mode,
        }
    }
}

/// Computes displacements and effective addresses.
pub struct AddressResolver<'a, S: Shifter + ?Sized> {
    shifter: &'a S,
}

impl<'a, S: Shifter + ?Sized> AddressResolver<'a, S> {
    pub const fn new(shifter: &'a S) -> Self {
        Self { shifter }
    }

    /// The signed displacement added to the base, as a wrapping 32-bit value.
    ///
    /// `read_reg` is only called for register offsets; `carry` is the C flag
    /// and only matters for `RRX`.
    pub fn displacement<F>(
        &self,
        offsetting: Offsetting,
        offset: &Offset,
        read_reg: F,
        carry: bool,
    ) -> u32
    where
        F: Fn(RegIndex) -> u32,
    {
        let magnitude = match *offset {
            #[allow(clippy::cast_sign_loss)]
            Offset::Immediate(imm) => imm as u32,
            Offset::Register {
                shift_amount,
                shift_kind,
                index,
            } => self
                .shifter
                .shift(read_reg(index), shift_kind, shift_amount, carry),
        };

        match offsetting {
            Offsetting::Up => magnitude,
            Offsetting::Down => magnitude.wrapping_neg(),
        }
    }

    /// Access address and write-back value of `address` for the given base value.
    pub fn resolve<F>(
        &self,
        base_value: u32,
        address: &Address,
        read_reg: F,
        carry: bool,
    ) -> EffectiveAddress
    where
        F: Fn(RegIndex) -> u32,
    {
        let displacement = self.displacement(address.offsetting, &address.offset, read_reg, carry);
        address.mode.resolve(base_value, displacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::shifter::BarrelShifter;
    use pretty_assertions::assert_eq;
    use rand::Rng;

    fn no_regs(_: RegIndex) -> u32 {
        unreachable!("immediate offsets do not read registers")
    }

    #[test]
    fn immediate_displacement() {
        let resolver = AddressResolver::new(&BarrelShifter);
        let up = resolver.displacement(Offsetting::Up, &Offset::Immediate(8), no_regs, false);
        let down = resolver.displacement(Offsetting::Down, &Offset::Immediate(8), no_regs, false);
        assert_eq!(up, 8);
        assert_eq!(down, 8_u32.wrapping_neg());
        assert_eq!(0x1000_u32.wrapping_add(down), 0xFF8);
    }

    #[test]
    fn immediate_displacement_matches_sign() {
        let resolver = AddressResolver::new(&BarrelShifter);
        let mut rng = rand::rng();
        for _ in 0..256 {
            let imm: i32 = rng.random_range(-4095..=4095);
            let base: u32 = rng.random();
            let add: bool = rng.random();
            let disp = resolver.displacement(add.into(), &Offset::Immediate(imm), no_regs, false);
            let expected = if add {
                i64::from(imm)
            } else {
                -i64::from(imm)
            };
            #[allow(clippy::cast_possible_truncation)]
            let expected = (i64::from(base) + expected) as u32;
            assert_eq!(base.wrapping_add(disp), expected);
        }
    }

    struct RecordingShifter(std::cell::Cell<Option<(u32, ShiftKind, u32, bool)>>);

    impl Shifter for RecordingShifter {
        fn shift(&self, value: u32, kind: ShiftKind, amount: u32, carry: bool) -> u32 {
            self.0.set(Some((value, kind, amount, carry)));
            0x40
        }
    }

    #[test]
    fn register_displacement_passes_shift_through() {
        let shifter = RecordingShifter(std::cell::Cell::new(None));
        let resolver = AddressResolver::new(&shifter);
        let offset = Offset::Register {
            shift_amount: 3,
            shift_kind: ShiftKind::Asr,
            index: RegIndex::new(2),
        };
        let read = |r: RegIndex| {
            assert_eq!(r, RegIndex::new(2));
            0x1234
        };

        let disp = resolver.displacement(Offsetting::Down, &offset, read, true);

        assert_eq!(shifter.0.get(), Some((0x1234, ShiftKind::Asr, 3, true)));
        assert_eq!(disp, 0x40_u32.wrapping_neg());
    }

    #[test]
    fn register_displacement_with_barrel_shifter() {
        let resolver = AddressResolver::new(&BarrelShifter);
        let offset = Offset::Register {
            shift_amount: 2,
            shift_kind: ShiftKind::Lsl,
            index: RegIndex::new(1),
        };
        let disp = resolver.displacement(Offsetting::Up, &offset, |_| 3, false);
        assert_eq!(disp, 12);
    }

    #[test]
    fn render_immediate() {
        assert_eq!(Offset::Immediate(8).render(Offsetting::Up), "#8");
        assert_eq!(Offset::Immediate(8).render(Offsetting::Down), "#-8");
        assert_eq!(Offset::Immediate(0).render(Offsetting::Up), "#0");
    }

    #[test]
    fn render_register() {
        let r3 = RegIndex::new(3);
        assert_eq!(Offset::register(r3).render(Offsetting::Up), "r3");
        assert_eq!(Offset::register(r3).render(Offsetting::Down), "-r3");

        let shifted = |shift_kind, shift_amount| Offset::Register {
            shift_amount,
            shift_kind,
            index: r3,
        };
        let cases = [
            (ShiftKind::Lsl, 2, Offsetting::Up, "r3, lsl #2"),
            (ShiftKind::Lsr, 0, Offsetting::Up, "r3, lsr #32"),
            (ShiftKind::Asr, 0, Offsetting::Down, "-r3, asr #32"),
            (ShiftKind::Ror, 0, Offsetting::Up, "r3, rrx"),
            (ShiftKind::Ror, 8, Offsetting::Up, "r3, ror #8"),
        ];
        for (kind, amount, offsetting, text) in cases {
            assert_eq!(shifted(kind, amount).render(offsetting), text);
        }
    }
}
