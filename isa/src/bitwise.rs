use std::ops::RangeInclusive;

/// Contains some helper methods to manipulate bits of a 32-bit word,
/// the index (`bit_idx`) is supposed to be from lsb to msb (right to left)
pub trait Bits: Copy {
    fn raw(self) -> u32;

    fn from_raw(raw: u32) -> Self;

    fn is_bit_on(self, bit_idx: u8) -> bool {
        debug_assert!(bit_idx < 32);
        (self.raw() & (1 << bit_idx)) != 0
    }

    fn get_bit(self, bit_idx: u8) -> bool {
        self.is_bit_on(bit_idx)
    }

    fn set_bit(&mut self, bit_idx: u8, value: bool) {
        debug_assert!(bit_idx < 32);
        let mask = 1 << bit_idx;
        let raw = if value {
            self.raw() | mask
        } else {
            self.raw() & !mask
        };
        *self = Self::from_raw(raw);
    }

    fn get_bits(self, bits_range: RangeInclusive<u8>) -> u32 {
        let start = *bits_range.start();
        let length = bits_range.len() as u32;
        debug_assert!(u32::from(start) + length <= 32);

        // `length` ones, moved up to `start`.
        let mask = if length == 32 {
            u32::MAX
        } else {
            ((1_u32 << length) - 1) << start
        };

        (self.raw() & mask) >> start
    }

    fn set_bits(&mut self, bits_range: RangeInclusive<u8>, value: u32) {
        let start = *bits_range.start();
        let length = bits_range.len() as u32;
        let field = if length == 32 {
            u32::MAX
        } else {
            (1_u32 << length) - 1
        };
        let raw = (self.raw() & !(field << start)) | ((value & field) << start);
        *self = Self::from_raw(raw);
    }
}

impl Bits for u32 {
    fn raw(self) -> u32 {
        self
    }

    fn from_raw(raw: u32) -> Self {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_is_on() {
        let b = 0b1010_u32;
        assert!(b.is_bit_on(1));
        assert!(b.is_bit_on(3));
        assert!(!b.is_bit_on(0));
    }

    #[test]
    fn set_bit() {
        let mut b = 0_u32;
        b.set_bit(31, true);
        assert_eq!(b, 0x8000_0000);
        b.set_bit(0, true);
        assert_eq!(b, 0x8000_0001);
        b.set_bit(31, false);
        assert_eq!(b, 1);
    }

    #[test]
    fn get_bits() {
        let b = 0b1111_0000_1010_u32;
        assert_eq!(b.get_bits(0..=3), 0b1010);
        assert_eq!(b.get_bits(8..=11), 0b1111);
        assert_eq!(0xDEAD_BEEF_u32.get_bits(0..=31), 0xDEAD_BEEF);
    }

    #[test]
    fn set_bits() {
        let mut b = 0xFFFF_FFFF_u32;
        b.set_bits(0..=4, 0b10011);
        assert_eq!(b, 0xFFFF_FFF3);
        b.set_bits(28..=31, 0);
        assert_eq!(b, 0x0FFF_FFF3);
    }
}
