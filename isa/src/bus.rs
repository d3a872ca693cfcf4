//! Sparse little-endian memory seen by the reference thread.
//!
//! Bytes that were never written read as zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bus {
    memory: BTreeMap<u32, u8>,
}

impl Bus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn read_byte(&self, address: u32) -> u8 {
        self.memory.get(&address).copied().unwrap_or_default()
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        self.memory.insert(address, value);
    }

    #[must_use]
    pub fn read_word(&self, address: u32) -> u32 {
        if address & 3 != 0 {
            tracing::warn!("read_word has address 0x{address:08X} not word aligned");
        }

        let part_0 = u32::from(self.read_byte(address));
        let part_1 = u32::from(self.read_byte(address.wrapping_add(1)));
        let part_2 = u32::from(self.read_byte(address.wrapping_add(2)));
        let part_3 = u32::from(self.read_byte(address.wrapping_add(3)));

        part_3 << 24_u32 | part_2 << 16_u32 | part_1 << 8_u32 | part_0
    }

    pub fn write_word(&mut self, address: u32, value: u32) {
        if address & 3 != 0 {
            tracing::warn!("write_word has address 0x{address:08X} not word aligned");
        }

        for (i, range) in [0..=7, 8..=15, 16..=23, 24..=31].into_iter().enumerate() {
            let part = value.get_bits(range) as u8;
            self.write_byte(address.wrapping_add(i as u32), part);
        }
    }

    /// Writes consecutive words starting at `address`.
    pub fn load_words(&mut self, address: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            self.write_word(address.wrapping_add(4 * i as u32), *word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unwritten_memory_reads_zero() {
        let bus = Bus::new();
        assert_eq!(bus.read_word(0x0300_0000), 0);
        assert_eq!(bus.read_byte(0xFFFF_FFFF), 0);
    }

    #[test]
    fn words_are_little_endian() {
        let mut bus = Bus::new();
        bus.write_word(0x100, 0x1234_5678);
        assert_eq!(bus.read_byte(0x100), 0x78);
        assert_eq!(bus.read_byte(0x101), 0x56);
        assert_eq!(bus.read_byte(0x102), 0x34);
        assert_eq!(bus.read_byte(0x103), 0x12);
        assert_eq!(bus.read_word(0x100), 0x1234_5678);
    }

    #[test]
    fn bytes_build_words() {
        let mut bus = Bus::new();
        bus.write_byte(0x200, 0xEF);
        bus.write_byte(0x201, 0xBE);
        bus.write_byte(0x202, 0xAD);
        bus.write_byte(0x203, 0xDE);
        assert_eq!(bus.read_word(0x200), 0xDEAD_BEEF);
    }

    #[test]
    fn load_consecutive_words() {
        let mut bus = Bus::new();
        bus.load_words(0x1000, &[1, 2, 3]);
        assert_eq!(bus.read_word(0x1000), 1);
        assert_eq!(bus.read_word(0x1004), 2);
        assert_eq!(bus.read_word(0x1008), 3);
    }
}
