//! The 32-byte data memory block and its checksum.

use core::ops::{Deref, DerefMut};

pub const BLOCK_SIZE: usize = 32;

/// One 32-byte block of data memory, as read from `BlockData()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Block([u8; BLOCK_SIZE]);

impl Block {
    pub const fn new(data: [u8; BLOCK_SIZE]) -> Self {
        Self(data)
    }

    /// Returns the checksum the gauge expects in `BlockDataChecksum()` for this block.
    pub fn checksum(&self) -> u8 {
        checksum(&self.0)
    }

    /// Reads a big-endian word at `offset`.
    pub fn read_u16_be(&self, offset: u8) -> u16 {
        let offset = offset as usize;
        u16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    /// Writes `value` big-endian at `offset`. Data memory is big-endian, unlike
    /// the standard commands.
    pub fn write_u16_be(&mut self, offset: u8, value: u16) {
        let offset = offset as usize;
        self.0[offset..offset + 2].copy_from_slice(&encode_capacity(value));
    }
}

impl Default for Block {
    fn default() -> Self {
        Self([0; BLOCK_SIZE])
    }
}

impl Deref for Block {
    type Target = [u8; BLOCK_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Ones-complement of the 8-bit sum of `data`.
///
/// ```rust
/// # use bq27441::checksum;
/// assert_eq!(checksum(&[0; 32]), 0xFF);
/// assert_eq!(checksum(&[0x09, 0xC4]), 0x32);
/// assert_eq!(checksum(&[0xFF, 0x01]), 0xFF);
/// ```
pub fn checksum(data: &[u8]) -> u8 {
    !data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Splits a capacity in mAh into the (high, low) bytes stored in data memory.
///
/// ```rust
/// # use bq27441::encode_capacity;
/// assert_eq!(encode_capacity(2500), [0x09, 0xC4]);
/// assert_eq!(encode_capacity(0x0100), [0x01, 0x00]);
/// ```
#[inline]
pub fn encode_capacity(capacity: u16) -> [u8; 2] {
    capacity.to_be_bytes()
}

/// Inverse of [`encode_capacity`].
///
/// ```rust
/// # use bq27441::decode_capacity;
/// assert_eq!(decode_capacity([0x09, 0xC4]), 2500);
/// ```
#[inline]
pub fn decode_capacity(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capacity_round_trips_over_valid_range() {
        for capacity in 1..=u16::MAX {
            assert_eq!(decode_capacity(encode_capacity(capacity)), capacity);
        }
    }

    #[test]
    fn checksum_matches_reference_formula() {
        let mut block = Block::default();
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(37).wrapping_add(11);
        }

        let sum: u32 = block.iter().map(|b| *b as u32).sum();
        let expected = ((0xFF - (sum % 256)) % 256) as u8;

        assert_eq!(block.checksum(), expected);
    }

    #[test]
    fn flipping_any_byte_changes_checksum() {
        let mut block = Block::new([0x5A; BLOCK_SIZE]);
        let original = block.checksum();

        for i in 0..BLOCK_SIZE {
            for bit in 0..8 {
                block[i] ^= 1 << bit;
                assert_ne!(block.checksum(), original, "byte {i} bit {bit}");
                block[i] ^= 1 << bit;
            }
        }
    }

    #[test]
    fn capacity_edit_on_empty_block() {
        let mut block = Block::default();
        block.write_u16_be(0x0A, 2500);

        assert_eq!(block[0x0A], 0x09);
        assert_eq!(block[0x0B], 0xC4);
        assert_eq!(block.read_u16_be(0x0A), 2500);
        assert_eq!(block.checksum(), !(0x09u8 + 0xC4));
        assert_eq!(block.checksum(), 0x32);
    }
}
