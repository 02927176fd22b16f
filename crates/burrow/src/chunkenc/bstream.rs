//! MSB-first bit stream used by the XOR encoding.

use bitvec::prelude::*;

use crate::error::{Result, StorageError};

/// Bit buffer shared by the XOR writer and reader.
pub(crate) type Bits = BitVec<u8, Msb0>;

/// Appends the low `count` bits of `value`, most significant first.
pub(crate) fn write_bits(output: &mut Bits, value: u64, count: u32) {
    for i in (0..count).rev() {
        output.push((value >> i) & 1 == 1);
    }
}

/// Sequential reader over an owned bit buffer.
///
/// Reads past the end of the buffer return [`StorageError::DecodeError`]
/// rather than panicking, so corrupt chunks surface through the iterator.
#[derive(Debug, Clone)]
pub(crate) struct BitReader {
    data: Bits,
    pos: usize,
}

impl BitReader {
    pub(crate) fn new(data: Bits) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn read_bit(&mut self) -> Result<bool> {
        match self.data.get(self.pos) {
            Some(bit) => {
                self.pos += 1;
                Ok(*bit)
            }
            None => Err(self.eof(1)),
        }
    }

    pub(crate) fn read_bits(&mut self, count: u32) -> Result<u64> {
        let count = count as usize;
        if self.pos + count > self.data.len() {
            return Err(self.eof(count));
        }
        let mut value: u64 = 0;
        for bit in &self.data[self.pos..self.pos + count] {
            value = (value << 1) | u64::from(*bit);
        }
        self.pos += count;
        Ok(value)
    }

    /// Number of bits consumed so far.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    fn eof(&self, wanted: usize) -> StorageError {
        StorageError::DecodeError(format!(
            "unexpected end of bit stream at bit {}: wanted {} more, {} left",
            self.pos,
            wanted,
            self.data.len() - self.pos.min(self.data.len())
        ))
    }
}
