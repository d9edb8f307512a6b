//! Bit cursors for packing runs of bit-field members.
//!
//! Bits are assigned from the least-significant bit of the first byte upward.
//! A run always occupies whole bytes; unused high bits of the last byte stay zero.

use crate::error::Error;
use crate::error::Result;
use crate::types::MAX_BIT_WIDTH;

fn check_width(width: u32) -> Result<()> {
    if width == 0 || width > MAX_BIT_WIDTH {
        return Err(Error::InvalidBitWidth(width));
    }
    Ok(())
}

/// Packs consecutive bit-fields into a fresh run of bytes.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the low `width` bits of `value`.
    ///
    /// # Errors
    /// `ValueOutOfRange` if `value` has bits set above `width`.
    pub fn put(&mut self, value: u64, width: u32) -> Result<()> {
        check_width(width)?;
        if value >> width != 0 {
            return Err(Error::ValueOutOfRange { ty: format!("bits<{}>", width), value });
        }
        for i in 0..width {
            let byte = self.bit / 8;
            if byte == self.bytes.len() {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                self.bytes[byte] |= 1 << (self.bit % 8);
            }
            self.bit += 1;
        }
        Ok(())
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bit
    }

    /// The packed run, `ceil(bit_len / 8)` bytes long.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Unpacks consecutive bit-fields from a run of bytes.
#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, bit: 0 }
    }

    /// Reads the next `width` bits as an unsigned value.
    pub fn take(&mut self, width: u32) -> Result<u64> {
        check_width(width)?;
        let end = self.bit + width as usize;
        if end > self.bytes.len() * 8 {
            return Err(Error::TruncatedMessage {
                needed: end.div_ceil(8),
                available: self.bytes.len(),
            });
        }
        let mut value = 0u64;
        for i in 0..width {
            let bit = (self.bytes[self.bit / 8] >> (self.bit % 8)) & 1;
            value |= (bit as u64) << i;
            self.bit += 1;
        }
        Ok(value)
    }

    /// Number of bits read so far.
    pub fn position(&self) -> usize {
        self.bit
    }
}
