//! Bit-level I/O shared by the time and value codecs
//!
//! Bits are packed most significant first. The writer stages up to 64 bits
//! in a register and spills whole bytes; the reader addresses the input by
//! absolute bit offset.

use crate::{KestrelError, Result};

/// MSB-first bit packer
#[derive(Debug, Default)]
pub struct BitWriter {
    out: Vec<u8>,
    /// Staged bits, right-aligned
    acc: u64,
    /// Number of valid bits in `acc` (always < 8 between calls)
    staged: u32,
}

impl BitWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            acc: 0,
            staged: 0,
        }
    }

    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.acc = (self.acc << 1) | u64::from(bit);
        self.staged += 1;
        if self.staged == 8 {
            self.out.push(self.acc as u8);
            self.acc = 0;
            self.staged = 0;
        }
    }

    /// Append the low `num_bits` bits of `value`
    #[inline]
    pub fn write_bits(&mut self, value: u64, num_bits: usize) {
        debug_assert!(num_bits <= 64);
        if num_bits == 0 {
            return;
        }

        // split so the register never holds more than 64 bits
        let mut remaining = num_bits as u32;
        while remaining > 0 {
            let take = remaining.min(56);
            remaining -= take;
            let chunk = (value >> remaining) & low_mask(take);

            self.acc = (self.acc << take) | chunk;
            self.staged += take;
            while self.staged >= 8 {
                self.staged -= 8;
                self.out.push((self.acc >> self.staged) as u8);
            }
            self.acc &= low_mask(self.staged);
        }
    }

    /// Pad the last partial byte with zeros and return the bytes
    pub fn finish(mut self) -> Vec<u8> {
        if self.staged > 0 {
            self.out.push((self.acc << (8 - self.staged)) as u8);
        }
        self.out
    }

    pub fn bit_len(&self) -> usize {
        self.out.len() * 8 + self.staged as usize
    }
}

#[inline]
fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// MSB-first bit cursor over a byte slice
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Offset of the next unread bit
    cursor: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    #[inline]
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = self.byte_at(self.cursor / 8)?;
        let bit = (byte >> (7 - self.cursor % 8)) & 1 == 1;
        self.cursor += 1;
        Ok(bit)
    }

    /// Read `num_bits` bits as the low bits of a u64
    #[inline]
    pub fn read_bits(&mut self, num_bits: usize) -> Result<u64> {
        debug_assert!(num_bits <= 64);
        if self.cursor + num_bits > self.data.len() * 8 {
            return Err(end_of_stream());
        }

        let mut value = 0u64;
        let mut remaining = num_bits;
        while remaining > 0 {
            let offset = self.cursor % 8;
            let available = 8 - offset;
            let take = available.min(remaining);

            let byte = u64::from(self.byte_at(self.cursor / 8)?);
            let bits = (byte >> (available - take)) & low_mask(take as u32);
            value = (value << take) | bits;

            self.cursor += take;
            remaining -= take;
        }
        Ok(value)
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    fn byte_at(&self, index: usize) -> Result<u8> {
        self.data.get(index).copied().ok_or_else(end_of_stream)
    }
}

fn end_of_stream() -> KestrelError {
    KestrelError::Codec("unexpected end of bit stream".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_packs_msb_first() {
        let mut writer = BitWriter::default();
        writer.write_bits(0b101, 3);
        writer.write_bits(0b11, 2);
        assert_eq!(writer.bit_len(), 5);
        // 10111 padded with zeros
        assert_eq!(writer.finish(), vec![0b1011_1000]);

        let mut writer = BitWriter::with_capacity(2);
        writer.write_bit(true);
        writer.write_bits(0xAB, 8);
        assert_eq!(writer.finish(), vec![0b1101_0101, 0b1000_0000]);
    }

    #[test]
    fn test_mixed_widths_random() {
        let mut rng = rand::thread_rng();
        let fields: Vec<(u64, usize)> = (0..2000)
            .map(|_| {
                let width = rng.gen_range(0..=64usize);
                (rng.gen::<u64>() & low_mask(width as u32), width)
            })
            .collect();

        let mut writer = BitWriter::with_capacity(1024);
        for &(value, width) in &fields {
            writer.write_bits(value, width);
        }
        let total: usize = fields.iter().map(|(_, w)| w).sum();
        assert_eq!(writer.bit_len(), total);
        let data = writer.finish();
        assert_eq!(data.len(), (total + 7) / 8);

        let mut reader = BitReader::new(&data);
        for &(value, width) in &fields {
            assert_eq!(reader.read_bits(width).unwrap(), value, "width {}", width);
        }
        assert_eq!(reader.position(), total);
    }

    #[test]
    fn test_full_words_unaligned() {
        let mut writer = BitWriter::default();
        writer.write_bit(false);
        writer.write_bits(u64::MAX, 64);
        writer.write_bits(0x8000_0000_0000_0001, 64);
        let data = writer.finish();

        let mut reader = BitReader::new(&data);
        assert!(!reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(64).unwrap(), u64::MAX);
        assert_eq!(reader.read_bits(64).unwrap(), 0x8000_0000_0000_0001);
    }

    #[test]
    fn test_reader_stops_at_end() {
        let mut reader = BitReader::new(&[0xF0]);
        assert_eq!(reader.read_bits(4).unwrap(), 0xF);
        assert!(matches!(reader.read_bits(8), Err(KestrelError::Codec(_))));
        // a failed read does not move the cursor
        assert_eq!(reader.position(), 4);
        assert_eq!(reader.read_bits(4).unwrap(), 0);
        assert!(reader.read_bit().is_err());
    }
}
