//! Delta-of-delta codec for timestamps and integer values

use super::bitstream::{BitReader, BitWriter};
use super::{read_count, Decoder, Encoder};
use crate::{KestrelError, Result, Value};

/// Delta-of-delta encoder over `i64`
///
/// Output is a big-endian `u32` count followed by the bit stream. The first
/// value is written in full; every later value stores the change of its
/// delta in one of five variable-width buckets.
#[derive(Debug)]
pub struct DeltaEncoder {
    writer: BitWriter,
    count: u32,
    prev: i64,
    prev_delta: i64,
}

impl DeltaEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writer: BitWriter::with_capacity(capacity),
            count: 0,
            prev: 0,
            prev_delta: 0,
        }
    }

    /// Append one value
    pub fn push(&mut self, value: i64) -> Result<()> {
        if self.count == u32::MAX {
            return Err(KestrelError::Codec("too many values in one segment".into()));
        }

        if self.count == 0 {
            self.writer.write_bits(value as u64, 64);
        } else {
            let delta = value.wrapping_sub(self.prev);
            let dod = delta.wrapping_sub(self.prev_delta);

            if dod == 0 {
                self.writer.write_bit(false);
            } else if (-63..=64).contains(&dod) {
                self.writer.write_bits(0b10, 2);
                self.writer.write_bits((dod + 63) as u64, 7);
            } else if (-255..=256).contains(&dod) {
                self.writer.write_bits(0b110, 3);
                self.writer.write_bits((dod + 255) as u64, 9);
            } else if (-2047..=2048).contains(&dod) {
                self.writer.write_bits(0b1110, 4);
                self.writer.write_bits((dod + 2047) as u64, 12);
            } else {
                self.writer.write_bits(0b1111, 4);
                self.writer.write_bits(dod as u64, 64);
            }
            self.prev_delta = delta;
        }

        self.prev = value;
        self.count += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(self) -> Vec<u8> {
        let bits = self.writer.finish();
        let mut out = Vec::with_capacity(4 + bits.len());
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&bits);
        out
    }
}

/// Decoder for `DeltaEncoder` output
#[derive(Debug)]
pub struct DeltaDecoder<'a> {
    reader: BitReader<'a>,
    remaining: u32,
    started: bool,
    prev: i64,
    prev_delta: i64,
}

impl<'a> DeltaDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let (remaining, body) = read_count(data)?;
        Ok(Self {
            reader: BitReader::new(body),
            remaining,
            started: false,
            prev: 0,
            prev_delta: 0,
        })
    }

    /// Next value, `None` once the recorded count is exhausted
    pub fn next_i64(&mut self) -> Result<Option<i64>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        if !self.started {
            self.started = true;
            self.prev = self.reader.read_bits(64)? as i64;
            return Ok(Some(self.prev));
        }

        let dod = if !self.reader.read_bit()? {
            0
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(7)? as i64 - 63
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(9)? as i64 - 255
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(12)? as i64 - 2047
        } else {
            self.reader.read_bits(64)? as i64
        };

        let delta = self.prev_delta.wrapping_add(dod);
        self.prev = self.prev.wrapping_add(delta);
        self.prev_delta = delta;
        Ok(Some(self.prev))
    }
}

/// `Encoder` adapter storing integer values through `DeltaEncoder`
pub struct IntEncoder(DeltaEncoder);

impl IntEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(DeltaEncoder::with_capacity(capacity))
    }
}

impl Encoder for IntEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Int(v) => self.0.push(*v),
            other => Err(KestrelError::Codec(format!(
                "int encoder cannot store {} value",
                other.value_type()
            ))),
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.0.finish())
    }
}

pub struct IntDecoder<'a>(DeltaDecoder<'a>);

impl<'a> IntDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        Ok(Self(DeltaDecoder::new(data)?))
    }
}

impl Decoder for IntDecoder<'_> {
    fn next_value(&mut self) -> Result<Option<Value>> {
        Ok(self.0.next_i64()?.map(Value::Int))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn roundtrip(values: &[i64]) -> Vec<i64> {
        let mut encoder = DeltaEncoder::with_capacity(64);
        for v in values {
            encoder.push(*v).unwrap();
        }
        let data = encoder.finish();

        let mut decoder = DeltaDecoder::new(&data).unwrap();
        let mut out = Vec::new();
        while let Some(v) = decoder.next_i64().unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_regular_interval_is_compact() {
        let values: Vec<i64> = (0..1000).map(|i| 1_600_000_000 + i * 10).collect();

        let mut encoder = DeltaEncoder::with_capacity(64);
        for v in &values {
            encoder.push(*v).unwrap();
        }
        let data = encoder.finish();
        // header, first value, one delta bucket, then one bit per value
        assert!(data.len() < 4 + 8 + 2 + 1000 / 8 + 2, "got {} bytes", data.len());

        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_every_bucket_and_extremes() {
        let values = vec![
            0,
            1,
            70,
            400,
            3000,
            -5000,
            i64::MAX,
            i64::MIN,
            0,
            i64::MIN,
            -1,
        ];
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_random_values() {
        let mut rng = rand::thread_rng();
        let values: Vec<i64> = (0..500).map(|_| rng.gen_range(-1_000_000..1_000_000)).collect();
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_empty_and_truncated() {
        assert!(roundtrip(&[]).is_empty());

        let mut encoder = DeltaEncoder::with_capacity(8);
        encoder.push(5).unwrap();
        encoder.push(1_000_000).unwrap();
        let data = encoder.finish();

        let mut decoder = DeltaDecoder::new(&data[..data.len() - 2]).unwrap();
        assert_eq!(decoder.next_i64().unwrap(), Some(5));
        assert!(decoder.next_i64().is_err());

        assert!(DeltaDecoder::new(&[0, 0]).is_err());
    }

    #[test]
    fn test_int_encoder_rejects_other_types() {
        let mut encoder: Box<dyn Encoder> = Box::new(IntEncoder::with_capacity(8));
        encoder.write(&Value::Int(3)).unwrap();
        assert!(encoder.write(&Value::Float(1.0)).is_err());
        assert_eq!(encoder.len(), 1);
    }
}
