//! XOR float codec (Gorilla)
//!
//! Each value is XORed with its predecessor. An identical value costs one
//! bit; otherwise the meaningful bits are stored either inside the previous
//! leading/trailing zero window or behind a fresh 5-bit leading count and
//! 6-bit length.

use super::bitstream::{BitReader, BitWriter};
use super::{read_count, Decoder, Encoder};
use crate::{KestrelError, Result, Value};

/// Largest leading-zero count representable in the 5-bit field
const MAX_LEADING: u32 = 31;

/// Window marker meaning "no window established yet"
const NO_WINDOW: u32 = u32::MAX;

pub struct FloatEncoder {
    writer: BitWriter,
    count: u32,
    prev_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl FloatEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writer: BitWriter::with_capacity(capacity),
            count: 0,
            prev_bits: 0,
            prev_leading: NO_WINDOW,
            prev_trailing: 0,
        }
    }

    pub fn push(&mut self, value: f64) -> Result<()> {
        if self.count == u32::MAX {
            return Err(KestrelError::Codec("too many values in one segment".into()));
        }

        let bits = value.to_bits();
        if self.count == 0 {
            self.writer.write_bits(bits, 64);
        } else {
            self.write_xor(bits ^ self.prev_bits);
        }

        self.prev_bits = bits;
        self.count += 1;
        Ok(())
    }

    fn write_xor(&mut self, xor: u64) {
        if xor == 0 {
            self.writer.write_bit(false);
            return;
        }
        self.writer.write_bit(true);

        let leading = xor.leading_zeros().min(MAX_LEADING);
        let trailing = xor.trailing_zeros();

        if self.prev_leading != NO_WINDOW
            && leading >= self.prev_leading
            && trailing >= self.prev_trailing
        {
            self.writer.write_bit(false);
            let meaningful = 64 - self.prev_leading - self.prev_trailing;
            self.writer
                .write_bits(xor >> self.prev_trailing, meaningful as usize);
        } else {
            self.writer.write_bit(true);
            let meaningful = 64 - leading - trailing;
            self.writer.write_bits(u64::from(leading), 5);
            // 64 does not fit in six bits and is stored as 0
            self.writer.write_bits(u64::from(meaningful & 0x3F), 6);
            self.writer.write_bits(xor >> trailing, meaningful as usize);

            self.prev_leading = leading;
            self.prev_trailing = trailing;
        }
    }
}

impl Encoder for FloatEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Float(v) => self.push(*v),
            other => Err(KestrelError::Codec(format!(
                "float encoder cannot store {} value",
                other.value_type()
            ))),
        }
    }

    fn len(&self) -> usize {
        self.count as usize
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        let bits = self.writer.finish();
        let mut out = Vec::with_capacity(4 + bits.len());
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&bits);
        Ok(out)
    }
}

pub struct FloatDecoder<'a> {
    reader: BitReader<'a>,
    remaining: u32,
    started: bool,
    prev_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl<'a> FloatDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let (remaining, body) = read_count(data)?;
        Ok(Self {
            reader: BitReader::new(body),
            remaining,
            started: false,
            prev_bits: 0,
            prev_leading: NO_WINDOW,
            prev_trailing: 0,
        })
    }

    pub fn next_f64(&mut self) -> Result<Option<f64>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        if !self.started {
            self.started = true;
            self.prev_bits = self.reader.read_bits(64)?;
            return Ok(Some(f64::from_bits(self.prev_bits)));
        }

        if self.reader.read_bit()? {
            let xor = if !self.reader.read_bit()? {
                if self.prev_leading == NO_WINDOW {
                    return Err(KestrelError::Codec(
                        "float stream reuses a window before defining one".into(),
                    ));
                }
                let meaningful = 64 - self.prev_leading - self.prev_trailing;
                self.reader.read_bits(meaningful as usize)? << self.prev_trailing
            } else {
                let leading = self.reader.read_bits(5)? as u32;
                let meaningful = match self.reader.read_bits(6)? as u32 {
                    0 => 64,
                    n => n,
                };
                if leading + meaningful > 64 {
                    return Err(KestrelError::Codec(format!(
                        "invalid float window: {} leading, {} meaningful",
                        leading, meaningful
                    )));
                }
                let trailing = 64 - leading - meaningful;
                self.prev_leading = leading;
                self.prev_trailing = trailing;
                self.reader.read_bits(meaningful as usize)? << trailing
            };
            self.prev_bits ^= xor;
        }

        Ok(Some(f64::from_bits(self.prev_bits)))
    }
}

impl Decoder for FloatDecoder<'_> {
    fn next_value(&mut self) -> Result<Option<Value>> {
        Ok(self.next_f64()?.map(Value::Float))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn roundtrip(values: &[f64]) -> (Vec<f64>, usize) {
        let mut encoder = Box::new(FloatEncoder::with_capacity(64));
        for v in values {
            encoder.push(*v).unwrap();
        }
        let data = encoder.finish().unwrap();

        let mut decoder = FloatDecoder::new(&data).unwrap();
        let mut out = Vec::new();
        while let Some(v) = decoder.next_f64().unwrap() {
            out.push(v);
        }
        (out, data.len())
    }

    fn assert_bits_eq(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_constant_values() {
        let values = vec![23.5; 100];
        let (out, len) = roundtrip(&values);
        assert_bits_eq(&out, &values);
        // first value in full, then one bit each
        assert!(len <= 4 + 8 + 13);
    }

    #[test]
    fn test_varying_values() {
        let values: Vec<f64> = (0..1000)
            .map(|i| 20.0 + (i as f64 * 0.1).sin() * 5.0)
            .collect();
        let (out, _) = roundtrip(&values);
        assert_bits_eq(&out, &values);
    }

    #[test]
    fn test_special_values() {
        let values = vec![
            0.0,
            -0.0,
            1.0,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NAN,
            1.0,
            f64::from_bits(1),
            f64::from_bits(u64::MAX),
        ];
        let (out, _) = roundtrip(&values);
        assert_bits_eq(&out, &values);
    }

    #[test]
    fn test_random_bits() {
        let mut rng = rand::thread_rng();
        let values: Vec<f64> = (0..500).map(|_| f64::from_bits(rng.gen())).collect();
        let (out, _) = roundtrip(&values);
        assert_bits_eq(&out, &values);
    }

    #[test]
    fn test_rejects_other_types() {
        let mut encoder = FloatEncoder::with_capacity(8);
        assert!(encoder.write(&Value::Int(1)).is_err());
        assert!(encoder.write(&Value::Float(1.0)).is_ok());
    }
}
