//! Length-prefixed string codec compressed with LZ4

use super::{read_count, Decoder, Encoder};
use crate::{KestrelError, Result, Value};
use bytes::{Buf, BufMut};

/// Buffers `[u32 len][utf8]` records and LZ4-compresses them on finish
pub struct StringEncoder {
    raw: Vec<u8>,
    count: u32,
}

impl StringEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: Vec::with_capacity(capacity),
            count: 0,
        }
    }

    pub fn push(&mut self, value: &str) -> Result<()> {
        if self.count == u32::MAX {
            return Err(KestrelError::Codec("too many values in one segment".into()));
        }
        let len = u32::try_from(value.len())
            .map_err(|_| KestrelError::Codec(format!("string of {} bytes", value.len())))?;
        self.raw.put_u32(len);
        self.raw.put_slice(value.as_bytes());
        self.count += 1;
        Ok(())
    }
}

impl Encoder for StringEncoder {
    fn write(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::String(s) => self.push(s),
            other => Err(KestrelError::Codec(format!(
                "string encoder cannot store {} value",
                other.value_type()
            ))),
        }
    }

    fn len(&self) -> usize {
        self.count as usize
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        let compressed = lz4_flex::compress_prepend_size(&self.raw);
        let mut out = Vec::with_capacity(4 + compressed.len());
        out.put_u32(self.count);
        out.put_slice(&compressed);
        Ok(out)
    }
}

pub struct StringDecoder {
    raw: Vec<u8>,
    pos: usize,
    remaining: u32,
}

impl StringDecoder {
    pub fn new(data: &[u8]) -> Result<Self> {
        let (remaining, body) = read_count(data)?;
        let raw = lz4_flex::decompress_size_prepended(body)
            .map_err(|e| KestrelError::Codec(format!("lz4: {}", e)))?;
        Ok(Self {
            raw,
            pos: 0,
            remaining,
        })
    }

    pub fn next_string(&mut self) -> Result<Option<String>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let mut buf = &self.raw[self.pos..];
        if buf.remaining() < 4 {
            return Err(KestrelError::Codec("string length cut short".into()));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(KestrelError::Codec(format!(
                "string of {} bytes cut short at {}",
                len,
                buf.remaining()
            )));
        }
        let s = std::str::from_utf8(&buf[..len])
            .map_err(|e| KestrelError::Codec(format!("invalid utf-8: {}", e)))?
            .to_string();
        self.pos += 4 + len;
        Ok(Some(s))
    }
}

impl Decoder for StringDecoder {
    fn next_value(&mut self) -> Result<Option<Value>> {
        Ok(self.next_string()?.map(Value::String))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_roundtrip() {
        let long = "x".repeat(10_000);
        let values = ["", "alpha", "ünïcödé", "alpha", long.as_str()];

        let mut encoder = Box::new(StringEncoder::with_capacity(64));
        for v in values {
            encoder.push(v).unwrap();
        }
        let data = encoder.finish().unwrap();
        // repetitive payload compresses
        assert!(data.len() < 2_000);

        let mut decoder = StringDecoder::new(&data).unwrap();
        for v in values {
            assert_eq!(decoder.next_string().unwrap().as_deref(), Some(v));
        }
        assert_eq!(decoder.next_string().unwrap(), None);
    }

    #[test]
    fn test_corrupt_payload() {
        let mut encoder = Box::new(StringEncoder::with_capacity(8));
        encoder.push("hello").unwrap();
        let data = encoder.finish().unwrap();

        assert!(StringDecoder::new(&data[..data.len() - 3]).is_err());

        // count claims more records than the payload holds
        let mut lying = data.clone();
        lying[3] = 2;
        let mut decoder = StringDecoder::new(&lying).unwrap();
        assert!(decoder.next_string().unwrap().is_some());
        assert!(decoder.next_string().is_err());
    }
}
