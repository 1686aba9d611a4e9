//! Value and time codecs used inside disk blocks
//!
//! Every encoded segment starts with a big-endian `u32` value count so a
//! decoder knows when the stream ends regardless of bit padding.
//!
//! - timestamps and integers: delta-of-delta (`delta`)
//! - floats: XOR with the previous value (`gorilla`)
//! - strings: length-prefixed records compressed with LZ4 (`strings`)

mod bitstream;
mod delta;
mod gorilla;
mod strings;

pub use bitstream::{BitReader, BitWriter};
pub use delta::{DeltaDecoder, DeltaEncoder, IntDecoder, IntEncoder};
pub use gorilla::{FloatDecoder, FloatEncoder};
pub use strings::{StringDecoder, StringEncoder};

use crate::{KestrelError, Result, Value, ValueType};

/// Streaming encoder for one value type
pub trait Encoder: Send {
    /// Append a value; fails if its type does not match the encoder
    fn write(&mut self, value: &Value) -> Result<()>;

    /// Number of values written
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce the encoded segment
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Streaming decoder yielding values until the recorded count is reached
pub trait Decoder {
    fn next_value(&mut self) -> Result<Option<Value>>;
}

/// Encoder for the given value type
pub fn new_encoder(value_type: ValueType, capacity: usize) -> Result<Box<dyn Encoder>> {
    match value_type {
        ValueType::Int => Ok(Box::new(IntEncoder::with_capacity(capacity))),
        ValueType::Float => Ok(Box::new(FloatEncoder::with_capacity(capacity))),
        ValueType::String => Ok(Box::new(StringEncoder::with_capacity(capacity))),
        ValueType::Unknown => Err(KestrelError::Codec("no encoder for unknown type".into())),
    }
}

/// Decoder for the given value type over an encoded segment
pub fn new_decoder<'a>(value_type: ValueType, data: &'a [u8]) -> Result<Box<dyn Decoder + 'a>> {
    match value_type {
        ValueType::Int => Ok(Box::new(IntDecoder::new(data)?)),
        ValueType::Float => Ok(Box::new(FloatDecoder::new(data)?)),
        ValueType::String => Ok(Box::new(StringDecoder::new(data)?)),
        ValueType::Unknown => Err(KestrelError::Codec("no decoder for unknown type".into())),
    }
}

/// Split the leading count off an encoded segment
pub(crate) fn read_count(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 4 {
        return Err(KestrelError::Codec(format!(
            "segment of {} bytes has no count",
            data.len()
        )));
    }
    let (head, body) = data.split_at(4);
    let count = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    Ok((count, body))
}
