//! Block codec: one (series, value type) block as a framed byte segment
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! [u32 value type][u32 time len][time segment][u32 value len][value segment]
//! ```

use super::HeaderRecord;
use crate::compression::{new_decoder, new_encoder, DeltaDecoder, DeltaEncoder};
use crate::memtable::{Block, RbTree};
use crate::{KestrelError, Result, ValueType};
use bytes::{Buf, BufMut};

/// Serialize a block, keys in ascending order
pub fn encode_block(block: &Block) -> Result<Vec<u8>> {
    let capacity = block.count() * 2;
    let mut times = DeltaEncoder::with_capacity(capacity);
    let mut values = new_encoder(block.value_type(), capacity)?;

    for (key, value) in block.iter() {
        times.push(*key)?;
        values.write(value)?;
    }

    let time_segment = times.finish();
    let value_segment = values.finish()?;

    let mut buf = Vec::with_capacity(12 + time_segment.len() + value_segment.len());
    buf.put_u32(block.value_type().into());
    buf.put_u32(segment_len(&time_segment)?);
    buf.put_slice(&time_segment);
    buf.put_u32(segment_len(&value_segment)?);
    buf.put_slice(&value_segment);
    Ok(buf)
}

/// Rebuild a block from its encoded bytes
///
/// Bounds come from the header record since the tree alone cannot tell
/// them apart from an empty block.
pub fn decode_block(data: &[u8], record: &HeaderRecord) -> Result<Block> {
    let mut buf = data;

    let value_type = ValueType::try_from(take_u32(&mut buf, "value type")?)?;
    if value_type != record.value_type {
        return Err(KestrelError::Codec(format!(
            "block of {} stored under a {} header",
            value_type, record.value_type
        )));
    }
    let time_segment = take_segment(&mut buf, "time segment")?;
    let value_segment = take_segment(&mut buf, "value segment")?;

    let mut times = DeltaDecoder::new(time_segment)?;
    let mut values = new_decoder(value_type, value_segment)?;
    let mut tree = RbTree::new();

    loop {
        match (times.next_i64()?, values.next_value()?) {
            (Some(key), Some(value)) => {
                tree.insert(key, value);
            }
            (None, None) => break,
            _ => {
                return Err(KestrelError::Codec(format!(
                    "time and value segments of {:?} differ in length",
                    record.signature
                )))
            }
        }
    }

    Ok(Block::from_parts(
        record.signature.clone(),
        value_type,
        tree,
        record.min_key,
        record.max_key,
    ))
}

fn segment_len(segment: &[u8]) -> Result<u32> {
    u32::try_from(segment.len())
        .map_err(|_| KestrelError::Codec(format!("segment of {} bytes", segment.len())))
}

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(KestrelError::TruncatedBlock(format!(
            "{}: need 4 bytes, have {}",
            what,
            buf.remaining()
        )));
    }
    Ok(buf.get_u32())
}

fn take_segment<'a>(buf: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    let len = take_u32(buf, what)? as usize;
    if buf.len() < len {
        return Err(KestrelError::TruncatedBlock(format!(
            "{}: need {} bytes, have {}",
            what,
            len,
            buf.len()
        )));
    }
    let (segment, rest) = buf.split_at(len);
    *buf = rest;
    Ok(segment)
}
