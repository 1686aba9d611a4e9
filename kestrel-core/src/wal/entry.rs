//! WAL frame codec
//!
//! A frame is an 8-byte big-endian length followed by the JSON-encoded
//! entry: `{"key":..,"value":..,"type":..,"tags":[..]}`.

use crate::{Entry, KestrelError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Size of the length prefix
pub const FRAME_HEADER_SIZE: usize = 8;

/// Frame an entry for appending to the log
pub fn encode_frame(entry: &Entry) -> Result<BytesMut> {
    let payload = serde_json::to_vec(entry)
        .map_err(|e| KestrelError::Codec(format!("cannot encode WAL entry: {}", e)))?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u64(payload.len() as u64);
    buf.put_slice(&payload);
    Ok(buf)
}

/// Decode the frame at the front of `data`
///
/// Returns the entry and the number of bytes consumed. A short or
/// malformed frame is an error; recovery never skips over one.
pub fn decode_frame(data: &[u8]) -> Result<(Entry, usize)> {
    let mut buf = data;
    if buf.remaining() < FRAME_HEADER_SIZE {
        return Err(KestrelError::WalRecovery(format!(
            "frame length cut short: {} bytes",
            buf.remaining()
        )));
    }

    let len = buf.get_u64();
    if len > buf.remaining() as u64 {
        return Err(KestrelError::WalRecovery(format!(
            "frame of {} bytes, only {} available",
            len,
            buf.remaining()
        )));
    }
    let len = len as usize;

    let entry: Entry = serde_json::from_slice(&buf[..len])
        .map_err(|e| KestrelError::WalRecovery(format!("malformed entry: {}", e)))?;
    entry
        .validate()
        .map_err(|e| KestrelError::WalRecovery(e.to_string()))?;

    Ok((entry, FRAME_HEADER_SIZE + len))
}
