//! Header table: per-block metadata written as a trailer after the blocks
//!
//! Record layout, all integers big-endian:
//!
//! ```text
//! [u32 sig len][sig][u32 type][u32 count][u32 max][u32 min][u32 offset][u32 length]
//! ```
//!
//! The last four bytes of a file hold the offset where the trailer starts.

use crate::{KestrelError, Result, Timestamp, ValueType, VALUE_TYPE_COUNT};
use bytes::{Buf, BufMut};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Size of the trailer-offset footer
pub const FOOTER_SIZE: u64 = 4;

/// Header records bucketed by value type, keyed by series signature
pub type HeaderIndex = [HashMap<String, HeaderRecord>; VALUE_TYPE_COUNT];

/// Location and bounds of one encoded block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub signature: String,
    pub value_type: ValueType,
    pub count: u32,
    /// Stored on disk in 32 bits; exact only for keys in `[0, u32::MAX]`
    pub min_key: Timestamp,
    pub max_key: Timestamp,
    pub offset: u32,
    pub length: u32,
}

impl HeaderRecord {
    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        4 + self.signature.len() + 24
    }

    /// Append the wire form to `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let sig_len = u32::try_from(self.signature.len()).map_err(|_| {
            KestrelError::Codec(format!("signature of {} bytes", self.signature.len()))
        })?;
        buf.put_u32(sig_len);
        buf.put_slice(self.signature.as_bytes());
        buf.put_u32(self.value_type.into());
        buf.put_u32(self.count);
        buf.put_u32(self.max_key as u32);
        buf.put_u32(self.min_key as u32);
        buf.put_u32(self.offset);
        buf.put_u32(self.length);
        Ok(())
    }

    /// Decode one record from the front of `buf`
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let sig_len = take_u32(buf)? as usize;
        if buf.len() < sig_len {
            return Err(KestrelError::TruncatedHeader(format!(
                "signature of {} bytes, {} left",
                sig_len,
                buf.len()
            )));
        }
        let (sig, rest) = buf.split_at(sig_len);
        let signature = String::from_utf8(sig.to_vec())
            .map_err(|e| KestrelError::Codec(format!("signature is not utf-8: {}", e)))?;
        *buf = rest;

        let value_type = ValueType::try_from(take_u32(buf)?)?;
        let count = take_u32(buf)?;
        let max_key = Timestamp::from(take_u32(buf)?);
        let min_key = Timestamp::from(take_u32(buf)?);
        let offset = take_u32(buf)?;
        let length = take_u32(buf)?;

        Ok(Self {
            signature,
            value_type,
            count,
            min_key,
            max_key,
            offset,
            length,
        })
    }

    /// True when the block may hold keys in `[start, end)`
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.min_key < end && self.max_key >= start
    }
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(KestrelError::TruncatedHeader(format!(
            "need 4 bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(buf.get_u32())
}

/// Write records back-to-back followed by the footer
///
/// `trailer_start` is the file offset where the first record lands.
pub fn write_header<B: BufMut>(
    records: &[HeaderRecord],
    trailer_start: u32,
    buf: &mut B,
) -> Result<()> {
    for record in records {
        record.encode(buf)?;
    }
    buf.put_u32(trailer_start);
    Ok(())
}

/// Seek to the trailer via the footer and return its raw bytes
pub fn find_header<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < FOOTER_SIZE {
        return Err(KestrelError::TruncatedHeader(format!(
            "file of {} bytes has no footer",
            file_len
        )));
    }

    reader.seek(SeekFrom::Start(file_len - FOOTER_SIZE))?;
    let mut footer = [0u8; FOOTER_SIZE as usize];
    reader.read_exact(&mut footer).map_err(truncated)?;
    let trailer_start = u64::from(u32::from_be_bytes(footer));

    let trailer_end = file_len - FOOTER_SIZE;
    if trailer_start > trailer_end {
        return Err(KestrelError::TruncatedHeader(format!(
            "trailer starts at {} past footer at {}",
            trailer_start, trailer_end
        )));
    }

    reader.seek(SeekFrom::Start(trailer_start))?;
    let mut trailer = vec![0u8; (trailer_end - trailer_start) as usize];
    reader.read_exact(&mut trailer).map_err(truncated)?;
    Ok(trailer)
}

/// Parse every record of a trailer, bucketed by value type
pub fn read_header(trailer: &[u8]) -> Result<HeaderIndex> {
    let mut index: HeaderIndex = Default::default();
    let mut buf = trailer;
    while buf.has_remaining() {
        let record = HeaderRecord::decode(&mut buf)?;
        index[record.value_type.index()].insert(record.signature.clone(), record);
    }
    Ok(index)
}

/// Locate and parse the trailer of an open file
pub fn load_index<R: Read + Seek>(reader: &mut R) -> Result<HeaderIndex> {
    let trailer = find_header(reader)?;
    read_header(&trailer)
}

fn truncated(e: std::io::Error) -> KestrelError {
    if e.kind() == ErrorKind::UnexpectedEof {
        KestrelError::TruncatedHeader(e.to_string())
    } else {
        KestrelError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(sig: &str, value_type: ValueType, offset: u32) -> HeaderRecord {
        HeaderRecord {
            signature: sig.to_string(),
            value_type,
            count: 3,
            min_key: 10,
            max_key: 99,
            offset,
            length: 17,
        }
    }

    #[test]
    fn test_record_wire_order() {
        let mut buf = Vec::new();
        record("ab", ValueType::Int, 5).encode(&mut buf).unwrap();
        assert_eq!(buf.len(), record("ab", ValueType::Int, 5).encoded_len());
        assert_eq!(
            buf,
            vec![
                0, 0, 0, 2, b'a', b'b', // signature
                0, 0, 0, 1, // type
                0, 0, 0, 3, // count
                0, 0, 0, 99, // max
                0, 0, 0, 10, // min
                0, 0, 0, 5, // offset
                0, 0, 0, 17, // length
            ]
        );
    }

    #[test]
    fn test_header_roundtrip_by_type() {
        let records = vec![
            record("host=a", ValueType::Int, 0),
            record("host=b", ValueType::Int, 17),
            record("host=a", ValueType::Float, 34),
            record("", ValueType::String, 51),
        ];

        // pretend 68 bytes of blocks precede the trailer
        let mut file = vec![0u8; 68];
        write_header(&records, 68, &mut file).unwrap();

        let index = load_index(&mut Cursor::new(&file)).unwrap();
        assert!(index[ValueType::Unknown.index()].is_empty());
        assert_eq!(index[ValueType::Int.index()].len(), 2);
        assert_eq!(index[ValueType::Float.index()].len(), 1);
        assert_eq!(index[ValueType::String.index()].len(), 1);

        for r in &records {
            assert_eq!(&index[r.value_type.index()][&r.signature], r);
        }
    }

    #[test]
    fn test_empty_trailer() {
        let mut file = Vec::new();
        write_header(&[], 0, &mut file).unwrap();
        let index = load_index(&mut Cursor::new(&file)).unwrap();
        assert!(index.iter().all(HashMap::is_empty));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            load_index(&mut Cursor::new(vec![0u8; 2])),
            Err(KestrelError::TruncatedHeader(_))
        ));

        let mut file = Vec::new();
        write_header(&[record("x", ValueType::Int, 0)], 0, &mut file).unwrap();
        // drop the last byte of the record but keep a footer
        let mut cut = file[..file.len() - 5].to_vec();
        cut.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            load_index(&mut Cursor::new(cut)),
            Err(KestrelError::TruncatedHeader(_))
        ));

        let mut past = Vec::new();
        past.extend_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            load_index(&mut Cursor::new(past)),
            Err(KestrelError::TruncatedHeader(_))
        ));
    }

    #[test]
    fn test_overlaps() {
        let r = record("", ValueType::Int, 0);
        assert!(r.overlaps(0, 11));
        assert!(!r.overlaps(0, 10));
        assert!(r.overlaps(99, 200));
        assert!(!r.overlaps(100, 200));
    }
}
