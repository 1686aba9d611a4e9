//! Memtable: the in-memory write buffer
//!
//! Entries are partitioned into blocks by value type and series signature.
//! Each block keeps its values in a red-black tree ordered by timestamp, so
//! range scans and flushes visit keys in ascending order.

mod block;
mod rbtree;

pub use block::Block;
pub use rbtree::{Iter, RbTree};

use crate::sstable::{encode_block, write_header, HeaderRecord};
use crate::{
    Entry, KestrelError, KeyValue, QueryFilter, Result, Timestamp, ValueType, VALUE_TYPE_COUNT,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory table of recent writes
pub struct Memtable {
    inner: RwLock<Inner>,
    /// Approximate size in bytes
    size: AtomicU64,
}

struct Inner {
    blocks: [BTreeMap<String, Block>; VALUE_TYPE_COUNT],
    min_key: Timestamp,
    max_key: Timestamp,
    entries: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                blocks: Default::default(),
                min_key: Timestamp::MAX,
                max_key: Timestamp::MIN,
                entries: 0,
            }),
            size: AtomicU64::new(0),
        }
    }

    /// Insert an entry into the block for its type and signature
    pub fn insert(&self, entry: &Entry) -> Result<()> {
        entry.validate()?;
        let signature = entry.signature();

        let mut inner = self.inner.write();
        let blocks = &mut inner.blocks[entry.value_type.index()];
        let replaced = blocks
            .entry(signature)
            .or_insert_with_key(|sig| Block::new(sig.clone(), entry.value_type))
            .insert(entry.key, entry.value.clone());

        if replaced.is_none() {
            inner.entries += 1;
        }
        inner.min_key = inner.min_key.min(entry.key);
        inner.max_key = inner.max_key.max(entry.key);
        drop(inner);

        self.size.fetch_add(entry.size(), Ordering::Relaxed);
        Ok(())
    }

    /// Values with `start <= key < end` from every block the filter admits
    pub fn get_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        filter: Option<&QueryFilter>,
    ) -> Vec<KeyValue> {
        let inner = self.inner.read();
        if inner.entries == 0 || end <= inner.min_key || start > inner.max_key {
            return Vec::new();
        }

        let mut results = Vec::new();
        for value_type in QueryFilter::scan_types(filter) {
            for block in inner.blocks[value_type.index()].values() {
                if QueryFilter::admits(filter, value_type, block.signature()) {
                    results.extend(block.range(start, end));
                }
            }
        }
        results
    }

    /// Smallest and largest key observed, `None` while empty
    pub fn key_range(&self) -> Option<(Timestamp, Timestamp)> {
        let inner = self.inner.read();
        if inner.entries == 0 {
            None
        } else {
            Some((inner.min_key, inner.max_key))
        }
    }

    /// Number of distinct (type, signature, key) values stored
    pub fn len(&self) -> usize {
        self.inner.read().entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of blocks across all value types
    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.iter().map(BTreeMap::len).sum()
    }

    /// Approximate size in bytes
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Check if the memtable has reached the flush threshold
    pub fn should_flush(&self, threshold: u64) -> bool {
        self.size() >= threshold
    }

    /// Serialize every block, then the header trailer and its footer
    ///
    /// Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let inner = self.inner.read();
        let mut offset = 0u64;
        let mut records = Vec::with_capacity(inner.blocks.iter().map(BTreeMap::len).sum());

        for value_type in ValueType::ALL {
            for block in inner.blocks[value_type.index()].values() {
                let bytes = encode_block(block)?;
                records.push(HeaderRecord {
                    signature: block.signature().to_string(),
                    value_type,
                    count: to_u32(block.count() as u64)?,
                    min_key: block.min_key(),
                    max_key: block.max_key(),
                    offset: to_u32(offset)?,
                    length: to_u32(bytes.len() as u64)?,
                });
                writer.write_all(&bytes)?;
                offset += bytes.len() as u64;
            }
        }

        let trailer_len: usize = records.iter().map(HeaderRecord::encoded_len).sum();
        let mut trailer = Vec::with_capacity(trailer_len + 4);
        write_header(&records, to_u32(offset)?, &mut trailer)?;
        writer.write_all(&trailer)?;
        Ok(offset + trailer.len() as u64)
    }
}

impl fmt::Debug for Memtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Memtable")
            .field("entries", &inner.entries)
            .field("min_key", &inner.min_key)
            .field("max_key", &inner.max_key)
            .field("size", &self.size.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

fn to_u32(n: u64) -> Result<u32> {
    u32::try_from(n).map_err(|_| KestrelError::Codec(format!("{} does not fit in 32 bits", n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::{decode_block, load_index};
    use crate::Value;
    use std::io::{Cursor, Read, Seek, SeekFrom};

    fn keys(results: &[KeyValue]) -> Vec<i64> {
        let mut keys: Vec<i64> = results.iter().map(|kv| kv.key).collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn test_insert_and_range() {
        let table = Memtable::new();
        for k in 0..100i64 {
            table.insert(&Entry::new(k, k, ["test"])).unwrap();
        }
        assert_eq!(table.len(), 100);
        assert_eq!(table.size(), 800);
        assert_eq!(table.key_range(), Some((0, 99)));

        let results = table.get_range(20, 40, None);
        assert_eq!(keys(&results), (20..40).collect::<Vec<_>>());
        assert!(table.get_range(100, 200, None).is_empty());
        assert!(table.get_range(-10, 0, None).is_empty());
    }

    #[test]
    fn test_partitioning_and_filters() {
        let table = Memtable::new();
        for k in 0..10i64 {
            table.insert(&Entry::new(k, k, ["host=a"])).unwrap();
            table.insert(&Entry::new(k, k as f64, ["host=b"])).unwrap();
            table.insert(&Entry::new(k, format!("s{}", k), ["host=a", "dc=x"])).unwrap();
        }
        assert_eq!(table.block_count(), 3);
        assert_eq!(table.len(), 30);

        let only_a = QueryFilter::new().with_tag("host=a");
        assert_eq!(table.get_range(0, 10, Some(&only_a)).len(), 20);

        let int_a = QueryFilter::new().with_type(ValueType::Int).with_tag("host=a");
        let results = table.get_range(0, 10, Some(&int_a));
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|kv| matches!(kv.value, Value::Int(_))));

        let none = QueryFilter::new().with_tag("host=c");
        assert!(table.get_range(0, 10, Some(&none)).is_empty());
    }

    #[test]
    fn test_rejects_mismatched_entry() {
        let table = Memtable::new();
        let mut entry = Entry::new(1, 1i64, ["t"]);
        entry.value_type = ValueType::String;
        assert!(table.insert(&entry).is_err());
        assert!(table.is_empty());
        assert_eq!(table.size(), 0);
        assert_eq!(table.key_range(), None);
    }

    #[test]
    fn test_debug_output() {
        let table = Memtable::new();
        table.insert(&Entry::new(4, 2i64, ["t"])).unwrap();
        table.insert(&Entry::new(9, 3i64, ["t"])).unwrap();
        let shown = format!("{:?}", table);
        assert!(shown.starts_with("Memtable {"), "{}", shown);
        assert!(shown.contains("entries: 2"), "{}", shown);
        assert!(shown.contains("max_key: 9"), "{}", shown);

        let mut block = Block::new("t", ValueType::Int);
        block.insert(4, Value::Int(2));
        assert!(format!("{:?}", block).contains("4: Int(2)"));
    }

    #[test]
    fn test_duplicate_key_replaces() {
        let table = Memtable::new();
        table.insert(&Entry::new(5, 1i64, ["t"])).unwrap();
        table.insert(&Entry::new(5, 2i64, ["t"])).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get_range(5, 6, None), vec![KeyValue::new(5, Value::Int(2))]);
    }

    #[test]
    fn test_write_layout() {
        let table = Memtable::new();
        for k in 0..50i64 {
            table.insert(&Entry::new(k, k * 2, ["a"])).unwrap();
            table.insert(&Entry::new(k + 10, k as f64, ["b"])).unwrap();
        }

        let mut file = Cursor::new(Vec::new());
        let written = table.write_to(&mut file).unwrap();
        assert_eq!(written, file.get_ref().len() as u64);

        let index = load_index(&mut file).unwrap();
        let ints = &index[ValueType::Int.index()]["a"];
        assert_eq!((ints.count, ints.min_key, ints.max_key), (50, 0, 49));
        let floats = &index[ValueType::Float.index()]["b"];
        assert_eq!((floats.min_key, floats.max_key), (10, 59));
        // blocks are contiguous from the start of the file
        assert_eq!(ints.offset, 0);
        assert_eq!(floats.offset, ints.length);

        let mut bytes = vec![0u8; floats.length as usize];
        file.seek(SeekFrom::Start(u64::from(floats.offset))).unwrap();
        file.read_exact(&mut bytes).unwrap();
        let block = decode_block(&bytes, floats).unwrap();
        assert_eq!(block.count(), 50);
        assert_eq!(block.get(59), Some(&Value::Float(49.0)));
    }

    #[test]
    fn test_empty_write() {
        let table = Memtable::new();
        let mut buf = Vec::new();
        assert_eq!(table.write_to(&mut buf).unwrap(), 4);
        assert_eq!(buf, vec![0, 0, 0, 0]);
    }
}
