//! On-disk sorted runs
//!
//! A flushed file holds the encoded blocks of one memtable, followed by a
//! header trailer with one record per block, followed by a 4-byte
//! big-endian offset of the trailer:
//!
//! ```text
//! [block][block]...[record][record]...[u32 trailer offset]
//! ```

mod block;
mod cache;
mod disktable;
mod header;

pub use block::{decode_block, encode_block};
pub use cache::LruCache;
pub use disktable::{file_name, parse_file_name, DiskFile, DiskTable, TableHandle};
pub use header::{
    find_header, load_index, read_header, write_header, HeaderIndex, HeaderRecord, FOOTER_SIZE,
};
