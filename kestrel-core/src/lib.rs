//! Kestrel Core - Embeddable Log-Structured Time-Series Storage Engine
//!
//! Kestrel stores integer-timestamped, typed values tagged with a set of
//! strings. Values are partitioned into series by their sorted tag set and
//! can be range-scanned by timestamp with optional type and tag filters.
//!
//! # Architecture
//!
//! - **WAL (Write-Ahead Log)**: every insert is logged before it is buffered
//! - **Memtable**: per-series red-black trees grouped by value type
//! - **SSTable**: immutable flushed files of compressed blocks with a header trailer
//! - **Disk table**: key-range pruning over flushed files with an LRU of open handles
//! - **Remote tier**: optional object store mirror of flushed files
//!
//! # Example
//!
//! ```no_run
//! use kestrel_core::{Database, Entry, QueryFilter, StorageConfig};
//! use uuid::Uuid;
//!
//! # fn main() -> kestrel_core::Result<()> {
//! let db = Database::open(StorageConfig::with_work_dir("data"), Uuid::new_v4())?;
//! db.insert(&Entry::new(1_000, 23.5, ["host=a", "metric=cpu"]))?;
//!
//! let filter = QueryFilter::new().with_tag("host=a");
//! let values = db.get_range(0, 2_000, Some(&filter))?;
//! assert_eq!(values.len(), 1);
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod memtable;
pub mod remote;
pub mod sstable;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use error::{KestrelError, Result};
pub use storage::{Database, DatabaseStats, Engine, EngineRegistry, StorageConfig};
pub use types::*;

/// Kestrel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Memtable size that triggers a flush (1MB)
    pub const MEMTABLE_SIZE: u64 = 1024 * 1024;

    /// Open disk file handles kept in the LRU cache
    pub const DISKFILE_CACHE_CAPACITY: usize = 10;

    /// Default work directory
    pub const WORK_DIR: &str = "data";

    /// WAL sub-directory of the work directory
    pub const WAL_DIR: &str = "wal";
}
