//! Write-Ahead Log (WAL) implementation
//!
//! Every entry is appended to the log before it reaches the memtable, so a
//! restart can rebuild the unflushed memtable by replaying the log. The log
//! is split into numbered segments; a flush rotates to a fresh segment and,
//! once the flushed file is safely on disk, deletes the older ones.

mod entry;
mod reader;
mod writer;

pub use entry::{decode_frame, encode_frame, FRAME_HEADER_SIZE};
pub use reader::WalReader;
pub use writer::WalWriter;

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// WAL sync policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    Immediate,
    /// Sync after N writes
    EveryN(usize),
    /// Never sync (OS decides, fastest, least safe)
    #[default]
    None,
}

/// WAL configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Directory for WAL segments; `<work_dir>/wal` when unset
    pub dir: Option<PathBuf>,
    /// Sync policy
    pub sync_policy: SyncPolicy,
}

/// File name of a segment
pub fn segment_name(segment_id: u64) -> String {
    format!("wal_{:020}.log", segment_id)
}

/// Segment id encoded in a file name, if it is one
pub fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_prefix("wal_"))
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse().ok())
}

/// Every segment in `dir`, ordered by id
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(id) = parse_segment_id(&path) {
            segments.push((id, path));
        }
    }
    segments.sort_unstable_by_key(|(id, _)| *id);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_names() {
        let name = segment_name(42);
        assert_eq!(name, "wal_00000000000000000042.log");
        assert_eq!(parse_segment_id(Path::new(&name)), Some(42));
        assert_eq!(parse_segment_id(Path::new("0-99")), None);
        assert_eq!(parse_segment_id(Path::new("wal_x.log")), None);
    }

    #[test]
    fn test_sync_policy_config() {
        let config: WalConfig =
            serde_json::from_str(r#"{"sync_policy":{"every_n":16}}"#).unwrap();
        assert_eq!(config.sync_policy, SyncPolicy::EveryN(16));
        assert_eq!(config.dir, None);

        let config: WalConfig = serde_json::from_str(r#"{"sync_policy":"immediate"}"#).unwrap();
        assert_eq!(config.sync_policy, SyncPolicy::Immediate);
        assert_eq!(WalConfig::default().sync_policy, SyncPolicy::None);
    }
}
