//! WAL reader for recovery

use super::{decode_frame, list_segments};
use crate::memtable::Memtable;
use crate::{Entry, KestrelError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// WAL reader replaying segments in order
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Every logged entry, oldest first
    ///
    /// A malformed frame anywhere aborts recovery.
    pub fn recover(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for (id, path) in list_segments(&self.dir)? {
            let before = entries.len();
            Self::read_segment(&path, &mut entries).map_err(|e| match e {
                KestrelError::WalRecovery(msg) => {
                    KestrelError::WalRecovery(format!("segment {}: {}", id, msg))
                }
                other => other,
            })?;
            if entries.len() > before {
                info!(
                    segment = id,
                    entries = entries.len() - before,
                    "Recovered WAL segment"
                );
            }
        }
        Ok(entries)
    }

    /// Replay the log into a fresh memtable
    pub fn load(&self) -> Result<Memtable> {
        let memtable = Memtable::new();
        for entry in self.recover()? {
            memtable.insert(&entry)?;
        }
        Ok(memtable)
    }

    fn read_segment(path: &Path, entries: &mut Vec<Entry>) -> Result<()> {
        let data = fs::read(path)?;
        let mut offset = 0;
        while offset < data.len() {
            let (entry, used) = decode_frame(&data[offset..]).map_err(|e| match e {
                KestrelError::WalRecovery(msg) => {
                    KestrelError::WalRecovery(format!("offset {}: {}", offset, msg))
                }
                other => other,
            })?;
            entries.push(entry);
            offset += used;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{segment_name, SyncPolicy, WalWriter};
    use crate::{QueryFilter, ValueType};
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_wal_recovery() {
        let temp_dir = TempDir::new().unwrap();
        {
            let writer = WalWriter::open(temp_dir.path(), SyncPolicy::None).unwrap();
            for i in 0..10i64 {
                writer.append(&Entry::new(i, i as f64 + 0.5, ["temp"])).unwrap();
                if i == 4 {
                    writer.rotate().unwrap();
                }
            }
        }

        let reader = WalReader::new(temp_dir.path());
        let entries = reader.recover().unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(
            entries.iter().map(|e| e.key).collect::<Vec<_>>(),
            (0..10).collect::<Vec<_>>()
        );

        let memtable = reader.load().unwrap();
        assert_eq!(memtable.len(), 10);
        let floats = QueryFilter::new().with_type(ValueType::Float);
        assert_eq!(memtable.get_range(0, 10, Some(&floats)).len(), 10);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let reader = WalReader::new(temp_dir.path().join("nothing"));
        assert!(reader.recover().unwrap().is_empty());
        assert!(reader.load().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frame_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        {
            let writer = WalWriter::open(temp_dir.path(), SyncPolicy::None).unwrap();
            writer.append(&Entry::new(1, 1i64, ["t"])).unwrap();
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(temp_dir.path().join(segment_name(0)))
            .unwrap();
        file.write_all(&[0, 0, 0, 0, 0, 0, 0, 9, b'{']).unwrap();

        let err = WalReader::new(temp_dir.path()).load().unwrap_err();
        assert!(matches!(err, KestrelError::WalRecovery(_)), "{}", err);
        assert!(err.is_corruption());
    }
}
