//! Storage engine - coordinates all storage components

mod database;
mod engine;

pub use database::{Database, DatabaseStats};
pub use engine::{Engine, EngineFactory, EngineRegistry, LSM_ENGINE};

use crate::remote::RemoteConfig;
use crate::wal::WalConfig;
use crate::{KestrelError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding flushed files (and the WAL unless configured elsewhere)
    pub work_dir: PathBuf,
    /// WAL configuration
    pub wal: WalConfig,
    /// Memtable size in bytes that triggers a flush
    pub memtable_size: u64,
    /// Maximum number of disk files kept open
    pub diskfile_cache_capacity: usize,
    /// Optional object store tier
    pub remote: Option<RemoteConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(crate::config::WORK_DIR),
            wal: WalConfig::default(),
            memtable_size: crate::config::MEMTABLE_SIZE,
            diskfile_cache_capacity: crate::config::DISKFILE_CACHE_CAPACITY,
            remote: None,
        }
    }
}

impl StorageConfig {
    /// Configuration rooted at `work_dir` with every other field defaulted
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    /// Directory holding WAL segments
    pub fn wal_dir(&self) -> PathBuf {
        self.wal
            .dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join(crate::config::WAL_DIR))
    }

    pub fn validate(&self) -> Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(KestrelError::Config("work_dir must be set".into()));
        }
        if self.memtable_size == 0 {
            return Err(KestrelError::Config("memtable_size must be positive".into()));
        }
        if self.diskfile_cache_capacity == 0 {
            return Err(KestrelError::Config(
                "diskfile_cache_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
