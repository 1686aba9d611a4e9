//! Remote tier: flushed files mirrored to an object store
//!
//! Every flushed file is uploaded under its own file name. A range query
//! lists the store and downloads the overlapping objects that the local
//! disk table does not know yet, so remote data only fills local misses.
//!
//! The object store client is async; the tier owns a small tokio runtime
//! and blocks on it, so it must not be called from inside another runtime.

use crate::sstable::{parse_file_name, DiskTable};
use crate::{KestrelError, KeyValue, QueryFilter, Result, Timestamp};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Object store backing the remote tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteConfig {
    /// Process-local store, mostly for tests
    Memory,
    /// Directory tree; objects live under `<root>/<instance id>`
    Local { root: PathBuf },
    /// S3-compatible service; the bucket is named after the instance id
    S3 {
        endpoint: String,
        access_key_id: String,
        secret_access_key: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        allow_http: bool,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Object store tier bound to one storage instance
pub struct RemoteTier {
    store: Arc<dyn ObjectStore>,
    work_dir: PathBuf,
    runtime: Runtime,
    /// Serializes `fetch_missing`
    fetching: Mutex<()>,
}

impl RemoteTier {
    /// Wrap an existing store; downloads land in `work_dir`
    pub fn new(store: Arc<dyn ObjectStore>, work_dir: impl AsRef<Path>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("kestrel-remote")
            .enable_all()
            .build()?;
        Ok(Self {
            store,
            work_dir: work_dir.as_ref().to_path_buf(),
            runtime,
            fetching: Mutex::new(()),
        })
    }

    /// Build the store described by `config` for the given instance
    pub fn from_config(
        config: &RemoteConfig,
        instance: Uuid,
        work_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            RemoteConfig::Memory => Arc::new(InMemory::new()),
            RemoteConfig::Local { root } => {
                let dir = root.join(instance.to_string());
                fs::create_dir_all(&dir)?;
                Arc::new(LocalFileSystem::new_with_prefix(&dir)?)
            }
            RemoteConfig::S3 {
                endpoint,
                access_key_id,
                secret_access_key,
                region,
                allow_http,
            } => Arc::new(
                AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key_id)
                    .with_secret_access_key(secret_access_key)
                    .with_region(region)
                    .with_bucket_name(instance.to_string())
                    .with_allow_http(*allow_http)
                    .build()?,
            ),
        };
        Self::new(store, work_dir)
    }

    /// Push a flushed file under its file name
    pub fn upload(&self, path: &Path) -> Result<()> {
        let name = object_name(path)?;
        let data = fs::read(path)?;
        let size = data.len();

        self.runtime.block_on(
            self.store
                .put(&ObjectPath::from(name.as_str()), PutPayload::from(Bytes::from(data))),
        )?;
        info!(object = %name, bytes = size, "Uploaded disk file");
        Ok(())
    }

    /// Pull an object into the work directory; returns the local path
    pub fn download(&self, name: &str) -> Result<PathBuf> {
        let location = ObjectPath::from(name);
        let data = self.runtime.block_on(async {
            let result = self.store.get(&location).await?;
            result.bytes().await
        })?;

        let path = self.work_dir.join(name);
        let tmp = self.work_dir.join(format!("{}.{}.tmp", name, Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, &data).and_then(|()| fs::rename(&tmp, &path)) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "Failed to remove partial download");
                }
            }
            return Err(e.into());
        }
        info!(object = %name, bytes = data.len(), "Downloaded disk file");
        Ok(path)
    }

    /// Names of every object in the store, as a set
    pub fn names(&self) -> Result<HashSet<String>> {
        Ok(self.list()?.into_iter().collect())
    }

    /// Names of every object in the store
    pub fn list(&self) -> Result<Vec<String>> {
        let listing = self
            .runtime
            .block_on(self.store.list_with_delimiter(None))?;
        Ok(listing
            .objects
            .into_iter()
            .filter_map(|meta| meta.location.filename().map(str::to_string))
            .collect())
    }

    /// Download and register overlapping objects missing from `disk`
    ///
    /// Returns the names that were fetched. Concurrent callers are
    /// serialized; a caller that waited sees the other's downloads as local.
    pub fn fetch_missing(
        &self,
        start: Timestamp,
        end: Timestamp,
        disk: &DiskTable,
    ) -> Result<Vec<String>> {
        let _fetching = self.fetching.lock();
        let mut fetched = Vec::new();
        for name in self.list()? {
            let (min_key, max_key) = match parse_file_name(&name) {
                Ok(range) => range,
                Err(_) => {
                    debug!(object = %name, "Skipping foreign object");
                    continue;
                }
            };
            if min_key >= end || max_key < start || disk.contains(&name) {
                continue;
            }
            let path = self.download(&name)?;
            disk.add_file(&path)?;
            fetched.push(name);
        }
        Ok(fetched)
    }

    /// Values in `[start, end)` from objects fetched for this query
    pub fn get_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        filter: Option<&QueryFilter>,
        disk: &DiskTable,
    ) -> Result<Vec<KeyValue>> {
        let mut results = Vec::new();
        for name in self.fetch_missing(start, end, disk)? {
            results.extend(disk.query_file(&name, start, end, filter)?);
        }
        Ok(results)
    }
}

fn object_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| KestrelError::InvalidFileName(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::Memtable;
    use crate::Entry;
    use tempfile::TempDir;

    fn memtable(range: std::ops::Range<i64>) -> Memtable {
        let table = Memtable::new();
        for k in range {
            table.insert(&Entry::new(k, k, ["remote"])).unwrap();
        }
        table
    }

    #[test]
    fn test_upload_list_download() {
        let local = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let disk = DiskTable::open(local.path(), 4).unwrap();
        let remote = RemoteTier::new(Arc::new(InMemory::new()), elsewhere.path()).unwrap();

        let path = disk.write_memtable(&memtable(0..10)).unwrap();
        remote.upload(&path).unwrap();
        assert_eq!(remote.list().unwrap(), vec!["0-9".to_string()]);

        let copy = remote.download("0-9").unwrap();
        assert_eq!(fs::read(copy).unwrap(), fs::read(&path).unwrap());
        assert!(remote.download("missing").is_err());
    }

    #[test]
    fn test_fetch_fills_local_misses_only() {
        let origin = TempDir::new().unwrap();
        let replica = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

        let source = DiskTable::open(origin.path(), 4).unwrap();
        let uploader = RemoteTier::new(Arc::clone(&store), origin.path()).unwrap();
        for i in 0..3i64 {
            let path = source.write_memtable(&memtable(i * 100..i * 100 + 50)).unwrap();
            uploader.upload(&path).unwrap();
        }

        let disk = DiskTable::open(replica.path(), 4).unwrap();
        let remote = RemoteTier::new(store, replica.path()).unwrap();

        let results = remote.get_range(120, 220, None, &disk).unwrap();
        let mut keys: Vec<i64> = results.iter().map(|kv| kv.key).collect();
        keys.sort_unstable();
        let mut expected: Vec<i64> = (120..150).collect();
        expected.extend(200..220);
        assert_eq!(keys, expected);
        assert_eq!(disk.len(), 2);
        assert!(replica.path().join("100-149").exists());

        // already registered objects are not fetched again
        assert!(remote.get_range(120, 220, None, &disk).unwrap().is_empty());
        assert_eq!(disk.get_range(120, 220, None).unwrap().len(), 50);
    }

    #[test]
    fn test_concurrent_fetches_share_downloads() {
        let origin = TempDir::new().unwrap();
        let replica = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

        let source = DiskTable::open(origin.path(), 4).unwrap();
        let uploader = RemoteTier::new(Arc::clone(&store), origin.path()).unwrap();
        for i in 0..8i64 {
            let path = source.write_memtable(&memtable(i * 10..i * 10 + 10)).unwrap();
            uploader.upload(&path).unwrap();
        }

        let disk = DiskTable::open(replica.path(), 16).unwrap();
        let remote = RemoteTier::new(store, replica.path()).unwrap();

        let fetched: Vec<Vec<String>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..4)
                .map(|_| s.spawn(|| remote.fetch_missing(0, 80, &disk).unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        // every object is downloaded by exactly one caller
        let mut names: Vec<String> = fetched.into_iter().flatten().collect();
        names.sort();
        assert_eq!(names.len(), 8);
        names.dedup();
        assert_eq!(names.len(), 8);
        assert_eq!(disk.len(), 8);
        assert_eq!(disk.get_range(0, 80, None).unwrap().len(), 80);

        let leftovers: Vec<_> = fs::read_dir(replica.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[test]
    fn test_download_tmp_is_discarded_on_startup() {
        let origin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let remote = RemoteTier::new(Arc::new(InMemory::new()), work.path()).unwrap();
        let disk = DiskTable::open(origin.path(), 4).unwrap();
        remote.upload(&disk.write_memtable(&memtable(0..3)).unwrap()).unwrap();

        remote.download("0-2").unwrap();
        // a download cut short by a crash
        let stale = work.path().join(format!("0-2.{}.tmp", Uuid::new_v4()));
        fs::write(&stale, b"partial").unwrap();

        let reopened = DiskTable::open(work.path(), 4).unwrap();
        assert!(!stale.exists());
        assert!(reopened.contains("0-2"));
    }

    #[test]
    fn test_local_config_uses_instance_dir() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let config = RemoteConfig::Local {
            root: root.path().to_path_buf(),
        };

        let disk = DiskTable::open(work.path(), 4).unwrap();
        let remote = RemoteTier::from_config(&config, id, work.path()).unwrap();
        let path = disk.write_memtable(&memtable(5..8)).unwrap();
        remote.upload(&path).unwrap();

        assert!(root.path().join(id.to_string()).join("5-7").exists());
    }

    #[test]
    fn test_config_shape() {
        let config: RemoteConfig = serde_json::from_str(
            r#"{"kind":"s3","endpoint":"http://localhost:9000","access_key_id":"a","secret_access_key":"b","allow_http":true}"#,
        )
        .unwrap();
        match config {
            RemoteConfig::S3 {
                region, allow_http, ..
            } => {
                assert_eq!(region, "us-east-1");
                assert!(allow_http);
            }
            other => panic!("unexpected {:?}", other),
        }

        let memory: RemoteConfig = serde_json::from_str(r#"{"kind":"memory"}"#).unwrap();
        assert_eq!(memory, RemoteConfig::Memory);
    }
}
