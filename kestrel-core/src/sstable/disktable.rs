//! Disk table manager: every immutable flushed file and its open handles
//!
//! Files are named `<minKey>-<maxKey>`, with an optional `.<n>` suffix when
//! two flushes cover the same range. File metadata stays registered for the
//! lifetime of the manager; only open handles (with their parsed header
//! index) are bounded by the LRU cache and rebuilt on demand.

use super::{decode_block, load_index, HeaderIndex, LruCache};
use crate::memtable::Memtable;
use crate::{KestrelError, KeyValue, QueryFilter, Result, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suffix of files still being written
const TMP_SUFFIX: &str = "tmp";

/// Write through `write` into `tmp`, sync it, then rename it to `path`
///
/// On any failure `tmp` is removed before the error is returned.
fn persist<F>(tmp: &Path, path: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<u64>,
{
    let result = (|| -> Result<u64> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)?;
        let mut writer = BufWriter::new(file);
        let written = write(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(tmp, path)?;
        Ok(written)
    })();

    if result.is_err() {
        if let Err(e) = fs::remove_file(tmp) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "Failed to remove unfinished disk file");
            }
        }
    }
    result
}

/// File name for a key range
pub fn file_name(min_key: Timestamp, max_key: Timestamp) -> String {
    format!("{}-{}", min_key, max_key)
}

/// Parse `<minKey>-<maxKey>[.<n>]` into its key range
pub fn parse_file_name(name: &str) -> Result<(Timestamp, Timestamp)> {
    let invalid = || KestrelError::InvalidFileName(name.to_string());

    let base = match name.rsplit_once('.') {
        Some((base, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => base,
        Some(_) => return Err(invalid()),
        None => name,
    };

    // skip a leading sign so "-5--1" splits after "-5"
    let split = base
        .get(1..)
        .and_then(|rest| rest.find('-'))
        .map(|i| i + 1)
        .ok_or_else(invalid)?;

    let min_key = base[..split].parse::<Timestamp>().map_err(|_| invalid())?;
    let max_key = base[split + 1..]
        .parse::<Timestamp>()
        .map_err(|_| invalid())?;
    if min_key > max_key {
        return Err(invalid());
    }
    Ok((min_key, max_key))
}

/// Registered metadata of one flushed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFile {
    pub name: String,
    pub path: PathBuf,
    pub min_key: Timestamp,
    pub max_key: Timestamp,
}

impl DiskFile {
    fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KestrelError::InvalidFileName(path.display().to_string()))?
            .to_string();
        let (min_key, max_key) = parse_file_name(&name)?;
        Ok(Self {
            name,
            path: path.to_path_buf(),
            min_key,
            max_key,
        })
    }

    /// True when the file may hold keys in `[start, end)`
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.min_key < end && self.max_key >= start
    }

    /// Header min/max are written in 32 bits and only trustworthy when the
    /// whole file lies inside that range
    fn header_bounds_exact(&self) -> bool {
        self.min_key >= 0 && self.max_key <= Timestamp::from(u32::MAX)
    }
}

/// An open file with its parsed header index
pub struct TableHandle {
    file: Mutex<File>,
    index: HeaderIndex,
}

impl TableHandle {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let index = load_index(&mut file)?;
        Ok(Self {
            file: Mutex::new(file),
            index,
        })
    }

    pub fn index(&self) -> &HeaderIndex {
        &self.index
    }

    /// Positioned read; the lock covers only the seek and the read
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                KestrelError::TruncatedBlock(format!("{} bytes at offset {}", len, offset))
            } else {
                KestrelError::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Values in `[start, end)` from every block the filter admits
    fn scan(
        &self,
        file: &DiskFile,
        start: Timestamp,
        end: Timestamp,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<KeyValue>> {
        let prune = file.header_bounds_exact();
        let mut results = Vec::new();

        for value_type in QueryFilter::scan_types(filter) {
            for record in self.index[value_type.index()].values() {
                if !QueryFilter::admits(filter, record.value_type, &record.signature) {
                    continue;
                }
                if prune && !record.overlaps(start, end) {
                    continue;
                }
                let bytes = self.read_at(u64::from(record.offset), record.length as usize)?;
                let block = decode_block(&bytes, record)?;
                results.extend(block.range(start, end));
            }
        }
        Ok(results)
    }
}

struct Inner {
    /// Registered files ordered by `(min_key, name)`
    files: BTreeMap<(Timestamp, String), DiskFile>,
    /// name -> min_key, to find a file's slot in `files`
    slots: HashMap<String, Timestamp>,
    open: LruCache<String, Arc<TableHandle>>,
}

impl Inner {
    fn register(&mut self, file: DiskFile) -> bool {
        if self.slots.contains_key(&file.name) {
            return false;
        }
        self.slots.insert(file.name.clone(), file.min_key);
        self.files.insert((file.min_key, file.name.clone()), file);
        true
    }

    fn cache_handle(&mut self, name: &str, handle: Arc<TableHandle>) {
        if let Some((evicted, _)) = self.open.put(name.to_string(), handle) {
            debug!(file = %evicted, "Closed least recently used disk file");
        }
    }
}

/// Manager of flushed files in one work directory
pub struct DiskTable {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl DiskTable {
    /// Open the manager, registering every well-formed file already present
    pub fn open(dir: impl AsRef<Path>, cache_capacity: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut inner = Inner {
            files: BTreeMap::new(),
            slots: HashMap::new(),
            open: LruCache::new(cache_capacity),
        };

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TMP_SUFFIX) {
                warn!(path = %path.display(), "Removing unfinished disk file");
                fs::remove_file(&path)?;
                continue;
            }
            match DiskFile::from_path(&path) {
                Ok(file) => {
                    inner.register(file);
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping foreign file"),
            }
        }

        if !inner.files.is_empty() {
            info!(dir = %dir.display(), files = inner.files.len(), "Discovered disk files");
        }

        Ok(Self {
            dir,
            inner: Mutex::new(inner),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a file and keep its handle open
    pub fn add_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = DiskFile::from_path(path.as_ref())?;
        let handle = Arc::new(TableHandle::open(&file.path)?);

        let mut inner = self.inner.lock();
        let name = file.name.clone();
        if inner.register(file) {
            debug!(file = %name, "Registered disk file");
        }
        inner.cache_handle(&name, handle);
        Ok(())
    }

    /// Write a memtable as a new file and register it
    ///
    /// The file is written under a temporary name, synced, then renamed, so
    /// a crash never leaves a partial file under a valid name.
    pub fn write_memtable(&self, memtable: &Memtable) -> Result<PathBuf> {
        self.write_memtable_excluding(memtable, &HashSet::new())
    }

    /// Like `write_memtable`, but never picks a name in `reserved`
    ///
    /// Used to keep clear of names already taken in the remote tier.
    pub fn write_memtable_excluding(
        &self,
        memtable: &Memtable,
        reserved: &HashSet<String>,
    ) -> Result<PathBuf> {
        let (min_key, max_key) = memtable
            .key_range()
            .ok_or_else(|| KestrelError::Internal("cannot write an empty memtable".into()))?;
        let path = self.unused_path(min_key, max_key, reserved);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".");
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        let written = persist(&tmp, &path, |writer| memtable.write_to(writer))?;

        info!(path = %path.display(), bytes = written, "Wrote disk file");
        self.add_file(&path)?;
        Ok(path)
    }

    /// First `<min>-<max>[.n]` path that is not on disk, registered, or reserved
    fn unused_path(
        &self,
        min_key: Timestamp,
        max_key: Timestamp,
        reserved: &HashSet<String>,
    ) -> PathBuf {
        let base = file_name(min_key, max_key);
        let inner = self.inner.lock();
        let mut name = base.clone();
        let mut n = 0u32;
        while inner.slots.contains_key(&name)
            || reserved.contains(&name)
            || self.dir.join(&name).exists()
        {
            n += 1;
            name = format!("{}.{}", base, n);
        }
        self.dir.join(name)
    }

    /// Unregister a file, close its handle, and delete it from disk
    pub fn remove_file(&self, name: &str) -> Result<bool> {
        let file = {
            let mut inner = self.inner.lock();
            let Some(min_key) = inner.slots.remove(name) else {
                return Ok(false);
            };
            inner.open.remove(&name.to_string());
            inner.files.remove(&(min_key, name.to_string()))
        };

        if let Some(file) = file {
            match fs::remove_file(&file.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(file = %name, "Removed disk file");
        }
        Ok(true)
    }

    /// Values in `[start, end)` across every overlapping file
    pub fn get_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<KeyValue>> {
        let candidates: Vec<DiskFile> = {
            let inner = self.inner.lock();
            inner
                .files
                .values()
                .take_while(|f| f.min_key < end)
                .filter(|f| f.overlaps(start, end))
                .cloned()
                .collect()
        };

        let mut results = Vec::new();
        for file in &candidates {
            let handle = self.handle(file)?;
            results.extend(handle.scan(file, start, end, filter)?);
        }
        Ok(results)
    }

    /// Range query against a single registered file
    pub fn query_file(
        &self,
        name: &str,
        start: Timestamp,
        end: Timestamp,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<KeyValue>> {
        let file = {
            let inner = self.inner.lock();
            inner
                .slots
                .get(name)
                .and_then(|min_key| inner.files.get(&(*min_key, name.to_string())))
                .cloned()
        };
        let Some(file) = file else {
            return Ok(Vec::new());
        };
        if !file.overlaps(start, end) {
            return Ok(Vec::new());
        }
        self.handle(&file)?.scan(&file, start, end, filter)
    }

    /// Cached handle for a file, opening it on a miss
    fn handle(&self, file: &DiskFile) -> Result<Arc<TableHandle>> {
        if let Some(handle) = self.inner.lock().open.get(&file.name) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(TableHandle::open(&file.path)?);
        debug!(file = %file.name, "Opened disk file");
        self.inner.lock().cache_handle(&file.name, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().slots.contains_key(name)
    }

    /// Number of registered files
    pub fn len(&self) -> usize {
        self.inner.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.inner.lock().open.len()
    }

    /// Names of open files, least recently used first
    pub fn open_files(&self) -> Vec<String> {
        self.inner.lock().open.keys().cloned().collect()
    }

    /// Registered files in `min_key` order
    pub fn files(&self) -> Vec<DiskFile> {
        self.inner.lock().files.values().cloned().collect()
    }

    /// Union of every registered file's key range
    pub fn key_range(&self) -> Option<(Timestamp, Timestamp)> {
        let inner = self.inner.lock();
        let min_key = inner.files.values().next()?.min_key;
        let max_key = inner.files.values().map(|f| f.max_key).max()?;
        Some((min_key, max_key))
    }

    /// Close every open handle; metadata stays registered
    pub fn close(&self) {
        let closed = self.inner.lock().open.drain();
        if !closed.is_empty() {
            debug!(handles = closed.len(), "Closed disk files");
        }
    }
}
