//! Database - one storage engine instance
//!
//! Writes go to the WAL, then to the active memtable. Once the active
//! memtable reaches the configured size, the background flush worker moves
//! it into the flushing slot, installs a fresh active memtable, writes the
//! frozen one to a disk file, and uploads that file to the remote tier.
//! Reads merge the active memtable, the flushing memtable, and the disk
//! table (after filling local misses from the remote tier).

use super::StorageConfig;
use crate::memtable::Memtable;
use crate::remote::RemoteTier;
use crate::sstable::DiskTable;
use crate::wal::{WalReader, WalWriter};
use crate::{Entry, KestrelError, KeyValue, QueryFilter, Result, Timestamp};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Messages for the flush worker
enum FlushSignal {
    /// The active memtable may have crossed the threshold
    Check,
    Shutdown,
}

/// A single Kestrel storage instance
pub struct Database {
    shared: Arc<Shared>,
    signals: Sender<FlushSignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: StorageConfig,
    id: Uuid,

    // Write path
    wal: WalWriter,
    active: RwLock<Arc<Memtable>>,
    flushing: RwLock<Option<Arc<Memtable>>>,
    flush_in_progress: AtomicBool,

    // Read path
    disk: DiskTable,
    remote: Option<RemoteTier>,

    closed: AtomicBool,
}

impl Database {
    /// Open (or create) the instance described by `config`
    ///
    /// Existing disk files are registered and the WAL is replayed into the
    /// active memtable before the flush worker starts.
    pub fn open(config: StorageConfig, id: Uuid) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.work_dir)?;

        let disk = DiskTable::open(&config.work_dir, config.diskfile_cache_capacity)?;

        let wal_dir = config.wal_dir();
        let memtable = WalReader::new(&wal_dir).load()?;
        if !memtable.is_empty() {
            info!(
                entries = memtable.len(),
                bytes = memtable.size(),
                "Recovered memtable from WAL"
            );
        }
        let wal = WalWriter::open(&wal_dir, config.wal.sync_policy)?;

        let remote = config
            .remote
            .as_ref()
            .map(|remote| RemoteTier::from_config(remote, id, &config.work_dir))
            .transpose()?;

        let needs_flush = memtable.should_flush(config.memtable_size);
        let shared = Arc::new(Shared {
            config,
            id,
            wal,
            active: RwLock::new(Arc::new(memtable)),
            flushing: RwLock::new(None),
            flush_in_progress: AtomicBool::new(false),
            disk,
            remote,
            closed: AtomicBool::new(false),
        });

        let (signals, receiver) = crossbeam_channel::bounded(1);
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("kestrel-flush".into())
                .spawn(move || run_flush_worker(shared, receiver))?
        };

        info!(
            id = %shared.id,
            dir = %shared.config.work_dir.display(),
            disk_files = shared.disk.len(),
            "Opened database"
        );

        let db = Self {
            shared,
            signals,
            worker: Mutex::new(Some(worker)),
        };
        if needs_flush {
            db.notify_worker();
        }
        Ok(db)
    }

    /// Instance identifier
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn config(&self) -> &StorageConfig {
        &self.shared.config
    }

    /// Log and buffer one entry
    ///
    /// The entry is validated before anything is written; a WAL failure
    /// leaves the memtable untouched.
    pub fn insert(&self, entry: &Entry) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(KestrelError::Internal("database is closed".into()));
        }
        entry.validate()?;

        let should_flush = {
            // the read lock pins the WAL segment the entry belongs to
            let active = self.shared.active.read();
            self.shared.wal.append(entry)?;
            active.insert(entry)?;
            active.should_flush(self.shared.config.memtable_size)
        };

        if should_flush {
            self.notify_worker();
        }
        Ok(())
    }

    /// Values with `start <= key < end` from every tier, ordered by key
    ///
    /// Entries are not deduplicated across tiers.
    pub fn get_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<KeyValue>> {
        let shared = &self.shared;

        let active = shared.active.read().clone();
        let mut results = active.get_range(start, end, filter);

        let flushing = shared.flushing.read().clone();
        if let Some(flushing) = flushing {
            results.extend(flushing.get_range(start, end, filter));
        }

        if let Some(remote) = &shared.remote {
            let fetched = remote.fetch_missing(start, end, &shared.disk)?;
            if !fetched.is_empty() {
                debug!(files = fetched.len(), "Fetched remote files for query");
            }
        }
        results.extend(shared.disk.get_range(start, end, filter)?);

        results.sort_by_key(|kv| kv.key);
        Ok(results)
    }

    /// Flush the active memtable if it has reached the size threshold
    ///
    /// Returns whether this call performed a flush.
    pub fn flush_if_needed(&self) -> Result<bool> {
        self.shared.flush(false)
    }

    /// Flush the active memtable regardless of its size
    ///
    /// Returns `false` when it was empty or another flush holds the slot.
    pub fn flush(&self) -> Result<bool> {
        self.shared.flush(true)
    }

    /// Stop the flush worker and close every open file
    ///
    /// Unflushed entries stay in the WAL and are replayed on the next open.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_worker();
        self.shared.disk.close();
        self.shared.wal.sync()?;
        info!(id = %self.shared.id, "Closed database");
        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        let shared = &self.shared;
        let active = shared.active.read().clone();
        DatabaseStats {
            id: shared.id,
            active_bytes: active.size(),
            active_entries: active.len(),
            flushing: shared.flushing.read().is_some(),
            flush_in_progress: shared.flush_in_progress.load(Ordering::Acquire),
            disk_files: shared.disk.len(),
            open_handles: shared.disk.open_handles(),
            wal_segment: shared.wal.current_segment(),
        }
    }

    fn notify_worker(&self) {
        match self.signals.try_send(FlushSignal::Check) {
            // a pending check already covers this one
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                warn!("Flush worker is gone; memtable will not be flushed")
            }
        }
    }

    fn stop_worker(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if self.signals.send(FlushSignal::Shutdown).is_err() {
            debug!("Flush worker already stopped");
        }
        if worker.join().is_err() {
            error!("Flush worker panicked");
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl Shared {
    /// Swap out the active memtable and persist it
    ///
    /// At most one flush runs at a time. After a failure past the swap the
    /// frozen memtable stays readable in the flushing slot, its WAL segments
    /// are kept, and no further flush starts until the database reopens.
    fn flush(&self, force: bool) -> Result<bool> {
        let due = |memtable: &Memtable| {
            !memtable.is_empty() && (force || memtable.should_flush(self.config.memtable_size))
        };

        if !due(&**self.active.read()) {
            return Ok(false);
        }
        if self
            .flush_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already in progress");
            return Ok(false);
        }

        let (frozen, segment) = {
            let mut active = self.active.write();
            if !due(&**active) {
                self.flush_in_progress.store(false, Ordering::Release);
                return Ok(false);
            }
            let segment = match self.wal.rotate() {
                Ok(segment) => segment,
                Err(e) => {
                    self.flush_in_progress.store(false, Ordering::Release);
                    return Err(e);
                }
            };
            let frozen = Arc::clone(&active);
            // readers must find the frozen table before it leaves `active`
            *self.flushing.write() = Some(Arc::clone(&frozen));
            *active = Arc::new(Memtable::new());
            (frozen, segment)
        };

        info!(
            entries = frozen.len(),
            bytes = frozen.size(),
            blocks = frozen.block_count(),
            "Flushing memtable"
        );

        let reserved = self.remote_names();
        let path = match self.disk.write_memtable_excluding(&frozen, &reserved) {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "Flush failed; memtable kept in memory");
                return Err(e);
            }
        };

        *self.flushing.write() = None;
        self.flush_in_progress.store(false, Ordering::Release);

        if let Err(e) = self.wal.truncate_before(segment) {
            warn!(error = %e, "Failed to truncate WAL after flush");
        }
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.upload(&path) {
                warn!(path = %path.display(), error = %e, "Failed to upload disk file");
            }
        }
        Ok(true)
    }

    /// Object names already taken in the remote tier
    ///
    /// A flush must not reuse one, even when the local file is gone.
    fn remote_names(&self) -> HashSet<String> {
        let Some(remote) = &self.remote else {
            return HashSet::new();
        };
        remote.names().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list remote objects before flush");
            HashSet::new()
        })
    }
}

fn run_flush_worker(shared: Arc<Shared>, signals: Receiver<FlushSignal>) {
    debug!("Flush worker started");
    while let Ok(signal) = signals.recv() {
        match signal {
            FlushSignal::Check => loop {
                // keep going while inserts refill the table during a flush
                match shared.flush(false) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        error!(error = %e, "Background flush failed");
                        break;
                    }
                }
            },
            FlushSignal::Shutdown => break,
        }
    }
    debug!("Flush worker stopped");
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub id: Uuid,
    /// Approximate bytes buffered in the active memtable
    pub active_bytes: u64,
    pub active_entries: usize,
    /// A frozen memtable is waiting to reach disk
    pub flushing: bool,
    pub flush_in_progress: bool,
    pub disk_files: usize,
    pub open_handles: usize,
    pub wal_segment: u64,
}
