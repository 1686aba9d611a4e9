//! WAL writer implementation

use super::{encode_frame, list_segments, segment_name, SyncPolicy};
use crate::{Entry, KestrelError, Result};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// WAL writer appending framed entries to the current segment
///
/// Frames go straight to the file without user-space buffering; durability
/// beyond the OS page cache depends on the sync policy.
pub struct WalWriter {
    dir: PathBuf,
    sync_policy: SyncPolicy,
    inner: Mutex<WalWriterInner>,
}

struct WalWriterInner {
    file: File,
    segment_id: u64,
    bytes_written: u64,
    writes_since_sync: usize,
    /// Set when a torn frame could not be cut off; cleared by a new segment
    torn: bool,
}

/// Append target that can be cut back to a known length
trait SegmentFile: Write {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl SegmentFile for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write a whole frame, or leave the segment exactly `committed` bytes long
///
/// On failure the flag next to the error reports whether the segment was
/// restored.
fn write_frame<F: SegmentFile>(
    file: &mut F,
    frame: &[u8],
    committed: u64,
) -> std::result::Result<(), (io::Error, bool)> {
    let err = match file.write_all(frame) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    match file.truncate_to(committed) {
        Ok(()) => {
            warn!(error = %err, len = committed, "WAL append failed, cut off partial frame");
            Err((err, true))
        }
        Err(rollback) => {
            error!(
                error = %err,
                rollback = %rollback,
                "WAL append failed and partial frame could not be removed"
            );
            Err((err, false))
        }
    }
}

impl WalWriter {
    /// Open the newest segment in `dir` for appending, creating one if none exist
    pub fn open(dir: impl AsRef<Path>, sync_policy: SyncPolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let segment_id = list_segments(&dir)?
            .last()
            .map(|(id, _)| *id)
            .unwrap_or(0);
        let file = Self::open_segment(&dir, segment_id)?;
        let bytes_written = file.metadata()?.len();

        Ok(Self {
            dir,
            sync_policy,
            inner: Mutex::new(WalWriterInner {
                file,
                segment_id,
                bytes_written,
                writes_since_sync: 0,
                torn: false,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append an entry; returns the frame size in bytes
    ///
    /// A failed write never leaves a partial frame behind. If the segment
    /// cannot be cut back, appends fail until the next rotation.
    pub fn append(&self, entry: &Entry) -> Result<usize> {
        let frame = encode_frame(entry)?;
        let mut inner = self.inner.lock();
        if inner.torn {
            return Err(KestrelError::Internal(format!(
                "WAL segment {} ends in a partial frame",
                inner.segment_id
            )));
        }

        let committed = inner.bytes_written;
        if let Err((err, restored)) = write_frame(&mut inner.file, &frame, committed) {
            inner.torn = !restored;
            return Err(err.into());
        }
        inner.bytes_written += frame.len() as u64;
        inner.writes_since_sync += 1;

        if self.should_sync(&inner) {
            inner.file.sync_data()?;
            inner.writes_since_sync = 0;
        }

        Ok(frame.len())
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_data()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Get current segment ID
    pub fn current_segment(&self) -> u64 {
        self.inner.lock().segment_id
    }

    /// Bytes appended to the current segment
    pub fn segment_size(&self) -> u64 {
        self.inner.lock().bytes_written
    }

    /// Switch appends to a new segment; returns its id
    ///
    /// Everything before the returned id belongs to data written before the
    /// rotation.
    pub fn rotate(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.file.sync_data()?;

        let segment_id = inner.segment_id + 1;
        inner.file = Self::open_segment(&self.dir, segment_id)?;
        inner.segment_id = segment_id;
        inner.bytes_written = 0;
        inner.writes_since_sync = 0;
        inner.torn = false;

        debug!(segment = segment_id, "Rotated WAL segment");
        Ok(segment_id)
    }

    /// Delete segments older than `segment_id` (used after memtable flush)
    pub fn truncate_before(&self, segment_id: u64) -> Result<usize> {
        let mut truncated = 0;
        for (id, path) in list_segments(&self.dir)? {
            if id >= segment_id {
                break;
            }
            fs::remove_file(&path)?;
            truncated += 1;
        }
        if truncated > 0 {
            debug!(before = segment_id, segments = truncated, "Truncated WAL");
        }
        Ok(truncated)
    }

    /// Drop every logged entry and start over with an empty segment
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let segment_id = inner.segment_id + 1;

        for (_, path) in list_segments(&self.dir)? {
            fs::remove_file(&path)?;
        }
        inner.file = Self::open_segment(&self.dir, segment_id)?;
        inner.segment_id = segment_id;
        inner.bytes_written = 0;
        inner.writes_since_sync = 0;
        inner.torn = false;
        Ok(())
    }

    fn should_sync(&self, inner: &WalWriterInner) -> bool {
        match self.sync_policy {
            SyncPolicy::Immediate => true,
            SyncPolicy::EveryN(n) => inner.writes_since_sync >= n,
            SyncPolicy::None => false,
        }
    }

    fn open_segment(dir: &Path, segment_id: u64) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(segment_name(segment_id)))?;
        Ok(file)
    }
}
