//! Durability journal for index mutations
//!
//! The search backend makes soft-committed writes visible long before they
//! are durable. The journal records every mutation applied since the last
//! hard commit so that a backend (or process) restart can be healed by
//! replaying it.
//!
//! # Segments
//!
//! The journal is a directory of segment files. Exactly one segment is
//! active (writable) at a time; all others are sealed.
//!
//! ```text
//! Active -> Sealed (rotate) -> Replayed or Checkpointed -> Deleted
//! ```
//!
//! - Rotation opens the replacement before the predecessor is sealed
//! - A sealed segment is never written again
//! - A sealed segment is deleted only after full replay or after a hard
//!   commit that subsumes it

mod errors;
mod reader;
mod record;
mod writer;

pub use errors::{JournalError, JournalErrorCode, JournalResult};
pub use reader::SegmentReader;
pub use record::{JournalEntry, JournalOp, JournalPayload, SEGMENT_HEADER};
pub use writer::{
    is_segment_file_name, segment_file_name, SegmentWriter, SEGMENT_EXTENSION, SEGMENT_PREFIX,
};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

/// Segmented, append-only journal rooted at one directory
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    active: Mutex<Option<SegmentWriter>>,
}

impl Journal {
    /// Creates a journal handle. Nothing is opened until
    /// [`open_active`](Self::open_active).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            active: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the journal directory if missing
    pub fn prepare(&self) -> JournalResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            JournalError::rotate_failed(
                format!("Failed to create journal directory: {}", self.dir.display()),
                e,
            )
        })
    }

    fn active(&self) -> MutexGuard<'_, Option<SegmentWriter>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.active().is_some()
    }

    pub fn active_path(&self) -> Option<PathBuf> {
        self.active().as_ref().map(|w| w.path().to_path_buf())
    }

    /// Entries appended to the active segment so far
    pub fn active_entries(&self) -> u64 {
        self.active().as_ref().map_or(0, |w| w.entries_written())
    }

    /// Opens a fresh active segment.
    ///
    /// Equivalent to [`rotate`](Self::rotate) when a segment is already
    /// active.
    pub fn open_active(&self) -> JournalResult<PathBuf> {
        self.rotate()?;
        self.active_path()
            .ok_or_else(JournalError::no_active_segment)
    }

    /// Appends an entry to the active segment and syncs it.
    ///
    /// Concurrent appends are serialized; each holds the lock for one
    /// record write.
    pub fn append(&self, entry: &JournalEntry) -> JournalResult<()> {
        let mut active = self.active();
        match active.as_mut() {
            Some(writer) => writer.append(entry),
            None => Err(JournalError::no_active_segment()),
        }
    }

    /// Introduces a new active segment and seals the previous one.
    ///
    /// Returns the sealed segment's path, or `None` if no segment was
    /// active. If the replacement cannot be created the current segment
    /// stays active.
    pub fn rotate(&self) -> JournalResult<Option<PathBuf>> {
        let mut active = self.active();

        let previous_created = active.as_ref().map(|w| w.created_at());
        let replacement = SegmentWriter::create_after(&self.dir, previous_created)?;
        let replacement_path = replacement.path().to_path_buf();

        let sealed = match active.replace(replacement) {
            Some(previous) => {
                let path = previous.seal()?;
                info!(
                    event = "JOURNAL_ROTATED",
                    sealed = %path.display(),
                    active = %replacement_path.display(),
                    "journal segment sealed"
                );
                Some(path)
            }
            None => {
                info!(
                    event = "JOURNAL_OPENED",
                    active = %replacement_path.display(),
                    "journal segment opened"
                );
                None
            }
        };

        Ok(sealed)
    }

    /// Seals the active segment without opening a replacement.
    pub fn close(&self) -> JournalResult<Option<PathBuf>> {
        let mut active = self.active();
        match active.take() {
            Some(writer) => {
                let path = writer.seal()?;
                debug!(event = "JOURNAL_CLOSED", sealed = %path.display());
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    /// Lists every segment file except the active one, oldest first.
    pub fn sealed_segments(&self) -> JournalResult<Vec<PathBuf>> {
        let active = self.active();
        let active_path = active.as_ref().map(|w| w.path());

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(JournalError::read_failed(
                    format!("Failed to list journal directory: {}", self.dir.display()),
                    e,
                ))
            }
        };

        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                JournalError::read_failed(
                    format!("Failed to list journal directory: {}", self.dir.display()),
                    e,
                )
            })?;
            let path = entry.path();
            let is_segment = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(is_segment_file_name)
                .unwrap_or(false);
            if is_segment && Some(path.as_path()) != active_path && path.is_file() {
                segments.push(path);
            }
        }

        segments.sort();
        Ok(segments)
    }

    /// Deletes one sealed segment. Refuses to delete the active segment.
    pub fn remove_segment(&self, path: &Path) -> JournalResult<()> {
        if self.active_path().as_deref() == Some(path) {
            return Err(JournalError::read_failed(
                format!("Refusing to delete active segment: {}", path.display()),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "segment is active"),
            ));
        }

        match fs::remove_file(path) {
            Ok(()) => {
                debug!(event = "JOURNAL_SEGMENT_DELETED", segment = %path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JournalError::read_failed(
                format!("Failed to delete segment: {}", path.display()),
                e,
            )),
        }
    }

    /// Deletes every sealed segment, returning how many were removed.
    ///
    /// Only valid after a hard commit that covers all of them.
    pub fn remove_sealed_segments(&self) -> JournalResult<usize> {
        let mut removed = 0;
        for path in self.sealed_segments()? {
            match self.remove_segment(&path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(event = "JOURNAL_SEGMENT_DELETE_FAILED", error = %e);
                    return Err(e);
                }
            }
        }
        Ok(removed)
    }
}
