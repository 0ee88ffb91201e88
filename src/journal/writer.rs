//! Journal segment writer
//!
//! A segment is created with its header row and only ever appended to.
//! Every append is written, flushed and synced before it returns, so an
//! acknowledged entry survives a crash immediately afterwards.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use super::errors::{JournalError, JournalResult};
use super::record::{JournalEntry, SEGMENT_HEADER};

/// Segment file name prefix
pub const SEGMENT_PREFIX: &str = "index-journal-";

/// Segment file name extension
pub const SEGMENT_EXTENSION: &str = ".tsv";

const SEGMENT_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// Returns the segment file name for a creation time.
///
/// Names sort in creation order.
pub fn segment_file_name(created_at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        SEGMENT_PREFIX,
        created_at.format(SEGMENT_TIME_FORMAT),
        SEGMENT_EXTENSION
    )
}

/// Whether `name` looks like a journal segment
pub fn is_segment_file_name(name: &str) -> bool {
    match name
        .strip_prefix(SEGMENT_PREFIX)
        .and_then(|rest| rest.strip_suffix(SEGMENT_EXTENSION))
    {
        // YYYYMMDDTHHMMSSmmmZ
        Some(stamp) => {
            stamp.len() == 19
                && stamp.ends_with('Z')
                && stamp.as_bytes()[8] == b'T'
                && stamp
                    .bytes()
                    .enumerate()
                    .all(|(i, b)| i == 8 || i == 18 || b.is_ascii_digit())
        }
        None => false,
    }
}

/// Writer for the active segment
#[derive(Debug)]
pub struct SegmentWriter {
    path: PathBuf,
    created_at: DateTime<Utc>,
    file: File,
    entries_written: u64,
}

impl SegmentWriter {
    /// Creates a new segment in `dir` named after the current time.
    ///
    /// If a segment with that name already exists (two rotations within the
    /// same millisecond), the timestamp is bumped until the name is free.
    pub fn create(dir: &Path) -> JournalResult<Self> {
        Self::create_after(dir, None)
    }

    /// Like [`create`](Self::create), but the new segment is named strictly
    /// after `previous` so replay order follows rotation order.
    pub fn create_after(dir: &Path, previous: Option<DateTime<Utc>>) -> JournalResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                JournalError::rotate_failed(
                    format!("Failed to create journal directory: {}", dir.display()),
                    e,
                )
            })?;
        }

        let mut created_at = Utc::now();
        if let Some(previous) = previous {
            if created_at <= previous {
                created_at = previous + Duration::milliseconds(1);
            }
        }
        let mut path = dir.join(segment_file_name(created_at));
        while path.exists() {
            created_at = created_at + Duration::milliseconds(1);
            path = dir.join(segment_file_name(created_at));
        }

        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                JournalError::rotate_failed(
                    format!("Failed to create journal segment: {}", path.display()),
                    e,
                )
            })?;

        file.write_all(format!("{}\n", SEGMENT_HEADER).as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                JournalError::rotate_failed(
                    format!("Failed to write segment header: {}", path.display()),
                    e,
                )
            })?;

        // Make the new directory entry durable
        if let Ok(dir_handle) = File::open(dir) {
            let _ = dir_handle.sync_all();
        }

        Ok(Self {
            path,
            created_at,
            file,
            entries_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time encoded in the segment name
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of entries appended through this writer
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Appends one entry and syncs it to disk.
    pub fn append(&mut self, entry: &JournalEntry) -> JournalResult<()> {
        let mut line = entry.encode()?;
        line.push('\n');

        // Single write per entry
        self.file.write_all(line.as_bytes()).map_err(|e| {
            JournalError::append_failed(
                format!("Failed to write {} entry for {}", entry.op, entry.uuid),
                e,
            )
        })?;

        self.file.sync_data().map_err(|e| {
            JournalError::append_failed(
                format!("Failed to sync {} entry for {}", entry.op, entry.uuid),
                e,
            )
        })?;

        self.entries_written += 1;
        Ok(())
    }

    /// Syncs and closes the segment, returning its path.
    pub fn seal(self) -> JournalResult<PathBuf> {
        self.file.sync_all().map_err(|e| {
            JournalError::append_failed(
                format!("Failed to sync sealed segment: {}", self.path.display()),
                e,
            )
        })?;
        Ok(self.path)
    }
}
