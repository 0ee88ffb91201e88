//! Journal segment reader
//!
//! Unlike a halt-on-corruption log, a journal segment is read best-effort:
//! a line that fails to decode (typically the torn last line of a segment
//! whose writer crashed mid-append) is reported as an entry-local error and
//! reading continues with the next line.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use super::errors::{JournalError, JournalResult};
use super::record::{JournalEntry, SEGMENT_HEADER};

/// Sequential reader over one sealed segment
pub struct SegmentReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
}

impl SegmentReader {
    pub fn open(path: &Path) -> JournalResult<Self> {
        let file = File::open(path).map_err(|e| {
            JournalError::read_failed(format!("Failed to open segment: {}", path.display()), e)
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 1-based number of the last line read
    pub fn line_number(&self) -> u64 {
        self.line_no
    }

    /// Reads the next entry.
    ///
    /// - `Ok(Some(entry))` for a decoded line
    /// - `Ok(None)` at end of segment
    /// - `Err(e)` with `e.is_entry_local()` for an undecodable line; the
    ///   caller may keep reading
    /// - `Err(e)` otherwise for an I/O failure
    pub fn read_next(&mut self) -> JournalResult<Option<JournalEntry>> {
        loop {
            let line = match self.lines.next() {
                None => return Ok(None),
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    // Invalid UTF-8 is damage to a single line
                    if e.kind() == std::io::ErrorKind::InvalidData {
                        self.line_no += 1;
                        return Err(JournalError::malformed_at_line(
                            self.line_no,
                            "line is not valid UTF-8",
                        ));
                    }
                    return Err(JournalError::read_failed(
                        format!("Failed to read segment: {}", self.path.display()),
                        e,
                    ));
                }
            };
            self.line_no += 1;

            if self.line_no == 1 && line == SEGMENT_HEADER {
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            return JournalEntry::decode(&line, self.line_no).map(Some);
        }
    }
}

impl Iterator for SegmentReader {
    type Item = JournalResult<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::record::JournalOp;
    use crate::journal::writer::SegmentWriter;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_reads_entries_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(temp_dir.path()).unwrap();
        let uuid = Uuid::new_v4();
        writer.append(&JournalEntry::mark_committed(uuid)).unwrap();
        writer
            .append(&JournalEntry::update_storage_location(uuid, "file:///b"))
            .unwrap();
        writer.append(&JournalEntry::delete(uuid)).unwrap();
        let path = writer.seal().unwrap();

        let ops: Vec<JournalOp> = SegmentReader::open(&path)
            .unwrap()
            .map(|e| e.unwrap().op)
            .collect();
        assert_eq!(
            ops,
            vec![
                JournalOp::MarkCommitted,
                JournalOp::UpdateStorageLocation,
                JournalOp::Delete
            ]
        );
    }

    #[test]
    fn test_header_only_segment_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = SegmentWriter::create(temp_dir.path()).unwrap().seal().unwrap();

        let mut reader = SegmentReader::open(&path).unwrap();
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_torn_line_is_skippable() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(temp_dir.path()).unwrap();
        let first = Uuid::new_v4();
        let last = Uuid::new_v4();
        writer.append(&JournalEntry::delete(first)).unwrap();
        let path = writer.seal().unwrap();

        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"1700000000000\tADD\t").unwrap();
            file.write_all(format!("{}\t{{\"identi\n", Uuid::new_v4()).as_bytes())
                .unwrap();
            file.write_all(format!("1700000000001\tDELETE\t{}\t\n", last).as_bytes())
                .unwrap();
        }

        let mut reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().uuid, first);

        let err = reader.read_next().unwrap_err();
        assert!(err.is_entry_local());
        assert_eq!(reader.line_number(), 3);

        assert_eq!(reader.read_next().unwrap().unwrap().uuid, last);
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_missing_segment_is_read_failure() {
        let temp_dir = TempDir::new().unwrap();
        let result = SegmentReader::open(&temp_dir.path().join("gone.tsv"));
        assert!(result.is_err());
    }
}
