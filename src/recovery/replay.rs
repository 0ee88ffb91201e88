//! Journal segment replay
//!
//! Replays one sealed segment in entry order against an [`EntryApply`]
//! target. Every apply is idempotent, so replaying a segment that was
//! already (partially) applied converges on the same document set.
//!
//! - Undecodable lines are logged and skipped
//! - Entries the target rejects are logged and skipped
//! - Transient target failures abort the segment so it is kept for retry

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::IndexResult;
use crate::journal::{JournalEntry, JournalOp, SegmentReader};

/// Target of a replay
#[async_trait]
pub trait EntryApply: Send + Sync {
    /// Apply one entry. Need not be visible until [`flush`](Self::flush).
    async fn apply(&self, entry: JournalEntry) -> IndexResult<()>;

    /// Make everything applied so far visible (end of segment)
    async fn flush(&self) -> IndexResult<()>;

    /// Make everything applied so far durable (end of recovery)
    async fn checkpoint(&self) -> IndexResult<()>;
}

/// Statistics from replaying one or more segments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub segments: u64,
    pub entries_applied: u64,
    /// Malformed lines and rejected entries
    pub entries_skipped: u64,
    pub adds: u64,
    pub commits: u64,
    pub storage_updates: u64,
    pub deletes: u64,
}

impl ReplayStats {
    pub fn merge(&mut self, other: &ReplayStats) {
        self.segments += other.segments;
        self.entries_applied += other.entries_applied;
        self.entries_skipped += other.entries_skipped;
        self.adds += other.adds;
        self.commits += other.commits;
        self.storage_updates += other.storage_updates;
        self.deletes += other.deletes;
    }
}

/// Replays sealed journal segments
pub struct SegmentReplayer;

impl SegmentReplayer {
    /// Replays every entry of `path` against `target`, then flushes.
    pub async fn replay<A: EntryApply + ?Sized>(
        path: &Path,
        target: &A,
    ) -> IndexResult<ReplayStats> {
        let mut reader = SegmentReader::open(path)?;
        let mut stats = ReplayStats {
            segments: 1,
            ..ReplayStats::default()
        };

        loop {
            let entry = match reader.read_next() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) if e.is_entry_local() => {
                    warn!(
                        event = "REPLAY_ENTRY_SKIPPED",
                        segment = %path.display(),
                        line = reader.line_number(),
                        error = %e
                    );
                    stats.entries_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let op = entry.op;
            let uuid = entry.uuid;
            match target.apply(entry).await {
                Ok(()) => {
                    stats.entries_applied += 1;
                    match op {
                        JournalOp::Add => stats.adds += 1,
                        JournalOp::MarkCommitted => stats.commits += 1,
                        JournalOp::UpdateStorageLocation => stats.storage_updates += 1,
                        JournalOp::Delete => stats.deletes += 1,
                    }
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(
                        event = "REPLAY_ENTRY_REJECTED",
                        segment = %path.display(),
                        line = reader.line_number(),
                        op = %op,
                        uuid = %uuid,
                        error = %e
                    );
                    stats.entries_skipped += 1;
                }
            }
        }

        target.flush().await?;
        debug!(
            event = "REPLAY_SEGMENT_COMPLETE",
            segment = %path.display(),
            applied = stats.entries_applied,
            skipped = stats.entries_skipped
        );
        Ok(stats)
    }
}
