//! Recovery of retained journal segments
//!
//! # Sequence (strict order)
//!
//! 1. List sealed segments, oldest first
//! 2. Replay each segment, flushing at its end
//! 3. Checkpoint (hard commit) the target
//! 4. Delete the replayed segments
//!
//! A failure before step 4 leaves every segment in place for the next
//! attempt.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info};

use super::replay::{EntryApply, ReplayStats, SegmentReplayer};
use crate::error::IndexResult;
use crate::journal::Journal;

/// Replays and retires sealed journal segments
pub struct SegmentRecovery<'a> {
    journal: &'a Journal,
}

impl<'a> SegmentRecovery<'a> {
    pub fn new(journal: &'a Journal) -> Self {
        Self { journal }
    }

    /// Recovers every sealed segment currently in the journal directory.
    pub async fn recover_all<A: EntryApply + ?Sized>(
        &self,
        target: &A,
    ) -> IndexResult<ReplayStats> {
        let segments = self.journal.sealed_segments()?;
        self.recover(&segments, target).await
    }

    /// Recovers `segments` in the order given.
    pub async fn recover<A: EntryApply + ?Sized>(
        &self,
        segments: &[PathBuf],
        target: &A,
    ) -> IndexResult<ReplayStats> {
        let mut stats = ReplayStats::default();
        if segments.is_empty() {
            return Ok(stats);
        }

        let started = Instant::now();
        info!(event = "RECOVERY_START", segments = segments.len());

        for segment in segments {
            match SegmentReplayer::replay(segment, target).await {
                Ok(segment_stats) => stats.merge(&segment_stats),
                Err(e) => {
                    error!(
                        event = "RECOVERY_FAILED",
                        segment = %segment.display(),
                        error = %e,
                        "segments retained for retry"
                    );
                    return Err(e);
                }
            }
        }

        if let Err(e) = target.checkpoint().await {
            error!(event = "RECOVERY_FAILED", error = %e, "hard commit after replay failed");
            return Err(e);
        }

        for segment in segments {
            self.journal.remove_segment(segment)?;
        }

        info!(
            event = "RECOVERY_COMPLETE",
            segments = stats.segments,
            applied = stats.entries_applied,
            skipped = stats.entries_skipped,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(stats)
    }
}
