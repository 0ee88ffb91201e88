//! Journal recovery
//!
//! Heals the search backend after a restart by replaying the journal
//! segments retained since the last hard commit.
//!
//! Runs at startup (leftover segments from the previous process) and when
//! the checkpoint scheduler detects that the backend restarted and lost
//! soft-committed documents.
//!
//! # Invariants
//!
//! - Segments are replayed oldest first, entries in order
//! - Replay is idempotent; replaying twice equals replaying once
//! - A segment is deleted only after replay and a successful hard commit

mod replay;
mod startup;

pub use replay::{EntryApply, ReplayStats, SegmentReplayer};
pub use startup::SegmentRecovery;
