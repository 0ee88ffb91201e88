//! Checkpoint subsystem
//!
//! A checkpoint is the only mechanism that retires journal segments.
//!
//! # Algorithm
//!
//! 1. Rotate the journal (new active segment, previous one sealed)
//! 2. Hard-commit the backend
//! 3. Delete every sealed segment
//!
//! # Crash Safety
//!
//! - Crash before step 2: sealed segments are replayed at next start
//! - Hard commit fails: segments retained, next run retries
//! - Crash during step 3: leftover segments replay idempotently
//!
//! Mutations landing between steps 1 and 2 are journaled in the new
//! active segment and also covered by the hard commit; replaying them
//! later is harmless.

mod scheduler;

pub use scheduler::{CheckpointOutcome, CheckpointScheduler};
pub(crate) use scheduler::{spawn_scheduler, SchedulerTask};
