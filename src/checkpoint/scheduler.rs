//! Background checkpoint scheduler
//!
//! Each run:
//! 1. Ping the backend and derive its start time from its uptime
//! 2. If the backend restarted since the last run, recover: hold off
//!    mutations, rotate the journal, replay every sealed segment,
//!    hard-commit, delete them
//! 3. Otherwise skip when nothing was mutated since the last checkpoint
//! 4. Otherwise rotate the journal, hard-commit, and delete every sealed
//!    segment. A failed hard commit keeps the segments for the next run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::IndexResult;
use crate::index::IndexInner;
use crate::recovery::ReplayStats;

/// What one scheduler run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Nothing mutated since the last checkpoint
    Skipped,
    /// Journal rotated and backend hard-committed
    Checkpointed {
        sealed: Option<PathBuf>,
        deleted: usize,
    },
    /// Backend restart detected and healed from the journal
    Recovered { replayed: ReplayStats },
}

/// Periodic hard commits and restart detection
#[derive(Debug)]
pub struct CheckpointScheduler {
    inner: Arc<IndexInner>,
    /// Backend start time as of the last successful ping
    last_backend_start: Option<DateTime<Utc>>,
    /// A detected restart whose recovery has not completed yet
    recovery_pending: bool,
}

impl CheckpointScheduler {
    pub(crate) fn new(inner: Arc<IndexInner>) -> Self {
        Self {
            inner,
            last_backend_start: None,
            recovery_pending: false,
        }
    }

    pub fn last_backend_start(&self) -> Option<DateTime<Utc>> {
        self.last_backend_start
    }

    /// Pings the backend and records its start time. Returns whether it
    /// started later than previously observed (beyond the slop window).
    pub(crate) async fn observe_backend(&mut self) -> IndexResult<bool> {
        let status = self.inner.backend.ping().await?;
        let uptime = chrono::Duration::from_std(status.uptime)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let slop = chrono::Duration::from_std(self.inner.config.restart_slop())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let started = Utc::now() - uptime;

        let restarted = match self.last_backend_start {
            Some(previous) if started > previous + slop => {
                warn!(
                    event = "BACKEND_RESTART_DETECTED",
                    previous_start = %previous,
                    current_start = %started
                );
                true
            }
            _ => false,
        };

        self.last_backend_start = Some(started);
        Ok(restarted)
    }

    /// Runs one checkpoint cycle.
    pub async fn run_once(&mut self) -> IndexResult<CheckpointOutcome> {
        match self.observe_backend().await {
            Ok(true) => self.recovery_pending = true,
            Ok(false) => {}
            Err(e) => {
                warn!(event = "CHECKPOINT_FAILED", stage = "ping", error = %e);
                return Err(e);
            }
        }

        if self.recovery_pending {
            return self.recover().await;
        }

        if !self.inner.take_dirty() {
            debug!(event = "CHECKPOINT_SKIPPED");
            return Ok(CheckpointOutcome::Skipped);
        }

        let started = Instant::now();
        let sealed = match self.inner.journal.rotate() {
            Ok(sealed) => sealed,
            Err(e) => {
                self.inner.mark_dirty();
                warn!(event = "CHECKPOINT_FAILED", stage = "rotate", error = %e);
                return Err(e.into());
            }
        };

        if let Err(e) = self.inner.backend.hard_commit().await {
            self.inner.mark_dirty();
            warn!(
                event = "CHECKPOINT_FAILED",
                stage = "hard_commit",
                error = %e,
                "sealed segments retained"
            );
            return Err(e);
        }

        let deleted = self.inner.journal.remove_sealed_segments()?;
        info!(
            event = "CHECKPOINT_COMPLETE",
            deleted,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(CheckpointOutcome::Checkpointed { sealed, deleted })
    }

    async fn recover(&mut self) -> IndexResult<CheckpointOutcome> {
        // A mutation journaled after the rotate would be overwritten by the
        // older sealed entries, so writers wait until replay is durable
        let inner = Arc::clone(&self.inner);
        let _writers = inner.exclude_writers().await;
        let was_dirty = self.inner.take_dirty();

        let result = match self.inner.journal.rotate() {
            Ok(_) => self.inner.recover_sealed().await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(replayed) => {
                self.recovery_pending = false;
                Ok(CheckpointOutcome::Recovered { replayed })
            }
            Err(e) => {
                if was_dirty {
                    self.inner.mark_dirty();
                }
                warn!(event = "CHECKPOINT_FAILED", stage = "recovery", error = %e);
                Err(e)
            }
        }
    }
}

/// Handle to the background scheduler task
#[derive(Debug)]
pub(crate) struct SchedulerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerTask {
    /// Signals the loop and waits for any in-progress run to finish
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(event = "CHECKPOINT_SCHEDULER_JOIN_FAILED", error = %e);
        }
    }

    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}

/// Starts the loop: sleep `interval`, run once, repeat until shut down.
///
/// The sleep follows each completed run, so runs never overlap.
pub(crate) fn spawn_scheduler(
    scheduler: Arc<Mutex<CheckpointScheduler>>,
    interval: Duration,
) -> SchedulerTask {
    let (shutdown, mut signal) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(event = "CHECKPOINT_SCHEDULER_STARTED", interval_ms = interval.as_millis() as u64);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = signal.changed() => {}
            }
            if *signal.borrow() || signal.has_changed().is_err() {
                break;
            }

            if let Err(e) = scheduler.lock().await.run_once().await {
                debug!(event = "CHECKPOINT_RUN_FAILED", error = %e, "retrying next tick");
            }
        }
        info!(event = "CHECKPOINT_SCHEDULER_STOPPED");
    });

    SchedulerTask { shutdown, handle }
}
