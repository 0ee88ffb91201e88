//! Version lock table
//!
//! Serializes version-creating operations per artifact stem. Each stem maps
//! to a one-permit semaphore; unrelated stems never contend.
//!
//! A slot is reference-counted by waiters plus holders and removed from the
//! table when the count reaches zero. The count is held by a reservation
//! that is released on drop, so a waiter whose `acquire` future is dropped
//! (timeout, task abort) leaves nothing behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::artifact::ArtifactStem;
use crate::error::{IndexError, IndexResult};

#[derive(Debug)]
struct Slot {
    semaphore: Arc<Semaphore>,
    holders: usize,
}

type SlotMap = Arc<Mutex<HashMap<ArtifactStem, Slot>>>;

fn slots(map: &SlotMap) -> MutexGuard<'_, HashMap<ArtifactStem, Slot>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-stem mutual exclusion
#[derive(Debug, Default, Clone)]
pub struct VersionLockTable {
    slots: SlotMap,
}

impl VersionLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other caller holds the lock for `stem`.
    ///
    /// The lock is held until the returned guard is dropped.
    pub async fn acquire(&self, stem: &ArtifactStem) -> IndexResult<VersionLockGuard> {
        stem.validate()?;

        let (semaphore, reservation) = {
            let mut slots = slots(&self.slots);
            let slot = slots.entry(stem.clone()).or_insert_with(|| Slot {
                semaphore: Arc::new(Semaphore::new(1)),
                holders: 0,
            });
            slot.holders += 1;
            (
                Arc::clone(&slot.semaphore),
                Reservation {
                    slots: Arc::clone(&self.slots),
                    stem: stem.clone(),
                },
            )
        };

        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| IndexError::InvalidState(format!("version lock for {} closed", stem)))?;

        trace!(event = "VERSION_LOCK_ACQUIRED", stem = %stem);
        Ok(VersionLockGuard {
            _permit: permit,
            reservation,
        })
    }

    /// Stems with at least one holder or waiter
    pub fn active_stems(&self) -> usize {
        slots(&self.slots).len()
    }

    pub fn is_locked(&self, stem: &ArtifactStem) -> bool {
        slots(&self.slots)
            .get(stem)
            .map_or(false, |slot| slot.semaphore.available_permits() == 0)
    }
}

/// Counts one waiter or holder of a slot
#[derive(Debug)]
struct Reservation {
    slots: SlotMap,
    stem: ArtifactStem,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut slots = slots(&self.slots);
        if let Some(slot) = slots.get_mut(&self.stem) {
            slot.holders -= 1;
            if slot.holders == 0 {
                slots.remove(&self.stem);
            }
        }
    }
}

/// Held version lock; releases on drop
#[derive(Debug)]
pub struct VersionLockGuard {
    // Field order matters: the permit is returned before the slot count
    // drops, so a removed slot never has an outstanding permit.
    _permit: OwnedSemaphorePermit,
    reservation: Reservation,
}

impl VersionLockGuard {
    pub fn stem(&self) -> &ArtifactStem {
        &self.reservation.stem
    }

    /// Releases the lock. Same as dropping the guard.
    pub fn release(self) {
        trace!(event = "VERSION_LOCK_RELEASED", stem = %self.stem());
    }
}
