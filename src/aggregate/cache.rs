//! Single-flight AU size cache
//!
//! Reads are served from the persisted store when possible. On a miss, all
//! concurrent readers of one key share a single in-flight recomputation.
//!
//! Invalidation deletes the persisted value and marks any in-flight
//! computation stale; a stale result is still handed to its waiters but is
//! never persisted.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::store::AuSizeStore;
use crate::artifact::{AuKey, AuSize};
use crate::error::IndexResult;

#[derive(Debug, Default)]
struct Flight {
    result: OnceCell<IndexResult<AuSize>>,
    stale: AtomicBool,
}

/// Memoized, single-flight AU size lookups
#[derive(Debug)]
pub struct AuSizeCache {
    store: Arc<dyn AuSizeStore>,
    in_flight: Mutex<HashMap<AuKey, Arc<Flight>>>,
    /// Keys invalidated with nothing persisted since
    recently_invalidated: Mutex<LruCache<AuKey, ()>>,
}

impl AuSizeCache {
    pub fn new(store: Arc<dyn AuSizeStore>, invalidation_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(invalidation_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
            recently_invalidated: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<AuKey, Arc<Flight>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recently_invalidated(&self) -> MutexGuard<'_, LruCache<AuKey, ()>> {
        self.recently_invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of keys with a computation in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Returns the size for `key`, running `compute` only if no persisted
    /// value exists and no other caller is already computing it.
    pub async fn get<F, Fut>(&self, key: &AuKey, compute: F) -> IndexResult<AuSize>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IndexResult<AuSize>>,
    {
        if let Some(size) = self.store.get(key).await? {
            return Ok(size);
        }

        let flight = {
            let mut in_flight = self.in_flight();
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };

        flight
            .result
            .get_or_init(|| async {
                debug!(event = "AU_SIZE_RECOMPUTE", au = %key);
                let computed = compute().await;
                if let Ok(size) = &computed {
                    self.persist(key, &flight, *size).await;
                }
                self.retire(key, &flight);
                computed
            })
            .await
            .clone()
    }

    async fn persist(&self, key: &AuKey, flight: &Flight, size: AuSize) {
        if flight.stale.load(Ordering::SeqCst) {
            debug!(event = "AU_SIZE_STALE", au = %key, "discarding result invalidated in flight");
            return;
        }

        // Cleared before the put: any invalidation from here on must reach
        // the store rather than be debounced
        self.recently_invalidated().pop(key);

        if let Err(e) = self.store.put(key, size).await {
            warn!(event = "AU_SIZE_PERSIST_FAILED", au = %key, error = %e);
            return;
        }

        // An invalidation may have raced the put
        if flight.stale.load(Ordering::SeqCst) {
            if let Err(e) = self.store.delete(key).await {
                warn!(event = "AU_SIZE_PERSIST_FAILED", au = %key, error = %e);
            }
        }
    }

    fn retire(&self, key: &AuKey, flight: &Arc<Flight>) {
        let mut in_flight = self.in_flight();
        if in_flight
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current, flight))
        {
            in_flight.remove(key);
        }
    }

    /// Drops the persisted value for `key`. Idempotent.
    ///
    /// The store delete is skipped when the key was already invalidated and
    /// nothing has been persisted since.
    pub async fn invalidate(&self, key: &AuKey) -> IndexResult<()> {
        if let Some(flight) = self.in_flight().remove(key) {
            flight.stale.store(true, Ordering::SeqCst);
        }

        if self.recently_invalidated().contains(key) {
            return Ok(());
        }

        self.store.delete(key).await?;
        self.recently_invalidated().put(key.clone(), ());
        Ok(())
    }
}
