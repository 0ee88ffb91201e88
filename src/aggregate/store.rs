//! External seams the size cache depends on

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::artifact::{AuKey, AuSize};
use crate::error::IndexResult;

/// Persisted AU size aggregates (a relational table in production)
#[async_trait]
pub trait AuSizeStore: Send + Sync + Debug {
    async fn get(&self, key: &AuKey) -> IndexResult<Option<AuSize>>;

    async fn put(&self, key: &AuKey, size: AuSize) -> IndexResult<()>;

    /// Removes the persisted value. Deleting an absent key is not an error.
    async fn delete(&self, key: &AuKey) -> IndexResult<()>;
}

/// Byte-storage layer: how much disk an AU's content occupies
#[async_trait]
pub trait ByteStorage: Send + Sync + Debug {
    async fn au_disk_size(&self, key: &AuKey) -> IndexResult<u64>;
}

/// In-process [`AuSizeStore`]
#[derive(Debug, Default)]
pub struct MemoryAuSizeStore {
    sizes: Mutex<HashMap<AuKey, AuSize>>,
}

impl MemoryAuSizeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sizes(&self) -> MutexGuard<'_, HashMap<AuKey, AuSize>> {
        self.sizes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, key: &AuKey) -> bool {
        self.sizes().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sizes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes().is_empty()
    }
}

#[async_trait]
impl AuSizeStore for MemoryAuSizeStore {
    async fn get(&self, key: &AuKey) -> IndexResult<Option<AuSize>> {
        Ok(self.sizes().get(key).copied())
    }

    async fn put(&self, key: &AuKey, size: AuSize) -> IndexResult<()> {
        self.sizes().insert(key.clone(), size);
        Ok(())
    }

    async fn delete(&self, key: &AuKey) -> IndexResult<()> {
        self.sizes().remove(key);
        Ok(())
    }
}

/// In-process [`ByteStorage`] with settable per-AU sizes; unknown AUs
/// occupy zero bytes.
#[derive(Debug, Default)]
pub struct MemoryByteStorage {
    sizes: Mutex<HashMap<AuKey, u64>>,
}

impl MemoryByteStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_au_disk_size(&self, key: AuKey, bytes: u64) {
        self.sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, bytes);
    }
}

#[async_trait]
impl ByteStorage for MemoryByteStorage {
    async fn au_disk_size(&self, key: &AuKey) -> IndexResult<u64> {
        Ok(self
            .sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0))
    }
}
