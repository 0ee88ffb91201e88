//! # AU Size Aggregates
//!
//! Per-AU byte totals are expensive (two backend aggregations plus a
//! byte-storage walk) and read often. They are persisted externally and
//! recomputed at most once per key at a time.

mod cache;
mod store;

pub use cache::AuSizeCache;
pub use store::{AuSizeStore, ByteStorage, MemoryAuSizeStore, MemoryByteStorage};
