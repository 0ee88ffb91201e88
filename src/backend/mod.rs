//! # Search Backend
//!
//! The index depends on the document-search engine only through
//! [`SearchBackend`]: query, mutate, soft commit, hard commit and ping.
//!
//! The backend has two commit horizons:
//! - soft commit: visible to queries, lost if the backend restarts
//! - hard commit: flushed to the backend's durable storage
//!
//! [`MemoryBackend`] is an in-process implementation that models both
//! horizons and a backend restart.

mod memory;
mod query;

pub use memory::MemoryBackend;
pub use query::{
    CollapseLatest, CommitMode, Field, Filter, Mutation, Query, QueryPage, SortClause, SortOrder,
    CURSOR_START,
};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::IndexResult;

/// Backend health as reported by a ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStatus {
    /// Whether the collection accepts requests
    pub ready: bool,
    /// Time since the backend process started
    pub uptime: Duration,
}

/// Backend trait for the artifact index
///
/// Errors are reported as `BackendUnavailable` (unreachable/not ready) or
/// `BackendRejected` (non-success status).
#[async_trait]
pub trait SearchBackend: Send + Sync + std::fmt::Debug {
    /// Run one page of a query
    async fn query(&self, query: &Query) -> IndexResult<QueryPage>;

    /// Apply mutations in order with the given commit mode
    async fn mutate(&self, mutations: &[Mutation], commit: CommitMode) -> IndexResult<()>;

    /// Make all applied mutations visible
    async fn soft_commit(&self) -> IndexResult<()>;

    /// Make all applied mutations durable
    async fn hard_commit(&self) -> IndexResult<()>;

    /// Readiness and uptime
    async fn ping(&self) -> IndexResult<BackendStatus>;
}
