//! Artifact index façade
//!
//! Every mutation runs in strict order:
//!
//! 1. Apply the document mutation to the backend (soft commit)
//! 2. Append the matching journal entry, retried a bounded number of times
//! 3. Invalidate the AU size aggregate of the affected AU
//!
//! If (1) fails nothing is journaled and the call fails. If (2) exhausts its
//! retries the call still succeeds; the mutation is visible but will not
//! survive a backend restart until the next hard commit.
//!
//! Mutations share a writer gate that restart recovery and `stop` take
//! exclusively, so no mutation lands between a journal rotation and the
//! replay of the segments it sealed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::filter::{ArtifactFilter, ArtifactVersions};
use super::lifecycle::{wait_for_backend, IndexState};
use super::pager::{ArtifactCursor, LatestVersions, QueryPager};
use crate::aggregate::{AuSizeCache, AuSizeStore, ByteStorage};
use crate::artifact::{require_non_empty, require_uuid, Artifact, ArtifactStem, AuKey, AuSize};
use crate::backend::{CommitMode, Field, Filter, Mutation, Query, SearchBackend};
use crate::checkpoint::{spawn_scheduler, CheckpointOutcome, CheckpointScheduler, SchedulerTask};
use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::journal::{Journal, JournalEntry, JournalOp, JournalPayload};
use crate::locks::{VersionLockGuard, VersionLockTable};
use crate::recovery::{EntryApply, ReplayStats, SegmentRecovery};

/// State shared between the façade and the checkpoint scheduler
#[derive(Debug)]
pub(crate) struct IndexInner {
    pub(crate) config: IndexConfig,
    pub(crate) backend: Arc<dyn SearchBackend>,
    pub(crate) journal: Journal,
    sizes: AuSizeCache,
    byte_storage: Arc<dyn ByteStorage>,
    /// Set by every soft-committed mutation, cleared by a checkpoint
    dirty: AtomicBool,
    /// Shared by façade mutations; exclusive during restart recovery and stop
    writers: RwLock<()>,
}

impl IndexInner {
    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Clears the dirty flag, returning whether it was set
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Waits for in-flight mutations to finish and holds off new ones until
    /// the guard is dropped
    pub(crate) async fn exclude_writers(&self) -> RwLockWriteGuard<'_, ()> {
        self.writers.write().await
    }

    async fn lookup(&self, uuid: Uuid) -> IndexResult<Option<Artifact>> {
        let page = self
            .backend
            .query(&Query::new(vec![Filter::Uuid(uuid)]).with_rows(1))
            .await?;
        Ok(page.documents.into_iter().next())
    }

    async fn first_match(&self, query: Query) -> IndexResult<Option<Artifact>> {
        let page = self.backend.query(&query.with_rows(1)).await?;
        Ok(page.documents.into_iter().next())
    }

    async fn append_with_retry(&self, entry: &JournalEntry) {
        let attempts = self.config.journal_append_attempts.max(1);
        for attempt in 1..=attempts {
            match self.journal.append(entry) {
                Ok(()) => return,
                Err(e) if attempt < attempts => {
                    warn!(
                        event = "JOURNAL_APPEND_RETRY",
                        op = %entry.op,
                        uuid = %entry.uuid,
                        attempt,
                        error = %e
                    );
                    tokio::time::sleep(self.config.journal_retry_delay()).await;
                }
                Err(e) => {
                    error!(
                        event = "JOURNAL_APPEND_FAILED",
                        op = %entry.op,
                        uuid = %entry.uuid,
                        attempts,
                        error = %e,
                        "mutation applied but not journaled"
                    );
                }
            }
        }
    }

    async fn invalidate_au(&self, key: &AuKey) {
        if let Err(e) = self.sizes.invalidate(key).await {
            error!(event = "AU_SIZE_INVALIDATE_FAILED", au = %key, error = %e);
        }
    }

    /// Backend mutation, journal entry, size invalidation
    async fn mutate(&self, mutation: Mutation, entry: JournalEntry, au: &AuKey) -> IndexResult<()> {
        self.backend
            .mutate(std::slice::from_ref(&mutation), CommitMode::Soft)
            .await?;
        self.mark_dirty();
        self.append_with_retry(&entry).await;
        self.invalidate_au(au).await;
        Ok(())
    }

    async fn compute_au_size(&self, key: &AuKey) -> IndexResult<AuSize> {
        let committed = || {
            Query::new(vec![
                Filter::Namespace(key.namespace.clone()),
                Filter::Auid(key.auid.clone()),
                Filter::Committed(true),
            ])
            .summing_content_length()
        };

        let all = self.backend.query(&committed()).await?;
        let latest = self.backend.query(&committed().collapsed()).await?;
        let disk = self.byte_storage.au_disk_size(key).await?;

        Ok(AuSize {
            total_all_versions: all.content_length_sum.unwrap_or(0),
            total_latest_versions: latest.content_length_sum.unwrap_or(0),
            total_disk_size: disk,
        })
    }

    /// Replays, hard-commits and deletes every sealed segment
    pub(crate) async fn recover_sealed(&self) -> IndexResult<ReplayStats> {
        SegmentRecovery::new(&self.journal)
            .recover_all(&IndexReplay::new(self))
            .await
    }
}

/// Replay target: applies entries without journaling them again.
///
/// Replayed mutations only become visible at `flush`, so the AUs they touch
/// are invalidated there rather than as each entry is applied.
struct IndexReplay<'a> {
    inner: &'a IndexInner,
    touched: Mutex<HashSet<AuKey>>,
}

impl<'a> IndexReplay<'a> {
    fn new(inner: &'a IndexInner) -> Self {
        Self {
            inner,
            touched: Mutex::new(HashSet::new()),
        }
    }

    fn touch(&self, key: AuKey) {
        self.touched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }
}

#[async_trait]
impl EntryApply for IndexReplay<'_> {
    async fn apply(&self, entry: JournalEntry) -> IndexResult<()> {
        let uuid = entry.uuid;
        let mutation = match (entry.op, entry.payload) {
            (JournalOp::Add, JournalPayload::Artifact(artifact)) => {
                self.touch(artifact.au_key());
                Mutation::Upsert(artifact)
            }
            (JournalOp::MarkCommitted, _) => Mutation::SetCommitted(uuid),
            (JournalOp::UpdateStorageLocation, JournalPayload::StorageUrl(storage_url)) => {
                Mutation::SetStorageUrl { uuid, storage_url }
            }
            (JournalOp::Delete, _) => Mutation::Delete(uuid),
            (op, _) => {
                return Err(IndexError::InvalidArgument(format!(
                    "{} entry for {} has no usable payload",
                    op, uuid
                )))
            }
        };

        if !matches!(mutation, Mutation::Upsert(_)) {
            if let Some(current) = self.inner.lookup(uuid).await? {
                self.touch(current.au_key());
            }
        }

        self.inner.backend.mutate(&[mutation], CommitMode::None).await
    }

    async fn flush(&self) -> IndexResult<()> {
        self.inner.backend.soft_commit().await?;

        let touched: Vec<AuKey> = {
            let mut touched = self.touched.lock().unwrap_or_else(PoisonError::into_inner);
            touched.drain().collect()
        };
        for key in &touched {
            self.inner.invalidate_au(key).await;
        }
        Ok(())
    }

    async fn checkpoint(&self) -> IndexResult<()> {
        self.inner.backend.hard_commit().await
    }
}

/// Journaled, lock-aware façade over a [`SearchBackend`]
#[derive(Debug)]
pub struct ArtifactIndex {
    inner: Arc<IndexInner>,
    locks: VersionLockTable,
    state: Mutex<IndexState>,
    scheduler: Arc<tokio::sync::Mutex<CheckpointScheduler>>,
    task: Mutex<Option<SchedulerTask>>,
}

impl ArtifactIndex {
    pub fn new(
        config: IndexConfig,
        backend: Arc<dyn SearchBackend>,
        size_store: Arc<dyn AuSizeStore>,
        byte_storage: Arc<dyn ByteStorage>,
    ) -> IndexResult<Self> {
        config.validate()?;

        let inner = Arc::new(IndexInner {
            journal: Journal::new(&config.journal_dir),
            sizes: AuSizeCache::new(size_store, config.invalidation_cache_capacity),
            config,
            backend,
            byte_storage,
            dirty: AtomicBool::new(false),
            writers: RwLock::new(()),
        });
        let scheduler = CheckpointScheduler::new(Arc::clone(&inner));

        Ok(Self {
            inner,
            locks: VersionLockTable::new(),
            state: Mutex::new(IndexState::Stopped),
            scheduler: Arc::new(tokio::sync::Mutex::new(scheduler)),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    pub fn journal(&self) -> &Journal {
        &self.inner.journal
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.inner.backend
    }

    /// Whether a mutation has been applied since the last checkpoint
    pub fn has_uncheckpointed_mutations(&self) -> bool {
        self.inner.is_dirty()
    }

    fn state_guard(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> IndexState {
        *self.state_guard()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == IndexState::Running
    }

    /// Admits one mutation. The returned guard must be held until the
    /// mutation is journaled.
    async fn begin_mutation(&self) -> IndexResult<RwLockReadGuard<'_, ()>> {
        let writer = self.inner.writers.read().await;
        self.require_running()?;
        Ok(writer)
    }

    fn require_running(&self) -> IndexResult<()> {
        match self.state() {
            IndexState::Running => Ok(()),
            other => Err(IndexError::InvalidState(format!(
                "index is {}; mutations require a running index",
                other
            ))),
        }
    }

    // ==================
    // Lifecycle
    // ==================

    /// Prepares the journal directory and waits for the backend to become
    /// ready. Retries the backend indefinitely.
    pub async fn init(&self) -> IndexResult<()> {
        let state = self.state();
        if state != IndexState::Stopped {
            return Err(IndexError::InvalidState(format!("cannot init a {} index", state)));
        }

        self.inner.journal.prepare()?;
        wait_for_backend(self.inner.backend.as_ref(), &self.inner.config).await;

        *self.state_guard() = IndexState::Initialized;
        info!(
            event = "INDEX_INITIALIZED",
            journal_dir = %self.inner.config.journal_dir.display()
        );
        Ok(())
    }

    /// Replays leftover segments, opens a fresh active segment and starts
    /// the checkpoint scheduler.
    pub async fn start(&self) -> IndexResult<()> {
        let state = self.state();
        if state != IndexState::Initialized {
            return Err(IndexError::InvalidState(format!("cannot start a {} index", state)));
        }

        let replayed = self.inner.recover_sealed().await?;
        self.inner.journal.open_active()?;

        {
            let mut scheduler = self.scheduler.lock().await;
            if let Err(e) = scheduler.observe_backend().await {
                warn!(event = "BACKEND_PING_FAILED", error = %e);
            }
        }

        let task = spawn_scheduler(
            Arc::clone(&self.scheduler),
            self.inner.config.checkpoint_interval(),
        );
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        *self.state_guard() = IndexState::Running;

        info!(
            event = "INDEX_STARTED",
            replayed_segments = replayed.segments,
            replayed_entries = replayed.entries_applied
        );
        Ok(())
    }

    /// Stops the scheduler, waits for in-flight mutations and closes the
    /// journal. With
    /// `final_checkpoint_on_stop`, a last hard commit retires every segment.
    pub async fn stop(&self) -> IndexResult<()> {
        let previous = std::mem::replace(&mut *self.state_guard(), IndexState::Stopped);
        if previous == IndexState::Stopped {
            return Ok(());
        }

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.shutdown().await;
        }

        let _drained = self.inner.exclude_writers().await;
        self.inner.journal.close()?;

        if previous == IndexState::Running && self.inner.config.final_checkpoint_on_stop {
            let was_dirty = self.inner.take_dirty();
            match self.inner.backend.hard_commit().await {
                Ok(()) => {
                    let deleted = self.inner.journal.remove_sealed_segments()?;
                    info!(event = "INDEX_STOPPED", final_checkpoint = true, deleted);
                }
                Err(e) => {
                    if was_dirty {
                        self.inner.mark_dirty();
                    }
                    warn!(
                        event = "INDEX_STOPPED",
                        final_checkpoint = false,
                        error = %e,
                        "segments retained for replay at next start"
                    );
                }
            }
        } else {
            info!(event = "INDEX_STOPPED", final_checkpoint = false);
        }
        Ok(())
    }

    /// Runs one checkpoint immediately, serialized with the background
    /// scheduler.
    pub async fn checkpoint(&self) -> IndexResult<CheckpointOutcome> {
        self.require_running()?;
        self.scheduler.lock().await.run_once().await
    }

    // ==================
    // Mutations
    // ==================

    /// Adds (or replaces) the document for `artifact`.
    pub async fn index_artifact(&self, artifact: Artifact) -> IndexResult<Artifact> {
        let _writer = self.begin_mutation().await?;
        artifact.validate()?;

        let au = artifact.au_key();
        self.inner
            .mutate(
                Mutation::Upsert(Box::new(artifact.clone())),
                JournalEntry::add(&artifact),
                &au,
            )
            .await?;

        debug!(event = "ARTIFACT_INDEXED", artifact = %artifact.identifier);
        Ok(artifact)
    }

    /// Marks the artifact committed. `None` if no such artifact exists.
    pub async fn commit_artifact(&self, uuid: Uuid) -> IndexResult<Option<Artifact>> {
        let _writer = self.begin_mutation().await?;
        require_uuid(&uuid)?;

        let Some(mut artifact) = self.inner.lookup(uuid).await? else {
            return Ok(None);
        };
        if artifact.committed {
            return Ok(Some(artifact));
        }

        self.inner
            .mutate(
                Mutation::SetCommitted(uuid),
                JournalEntry::mark_committed(uuid),
                &artifact.au_key(),
            )
            .await?;

        artifact.committed = true;
        debug!(event = "ARTIFACT_COMMITTED", artifact = %artifact.identifier);
        Ok(Some(artifact))
    }

    /// Rewrites the storage location. `None` if no such artifact exists.
    pub async fn update_storage_url(
        &self,
        uuid: Uuid,
        storage_url: impl Into<String>,
    ) -> IndexResult<Option<Artifact>> {
        let _writer = self.begin_mutation().await?;
        require_uuid(&uuid)?;
        let storage_url = storage_url.into();
        require_non_empty("storage_url", &storage_url)?;

        let Some(mut artifact) = self.inner.lookup(uuid).await? else {
            return Ok(None);
        };

        self.inner
            .mutate(
                Mutation::SetStorageUrl {
                    uuid,
                    storage_url: storage_url.clone(),
                },
                JournalEntry::update_storage_location(uuid, storage_url.clone()),
                &artifact.au_key(),
            )
            .await?;

        artifact.storage_url = storage_url;
        debug!(
            event = "ARTIFACT_RELOCATED",
            artifact = %artifact.identifier,
            storage_url = %artifact.storage_url
        );
        Ok(Some(artifact))
    }

    /// Removes the artifact. `false` (and nothing journaled) if absent.
    pub async fn delete_artifact(&self, uuid: Uuid) -> IndexResult<bool> {
        let _writer = self.begin_mutation().await?;
        require_uuid(&uuid)?;

        let Some(artifact) = self.inner.lookup(uuid).await? else {
            return Ok(false);
        };

        self.inner
            .mutate(
                Mutation::Delete(uuid),
                JournalEntry::delete(uuid),
                &artifact.au_key(),
            )
            .await?;

        debug!(event = "ARTIFACT_DELETED", artifact = %artifact.identifier);
        Ok(true)
    }

    // ==================
    // Version locks
    // ==================

    /// Serializes version-creating operations on `stem`
    pub async fn acquire_version_lock(&self, stem: &ArtifactStem) -> IndexResult<VersionLockGuard> {
        self.locks.acquire(stem).await
    }

    pub fn release_version_lock(&self, guard: VersionLockGuard) {
        guard.release();
    }

    pub fn version_locks(&self) -> &VersionLockTable {
        &self.locks
    }

    // ==================
    // Reads
    // ==================

    /// Looks up an artifact by uuid, committed or not.
    pub async fn get_artifact(&self, uuid: Uuid) -> IndexResult<Option<Artifact>> {
        require_uuid(&uuid)?;
        self.inner.lookup(uuid).await
    }

    fn stem_filters(stem: &ArtifactStem, include_uncommitted: bool) -> Vec<Filter> {
        let mut filters = vec![
            Filter::Namespace(stem.namespace.clone()),
            Filter::Auid(stem.auid.clone()),
            Filter::Uri(stem.uri.clone()),
        ];
        if !include_uncommitted {
            filters.push(Filter::Committed(true));
        }
        filters
    }

    pub async fn get_artifact_version(
        &self,
        namespace: &str,
        auid: &str,
        uri: &str,
        version: u32,
        include_uncommitted: bool,
    ) -> IndexResult<Option<Artifact>> {
        let stem = ArtifactStem::new(namespace, auid, uri);
        stem.validate()?;
        if version == 0 {
            return Err(IndexError::InvalidArgument(
                "artifact version must be at least 1".into(),
            ));
        }

        let mut filters = Self::stem_filters(&stem, include_uncommitted);
        filters.push(Filter::Version(version));
        self.inner.first_match(Query::new(filters)).await
    }

    /// Highest version of one URI in one AU
    pub async fn get_latest_artifact(
        &self,
        namespace: &str,
        auid: &str,
        uri: &str,
        include_uncommitted: bool,
    ) -> IndexResult<Option<Artifact>> {
        let stem = ArtifactStem::new(namespace, auid, uri);
        stem.validate()?;
        let query = Query::new(Self::stem_filters(&stem, include_uncommitted)).collapsed();
        self.inner.first_match(query).await
    }

    /// Lazily lists the artifacts matching `filter`.
    pub fn get_artifacts(&self, filter: &ArtifactFilter) -> IndexResult<ArtifactCursor> {
        filter.validate()?;
        let pager = QueryPager::new(
            Arc::clone(&self.inner.backend),
            filter.to_query(self.inner.config.query_batch_size),
        );
        if filter.needs_client_grouping() {
            Ok(ArtifactCursor::Latest(LatestVersions::new(pager)))
        } else {
            Ok(ArtifactCursor::Pages(pager))
        }
    }

    /// Latest version of every URI in an AU
    pub fn get_artifacts_in_au(
        &self,
        namespace: &str,
        auid: &str,
        include_uncommitted: bool,
    ) -> IndexResult<ArtifactCursor> {
        self.get_artifacts(
            &ArtifactFilter::namespace(namespace)
                .in_au(auid)
                .latest_only()
                .include_uncommitted(include_uncommitted),
        )
    }

    pub fn get_artifacts_all_versions_in_au(
        &self,
        namespace: &str,
        auid: &str,
        include_uncommitted: bool,
    ) -> IndexResult<ArtifactCursor> {
        self.get_artifacts(
            &ArtifactFilter::namespace(namespace)
                .in_au(auid)
                .include_uncommitted(include_uncommitted),
        )
    }

    /// Committed artifacts in an AU whose URI starts with `prefix`
    pub fn get_artifacts_with_prefix(
        &self,
        namespace: &str,
        auid: &str,
        prefix: &str,
        versions: ArtifactVersions,
    ) -> IndexResult<ArtifactCursor> {
        self.get_artifacts(
            &ArtifactFilter::namespace(namespace)
                .in_au(auid)
                .with_uri_prefix(prefix)
                .versions(versions),
        )
    }

    pub fn get_artifact_all_versions(
        &self,
        namespace: &str,
        auid: &str,
        uri: &str,
        include_uncommitted: bool,
    ) -> IndexResult<ArtifactCursor> {
        self.get_artifacts(
            &ArtifactFilter::namespace(namespace)
                .in_au(auid)
                .with_uri(uri)
                .include_uncommitted(include_uncommitted),
        )
    }

    /// Committed artifacts with exactly `uri` across every AU
    pub fn get_artifacts_with_uri_from_all_aus(
        &self,
        namespace: &str,
        uri: &str,
        versions: ArtifactVersions,
    ) -> IndexResult<ArtifactCursor> {
        self.get_artifacts(
            &ArtifactFilter::namespace(namespace)
                .with_uri(uri)
                .versions(versions),
        )
    }

    pub fn get_artifacts_with_uri_prefix_from_all_aus(
        &self,
        namespace: &str,
        prefix: &str,
        versions: ArtifactVersions,
    ) -> IndexResult<ArtifactCursor> {
        self.get_artifacts(
            &ArtifactFilter::namespace(namespace)
                .with_uri_prefix(prefix)
                .versions(versions),
        )
    }

    async fn facet_values(&self, filters: Vec<Filter>, field: Field) -> IndexResult<Vec<String>> {
        let page = self
            .inner
            .backend
            .query(&Query::new(filters).faceted_on(field))
            .await?;
        let mut values: Vec<String> = page
            .facet_counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(value, _)| value)
            .collect();
        values.sort();
        Ok(values)
    }

    /// Every namespace holding at least one artifact, sorted
    pub async fn get_namespaces(&self) -> IndexResult<Vec<String>> {
        self.facet_values(Vec::new(), Field::Namespace).await
    }

    /// Every AU in `namespace` holding at least one artifact, sorted
    pub async fn get_au_ids(&self, namespace: &str) -> IndexResult<Vec<String>> {
        require_non_empty("namespace", namespace)?;
        self.facet_values(vec![Filter::Namespace(namespace.to_string())], Field::Auid)
            .await
    }

    /// Byte totals over the committed artifacts of an AU
    pub async fn au_size(&self, namespace: &str, auid: &str) -> IndexResult<AuSize> {
        let key = AuKey::new(namespace, auid);
        key.validate()?;
        self.inner
            .sizes
            .get(&key, || self.inner.compute_au_size(&key))
            .await
    }
}

impl Drop for ArtifactIndex {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}
