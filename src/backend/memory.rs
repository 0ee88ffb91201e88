//! In-process search backend
//!
//! Keeps three views of the collection:
//! - pending: applied with `CommitMode::None`, not yet visible
//! - visible: what queries see (soft-committed)
//! - durable: what survives [`MemoryBackend::simulate_restart`]
//!
//! Fault injection hooks let tests exercise unavailability, rejected
//! mutations, slow mutations and failing hard commits.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::query::{
    CommitMode, Field, Filter, Mutation, Query, QueryPage, SortClause, SortOrder, CURSOR_START,
};
use super::{BackendStatus, SearchBackend};
use crate::artifact::{Artifact, ArtifactStem};
use crate::error::{IndexError, IndexResult};

const CURSOR_PREFIX: &str = "offset:";

#[derive(Debug)]
struct CollectionState {
    pending: Vec<Mutation>,
    visible: BTreeMap<Uuid, Artifact>,
    durable: BTreeMap<Uuid, Artifact>,
    started_at: DateTime<Utc>,
    available: bool,
    reject_mutations: u32,
    fail_hard_commits: bool,
    mutation_latency: Duration,
    mutate_calls: u64,
    soft_commits: u64,
    hard_commits: u64,
}

impl CollectionState {
    fn promote_pending(&mut self) {
        for mutation in std::mem::take(&mut self.pending) {
            apply(&mut self.visible, mutation);
        }
    }

    fn check_available(&self) -> IndexResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(IndexError::BackendUnavailable(
                "memory backend is marked unavailable".into(),
            ))
        }
    }
}

fn apply(documents: &mut BTreeMap<Uuid, Artifact>, mutation: Mutation) {
    match mutation {
        Mutation::Upsert(artifact) => {
            documents.insert(artifact.uuid(), *artifact);
        }
        Mutation::SetCommitted(uuid) => {
            if let Some(doc) = documents.get_mut(&uuid) {
                doc.committed = true;
            }
        }
        Mutation::SetStorageUrl { uuid, storage_url } => {
            if let Some(doc) = documents.get_mut(&uuid) {
                doc.storage_url = storage_url;
            }
        }
        Mutation::Delete(uuid) => {
            documents.remove(&uuid);
        }
    }
}

/// In-memory [`SearchBackend`]
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<CollectionState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectionState {
                pending: Vec::new(),
                visible: BTreeMap::new(),
                durable: BTreeMap::new(),
                started_at: Utc::now(),
                available: true,
                reject_mutations: 0,
                fail_hard_commits: false,
                mutation_latency: Duration::ZERO,
                mutate_calls: 0,
                soft_commits: 0,
                hard_commits: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CollectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops everything that was not hard-committed and resets uptime.
    pub fn simulate_restart(&self) {
        let mut state = self.state();
        state.pending.clear();
        state.visible = state.durable.clone();
        state.started_at = Utc::now();
    }

    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    /// Rejects the next `count` mutate calls with status 500
    pub fn reject_next_mutations(&self, count: u32) {
        self.state().reject_mutations = count;
    }

    pub fn set_fail_hard_commits(&self, fail: bool) {
        self.state().fail_hard_commits = fail;
    }

    /// Delays every mutate call by `latency` before it is applied
    pub fn set_mutation_latency(&self, latency: Duration) {
        self.state().mutation_latency = latency;
    }

    pub fn hard_commit_count(&self) -> u64 {
        self.state().hard_commits
    }

    pub fn soft_commit_count(&self) -> u64 {
        self.state().soft_commits
    }

    pub fn mutate_call_count(&self) -> u64 {
        self.state().mutate_calls
    }

    /// Documents currently visible to queries, ordered by uuid
    pub fn visible_documents(&self) -> Vec<Artifact> {
        self.state().visible.values().cloned().collect()
    }

    /// Documents that would survive a restart, ordered by uuid
    pub fn durable_documents(&self) -> Vec<Artifact> {
        self.state().durable.values().cloned().collect()
    }
}

fn compare_field(field: Field, a: &Artifact, b: &Artifact) -> Ordering {
    match field {
        Field::Uuid => a.uuid().cmp(&b.uuid()),
        Field::Namespace => a.namespace().cmp(b.namespace()),
        Field::Auid => a.auid().cmp(b.auid()),
        Field::Uri => a.uri().cmp(b.uri()),
        Field::Version => a.version().cmp(&b.version()),
        Field::Committed => a.committed.cmp(&b.committed),
        Field::ContentLength => a.content_length.cmp(&b.content_length),
    }
}

fn compare(sort: &[SortClause], a: &Artifact, b: &Artifact) -> Ordering {
    for clause in sort {
        let ordering = match clause.order {
            SortOrder::Asc => compare_field(clause.field, a, b),
            SortOrder::Desc => compare_field(clause.field, b, a),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.uuid().cmp(&b.uuid())
}

fn facet_value(field: Field, artifact: &Artifact) -> String {
    match field {
        Field::Uuid => artifact.uuid().to_string(),
        Field::Namespace => artifact.namespace().to_string(),
        Field::Auid => artifact.auid().to_string(),
        Field::Uri => artifact.uri().to_string(),
        Field::Version => artifact.version().to_string(),
        Field::Committed => artifact.committed.to_string(),
        Field::ContentLength => artifact.content_length.to_string(),
    }
}

fn parse_cursor(cursor: &str) -> IndexResult<usize> {
    if cursor == CURSOR_START {
        return Ok(0);
    }
    cursor
        .strip_prefix(CURSOR_PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| IndexError::rejected(400, format!("invalid cursor '{}'", cursor)))
}

fn collapse_latest(matches: Vec<&Artifact>) -> Vec<&Artifact> {
    let mut latest: HashMap<ArtifactStem, &Artifact> = HashMap::new();
    for artifact in matches {
        latest
            .entry(artifact.stem())
            .and_modify(|current| {
                if artifact.version() > current.version() {
                    *current = artifact;
                }
            })
            .or_insert(artifact);
    }
    latest.into_values().collect()
}

fn run_query(documents: &BTreeMap<Uuid, Artifact>, query: &Query) -> IndexResult<QueryPage> {
    let offset = parse_cursor(&query.cursor)?;

    let mut matches: Vec<&Artifact> = documents
        .values()
        .filter(|doc| query.filters.iter().all(|f: &Filter| f.matches(doc)))
        .collect();

    if query.collapse.is_some() {
        matches = collapse_latest(matches);
    }

    let facet_counts = match query.facet {
        Some(field) => {
            let mut counts: BTreeMap<String, u64> = BTreeMap::new();
            for doc in &matches {
                *counts.entry(facet_value(field, doc)).or_default() += 1;
            }
            counts.into_iter().collect()
        }
        None => Vec::new(),
    };

    let content_length_sum = query
        .sum_content_length
        .then(|| matches.iter().map(|doc| doc.content_length).sum());

    matches.sort_by(|a, b| compare(&query.sort, a, b));

    let num_found = matches.len() as u64;
    let documents: Vec<Artifact> = matches
        .into_iter()
        .skip(offset)
        .take(query.rows)
        .cloned()
        .collect();

    let next_cursor = if documents.is_empty() {
        query.cursor.clone()
    } else {
        format!("{}{}", CURSOR_PREFIX, offset + documents.len())
    };

    Ok(QueryPage {
        documents,
        next_cursor,
        num_found,
        facet_counts,
        content_length_sum,
    })
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn query(&self, query: &Query) -> IndexResult<QueryPage> {
        let state = self.state();
        state.check_available()?;
        run_query(&state.visible, query)
    }

    async fn mutate(&self, mutations: &[Mutation], commit: CommitMode) -> IndexResult<()> {
        let latency = self.state().mutation_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        state.check_available()?;
        state.mutate_calls += 1;

        if state.reject_mutations > 0 {
            state.reject_mutations -= 1;
            return Err(IndexError::rejected(500, "injected mutation failure"));
        }

        state.pending.extend(mutations.iter().cloned());
        match commit {
            CommitMode::None => {}
            CommitMode::Soft => state.promote_pending(),
            CommitMode::Hard => {
                state.promote_pending();
                state.durable = state.visible.clone();
            }
        }
        Ok(())
    }

    async fn soft_commit(&self) -> IndexResult<()> {
        let mut state = self.state();
        state.check_available()?;
        state.promote_pending();
        state.soft_commits += 1;
        Ok(())
    }

    async fn hard_commit(&self) -> IndexResult<()> {
        let mut state = self.state();
        state.check_available()?;
        if state.fail_hard_commits {
            return Err(IndexError::rejected(503, "injected hard commit failure"));
        }
        state.promote_pending();
        state.durable = state.visible.clone();
        state.hard_commits += 1;
        Ok(())
    }

    async fn ping(&self) -> IndexResult<BackendStatus> {
        let state = self.state();
        state.check_available()?;
        let uptime = (Utc::now() - state.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Ok(BackendStatus {
            ready: true,
            uptime,
        })
    }
}
