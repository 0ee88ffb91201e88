//! Lazy, cursor-paginated result iteration
//!
//! Pages are fetched on demand in fixed-size batches. Each request carries
//! the cursor returned by the previous one; a response whose next cursor
//! equals the request cursor marks the end of results.
//!
//! Iterators are single pass. `has_next` may fetch a page, so it takes
//! `&mut self` like `next`.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use crate::artifact::{Artifact, ArtifactStem};
use crate::backend::{Query, SearchBackend, CURSOR_START};
use crate::error::IndexResult;

/// Raw cursor pagination over one backend query
#[derive(Debug)]
pub struct QueryPager {
    backend: Arc<dyn SearchBackend>,
    query: Query,
    buffer: VecDeque<Artifact>,
    exhausted: bool,
    pages_fetched: u64,
}

impl QueryPager {
    /// `query.rows` is the batch size; the query's cursor is reset to the
    /// start marker.
    pub fn new(backend: Arc<dyn SearchBackend>, query: Query) -> Self {
        Self {
            backend,
            query: query.at_cursor(CURSOR_START),
            buffer: VecDeque::new(),
            exhausted: false,
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    async fn fill(&mut self) -> IndexResult<()> {
        while self.buffer.is_empty() && !self.exhausted {
            let page = self.backend.query(&self.query).await?;
            self.pages_fetched += 1;
            trace!(
                event = "QUERY_PAGE",
                cursor = %self.query.cursor,
                documents = page.documents.len()
            );

            if page.next_cursor == self.query.cursor || self.query.rows == 0 {
                self.exhausted = true;
            }
            self.query.cursor = page.next_cursor;
            self.buffer.extend(page.documents);
        }
        Ok(())
    }

    pub async fn has_next(&mut self) -> IndexResult<bool> {
        self.fill().await?;
        Ok(!self.buffer.is_empty())
    }

    pub async fn next(&mut self) -> IndexResult<Option<Artifact>> {
        self.fill().await?;
        Ok(self.buffer.pop_front())
    }

    pub async fn collect_all(mut self) -> IndexResult<Vec<Artifact>> {
        let mut all = Vec::new();
        while let Some(artifact) = self.next().await? {
            all.push(artifact);
        }
        Ok(all)
    }
}

/// Keeps the first document of each stem from a pager sorted by stem then
/// version descending, i.e. the latest version of each stem.
#[derive(Debug)]
pub struct LatestVersions {
    pager: QueryPager,
    peeked: Option<Artifact>,
    last_stem: Option<ArtifactStem>,
}

impl LatestVersions {
    pub fn new(pager: QueryPager) -> Self {
        Self {
            pager,
            peeked: None,
            last_stem: None,
        }
    }

    async fn advance(&mut self) -> IndexResult<()> {
        while self.peeked.is_none() {
            let Some(artifact) = self.pager.next().await? else {
                return Ok(());
            };
            let stem = artifact.stem();
            if self.last_stem.as_ref() == Some(&stem) {
                continue;
            }
            self.last_stem = Some(stem);
            self.peeked = Some(artifact);
        }
        Ok(())
    }

    pub async fn has_next(&mut self) -> IndexResult<bool> {
        self.advance().await?;
        Ok(self.peeked.is_some())
    }

    pub async fn next(&mut self) -> IndexResult<Option<Artifact>> {
        self.advance().await?;
        Ok(self.peeked.take())
    }

    pub async fn collect_all(mut self) -> IndexResult<Vec<Artifact>> {
        let mut all = Vec::new();
        while let Some(artifact) = self.next().await? {
            all.push(artifact);
        }
        Ok(all)
    }
}

/// Result of an artifact listing
#[derive(Debug)]
pub enum ArtifactCursor {
    Pages(QueryPager),
    Latest(LatestVersions),
}

impl ArtifactCursor {
    pub async fn has_next(&mut self) -> IndexResult<bool> {
        match self {
            ArtifactCursor::Pages(pager) => pager.has_next().await,
            ArtifactCursor::Latest(latest) => latest.has_next().await,
        }
    }

    pub async fn next(&mut self) -> IndexResult<Option<Artifact>> {
        match self {
            ArtifactCursor::Pages(pager) => pager.next().await,
            ArtifactCursor::Latest(latest) => latest.next().await,
        }
    }

    pub async fn collect_all(self) -> IndexResult<Vec<Artifact>> {
        match self {
            ArtifactCursor::Pages(pager) => pager.collect_all().await,
            ArtifactCursor::Latest(latest) => latest.collect_all().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactIdentifier;
    use crate::backend::{CommitMode, Field, MemoryBackend, Mutation, SortClause};
    use chrono::Utc;
    use uuid::Uuid;

    fn artifact(auid: &str, uri: &str, version: u32) -> Artifact {
        Artifact::new(
            ArtifactIdentifier::new("ns", auid, uri, version, Uuid::new_v4()),
            "file:///x",
            1,
            "d",
            Utc::now(),
        )
    }

    async fn backend_with(docs: &[Artifact]) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        let mutations: Vec<Mutation> = docs
            .iter()
            .map(|a| Mutation::Upsert(Box::new(a.clone())))
            .collect();
        backend.mutate(&mutations, CommitMode::Soft).await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_pages_through_all_results() {
        let docs: Vec<Artifact> = (0..7).map(|i| artifact("au", &format!("u{}", i), 1)).collect();
        let backend = backend_with(&docs).await;

        let query = Query::new(vec![]).sorted_by(vec![SortClause::asc(Field::Uri)]).with_rows(3);
        let mut pager = QueryPager::new(backend, query);
        assert!(pager.has_next().await.unwrap());
        assert!(pager.has_next().await.unwrap());

        let mut uris = Vec::new();
        while let Some(a) = pager.next().await.unwrap() {
            uris.push(a.uri().to_string());
        }
        assert_eq!(uris.len(), 7);
        assert_eq!(uris[0], "u0");
        assert!(!pager.has_next().await.unwrap());
        // three full-or-partial pages plus the one that repeats the cursor
        assert_eq!(pager.pages_fetched(), 4);
    }

    #[tokio::test]
    async fn test_empty_result() {
        let backend = backend_with(&[]).await;
        let pager = QueryPager::new(backend, Query::new(vec![]).with_rows(10));
        assert!(pager.collect_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_versions_one_per_stem() {
        let docs = vec![
            artifact("a1", "u", 1),
            artifact("a1", "u", 2),
            artifact("a2", "u", 1),
            artifact("a2", "u", 3),
            artifact("a2", "u", 2),
            artifact("a1", "v", 1),
        ];
        let backend = backend_with(&docs).await;
        let query = Query::new(vec![])
            .sorted_by(vec![
                SortClause::asc(Field::Uri),
                SortClause::asc(Field::Auid),
                SortClause::desc(Field::Version),
                SortClause::asc(Field::Uuid),
            ])
            .with_rows(2);

        let latest = LatestVersions::new(QueryPager::new(backend, query))
            .collect_all()
            .await
            .unwrap();
        let found: Vec<(&str, &str, u32)> = latest
            .iter()
            .map(|a| (a.auid(), a.uri(), a.version()))
            .collect();
        assert_eq!(found, vec![("a1", "u", 2), ("a2", "u", 3), ("a1", "v", 1)]);
    }

    #[tokio::test]
    async fn test_query_error_surfaces() {
        let backend = backend_with(&[artifact("au", "u", 1)]).await;
        backend.set_available(false);
        let mut cursor =
            ArtifactCursor::Pages(QueryPager::new(backend, Query::new(vec![]).with_rows(5)));
        assert!(cursor.has_next().await.is_err());
    }
}
