//! Backend query and mutation model
//!
//! The index only ever issues the fixed clause set below; any document
//! search engine that can express it can back the index.

use uuid::Uuid;

use crate::artifact::Artifact;

/// Start-of-results cursor marker
pub const CURSOR_START: &str = "*";

/// Document field a filter, sort, or facet refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Uuid,
    Namespace,
    Auid,
    Uri,
    Version,
    Committed,
    ContentLength,
}

/// Restricts the documents a query matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Uuid(Uuid),
    Namespace(String),
    Auid(String),
    Uri(String),
    UriPrefix(String),
    Version(u32),
    Committed(bool),
}

impl Filter {
    /// Whether `artifact` satisfies this filter
    pub fn matches(&self, artifact: &Artifact) -> bool {
        match self {
            Filter::Uuid(uuid) => artifact.uuid() == *uuid,
            Filter::Namespace(ns) => artifact.namespace() == ns,
            Filter::Auid(auid) => artifact.auid() == auid,
            Filter::Uri(uri) => artifact.uri() == uri,
            Filter::UriPrefix(prefix) => artifact.uri().starts_with(prefix.as_str()),
            Filter::Version(version) => artifact.version() == *version,
            Filter::Committed(committed) => artifact.committed == *committed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortClause {
    pub field: Field,
    pub order: SortOrder,
}

impl SortClause {
    pub fn asc(field: Field) -> Self {
        Self {
            field,
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: Field) -> Self {
        Self {
            field,
            order: SortOrder::Desc,
        }
    }
}

/// Server-side grouping: keep only the highest version of each
/// (namespace, auid, uri) stem among the filtered documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollapseLatest;

/// A backend request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortClause>,
    pub collapse: Option<CollapseLatest>,
    /// Distinct values of this field across all matches
    pub facet: Option<Field>,
    /// Sum of content lengths across all matches
    pub sum_content_length: bool,
    /// Page size; 0 requests aggregates only
    pub rows: usize,
    /// Continuation cursor, [`CURSOR_START`] for the first page
    pub cursor: String,
}

impl Query {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            sort: Vec::new(),
            collapse: None,
            facet: None,
            sum_content_length: false,
            rows: 0,
            cursor: CURSOR_START.to_string(),
        }
    }

    pub fn sorted_by(mut self, sort: Vec<SortClause>) -> Self {
        self.sort = sort;
        self
    }

    pub fn collapsed(mut self) -> Self {
        self.collapse = Some(CollapseLatest);
        self
    }

    pub fn faceted_on(mut self, field: Field) -> Self {
        self.facet = Some(field);
        self
    }

    pub fn summing_content_length(mut self) -> Self {
        self.sum_content_length = true;
        self
    }

    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    pub fn at_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = cursor.into();
        self
    }
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPage {
    pub documents: Vec<Artifact>,
    /// Cursor for the following page. Equal to the request cursor once
    /// results are exhausted.
    pub next_cursor: String,
    /// Total matches (after collapse)
    pub num_found: u64,
    /// Distinct facet values with their document counts, sorted by value
    pub facet_counts: Vec<(String, u64)>,
    pub content_length_sum: Option<u64>,
}

/// When a mutation becomes visible/durable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Applied, visible only after a later commit
    None,
    /// Visible to queries, not crash-durable
    Soft,
    /// Visible and durable
    Hard,
}

/// Document mutation
///
/// Partial updates against an absent document are no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Add or replace the document with this uuid
    Upsert(Box<Artifact>),
    SetCommitted(Uuid),
    SetStorageUrl { uuid: Uuid, storage_url: String },
    Delete(Uuid),
}

impl Mutation {
    pub fn uuid(&self) -> Uuid {
        match self {
            Mutation::Upsert(artifact) => artifact.uuid(),
            Mutation::SetCommitted(uuid) => *uuid,
            Mutation::SetStorageUrl { uuid, .. } => *uuid,
            Mutation::Delete(uuid) => *uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactIdentifier;
    use chrono::Utc;

    fn artifact(uri: &str) -> Artifact {
        Artifact::new(
            ArtifactIdentifier::new("ns", "au", uri, 1, Uuid::new_v4()),
            "file:///x",
            10,
            "d",
            Utc::now(),
        )
    }

    #[test]
    fn test_prefix_filter() {
        let a = artifact("http://example.com/dir/page");
        assert!(Filter::UriPrefix("http://example.com/dir/".into()).matches(&a));
        assert!(!Filter::UriPrefix("http://example.com/other".into()).matches(&a));
        assert!(Filter::UriPrefix(String::new()).matches(&a));
    }

    #[test]
    fn test_committed_filter() {
        let mut a = artifact("u");
        assert!(Filter::Committed(false).matches(&a));
        a.committed = true;
        assert!(Filter::Committed(true).matches(&a));
    }

    #[test]
    fn test_query_builder_defaults() {
        let q = Query::new(vec![Filter::Namespace("ns".into())]).with_rows(5);
        assert_eq!(q.cursor, CURSOR_START);
        assert!(q.collapse.is_none());
        assert_eq!(q.rows, 5);
    }
}
