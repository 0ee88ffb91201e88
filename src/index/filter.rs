//! Listing query descriptor

use crate::backend::{Field, Filter, Query, SortClause};
use crate::error::IndexResult;

/// Which URIs a listing covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriMatch {
    Any,
    Exact(String),
    Prefix(String),
}

/// Which versions of each URI a listing returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactVersions {
    All,
    Latest,
}

/// Shape of an artifact listing
///
/// Without an `auid` the listing spans every AU of the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFilter {
    pub namespace: String,
    pub auid: Option<String>,
    pub uri: UriMatch,
    pub versions: ArtifactVersions,
    pub include_uncommitted: bool,
}

impl ArtifactFilter {
    /// All committed versions in `namespace`
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            auid: None,
            uri: UriMatch::Any,
            versions: ArtifactVersions::All,
            include_uncommitted: false,
        }
    }

    pub fn in_au(mut self, auid: impl Into<String>) -> Self {
        self.auid = Some(auid.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = UriMatch::Exact(uri.into());
        self
    }

    pub fn with_uri_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.uri = UriMatch::Prefix(prefix.into());
        self
    }

    pub fn versions(mut self, versions: ArtifactVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn latest_only(self) -> Self {
        self.versions(ArtifactVersions::Latest)
    }

    pub fn include_uncommitted(mut self, include: bool) -> Self {
        self.include_uncommitted = include;
        self
    }

    pub fn validate(&self) -> IndexResult<()> {
        crate::artifact::require_non_empty("namespace", &self.namespace)?;
        if let Some(auid) = &self.auid {
            crate::artifact::require_non_empty("auid", auid)?;
        }
        if let UriMatch::Exact(uri) = &self.uri {
            crate::artifact::require_non_empty("uri", uri)?;
        }
        Ok(())
    }

    /// Whether latest-version selection has to happen client-side.
    ///
    /// The backend collapses within one AU only.
    pub(crate) fn needs_client_grouping(&self) -> bool {
        self.versions == ArtifactVersions::Latest && self.auid.is_none()
    }

    /// Backend query for this listing
    pub(crate) fn to_query(&self, rows: usize) -> Query {
        let mut filters = vec![Filter::Namespace(self.namespace.clone())];
        if let Some(auid) = &self.auid {
            filters.push(Filter::Auid(auid.clone()));
        }
        match &self.uri {
            UriMatch::Any => {}
            UriMatch::Exact(uri) => filters.push(Filter::Uri(uri.clone())),
            UriMatch::Prefix(prefix) => filters.push(Filter::UriPrefix(prefix.clone())),
        }
        if !self.include_uncommitted {
            filters.push(Filter::Committed(true));
        }

        let sort = if self.auid.is_some() {
            vec![
                SortClause::asc(Field::Uri),
                SortClause::desc(Field::Version),
                SortClause::asc(Field::Uuid),
            ]
        } else {
            vec![
                SortClause::asc(Field::Uri),
                SortClause::asc(Field::Auid),
                SortClause::desc(Field::Version),
                SortClause::asc(Field::Uuid),
            ]
        };

        let query = Query::new(filters).sorted_by(sort).with_rows(rows);
        if self.versions == ArtifactVersions::Latest && self.auid.is_some() {
            query.collapsed()
        } else {
            query
        }
    }
}
