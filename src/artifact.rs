//! Artifact metadata as stored in the index
//!
//! An artifact is one version of one URI inside one archival unit (AU) of a
//! namespace. Once committed it is immutable except for:
//! - `committed` (false → true, once)
//! - `storage_url` (rewritten when the byte-storage layer relocates content)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IndexError, IndexResult};

/// Full identity of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactIdentifier {
    pub namespace: String,
    pub auid: String,
    pub uri: String,
    /// Versions of one stem are dense and start at 1
    pub version: u32,
    pub uuid: Uuid,
}

impl ArtifactIdentifier {
    pub fn new(
        namespace: impl Into<String>,
        auid: impl Into<String>,
        uri: impl Into<String>,
        version: u32,
        uuid: Uuid,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            auid: auid.into(),
            uri: uri.into(),
            version,
            uuid,
        }
    }

    /// The version-less coordinate of this identifier
    pub fn stem(&self) -> ArtifactStem {
        ArtifactStem::new(&self.namespace, &self.auid, &self.uri)
    }

    pub fn au_key(&self) -> AuKey {
        AuKey::new(&self.namespace, &self.auid)
    }

    /// Rejects identifiers with missing fields before any I/O happens.
    pub fn validate(&self) -> IndexResult<()> {
        require_non_empty("namespace", &self.namespace)?;
        require_non_empty("auid", &self.auid)?;
        require_non_empty("uri", &self.uri)?;
        require_uuid(&self.uuid)?;
        if self.version == 0 {
            return Err(IndexError::InvalidArgument(
                "artifact version must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ArtifactIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{} ({})",
            self.namespace, self.auid, self.uri, self.version, self.uuid
        )
    }
}

/// Indexed artifact metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub identifier: ArtifactIdentifier,
    pub committed: bool,
    /// Where the byte-storage layer keeps the content
    pub storage_url: String,
    pub content_length: u64,
    pub content_digest: String,
    pub collection_date: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        identifier: ArtifactIdentifier,
        storage_url: impl Into<String>,
        content_length: u64,
        content_digest: impl Into<String>,
        collection_date: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier,
            committed: false,
            storage_url: storage_url.into(),
            content_length,
            content_digest: content_digest.into(),
            collection_date,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.identifier.uuid
    }

    pub fn namespace(&self) -> &str {
        &self.identifier.namespace
    }

    pub fn auid(&self) -> &str {
        &self.identifier.auid
    }

    pub fn uri(&self) -> &str {
        &self.identifier.uri
    }

    pub fn version(&self) -> u32 {
        self.identifier.version
    }

    pub fn stem(&self) -> ArtifactStem {
        self.identifier.stem()
    }

    pub fn au_key(&self) -> AuKey {
        self.identifier.au_key()
    }

    pub fn validate(&self) -> IndexResult<()> {
        self.identifier.validate()?;
        require_non_empty("storage_url", &self.storage_url)
    }
}

/// (namespace, auid, uri): the key versions are allocated under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactStem {
    pub namespace: String,
    pub auid: String,
    pub uri: String,
}

impl ArtifactStem {
    pub fn new(
        namespace: impl Into<String>,
        auid: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            auid: auid.into(),
            uri: uri.into(),
        }
    }

    pub fn validate(&self) -> IndexResult<()> {
        require_non_empty("namespace", &self.namespace)?;
        require_non_empty("auid", &self.auid)?;
        require_non_empty("uri", &self.uri)
    }
}

impl fmt::Display for ArtifactStem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.auid, self.uri)
    }
}

/// (namespace, auid): the key AU size aggregates are kept under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuKey {
    pub namespace: String,
    pub auid: String,
}

impl AuKey {
    pub fn new(namespace: impl Into<String>, auid: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            auid: auid.into(),
        }
    }

    pub fn validate(&self) -> IndexResult<()> {
        require_non_empty("namespace", &self.namespace)?;
        require_non_empty("auid", &self.auid)
    }
}

impl fmt::Display for AuKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.auid)
    }
}

/// Byte totals for one AU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuSize {
    /// Sum of content lengths over every committed version
    pub total_all_versions: u64,
    /// Sum of content lengths over the latest committed version of each URI
    pub total_latest_versions: u64,
    /// Bytes the byte-storage layer holds for the AU
    pub total_disk_size: u64,
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> IndexResult<()> {
    if value.trim().is_empty() {
        return Err(IndexError::InvalidArgument(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

pub(crate) fn require_uuid(uuid: &Uuid) -> IndexResult<()> {
    if uuid.is_nil() {
        return Err(IndexError::InvalidArgument("artifact uuid must not be nil".into()));
    }
    Ok(())
}
