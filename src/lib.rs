//! artifact-index - journaled artifact index over a document-search backend
//!
//! Keeps the search backend's view of artifact metadata correct under
//! concurrent writers and backend restarts:
//!
//! - `journal`: segmented durability journal of index mutations
//! - `checkpoint`: periodic hard commits that retire journal segments
//! - `recovery`: journal replay at startup and after a backend restart
//! - `locks`: per-stem version locks
//! - `aggregate`: single-flight AU size cache
//! - `index`: the façade and paginated listings

pub mod aggregate;
pub mod artifact;
pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod index;
pub mod journal;
pub mod locks;
pub mod recovery;

pub use aggregate::{AuSizeStore, ByteStorage, MemoryAuSizeStore, MemoryByteStorage};
pub use artifact::{Artifact, ArtifactIdentifier, ArtifactStem, AuKey, AuSize};
pub use backend::{MemoryBackend, SearchBackend};
pub use checkpoint::CheckpointOutcome;
pub use config::IndexConfig;
pub use error::{IndexError, IndexResult};
pub use index::{
    ArtifactCursor, ArtifactFilter, ArtifactIndex, ArtifactVersions, IndexState, UriMatch,
};
pub use locks::VersionLockGuard;
