//! Artifact index
//!
//! The façade that turns artifact mutations into backend document
//! operations plus durability journal entries, and serves every read.
//!
//! # Invariants
//!
//! - A mutation is journaled only after the backend accepted it
//! - Mutations require a running index (an active journal segment exists)
//! - Reads reflect every mutation that completed before the read began
//! - Latest-version listings return at most one document per stem

mod facade;
mod filter;
mod lifecycle;
mod pager;

pub use facade::ArtifactIndex;
pub(crate) use facade::IndexInner;
pub use filter::{ArtifactFilter, ArtifactVersions, UriMatch};
pub use lifecycle::IndexState;
pub use pager::{ArtifactCursor, LatestVersions, QueryPager};
