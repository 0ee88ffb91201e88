//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

use artifact_index::{
    Artifact, ArtifactIdentifier, ArtifactIndex, IndexConfig, MemoryAuSizeStore, MemoryBackend,
    MemoryByteStorage,
};
use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

static TRACING: Once = Once::new();

/// Installs a test subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Config for tests: the background scheduler never fires on its own
pub fn test_config(journal_dir: &Path) -> IndexConfig {
    IndexConfig {
        checkpoint_interval_ms: 3_600_000,
        restart_slop_ms: 50,
        journal_retry_delay_ms: 1,
        query_batch_size: 2,
        readiness_initial_backoff_ms: 5,
        readiness_max_backoff_ms: 20,
        ..IndexConfig::with_journal_dir(journal_dir)
    }
}

pub struct Harness {
    pub temp_dir: TempDir,
    pub backend: Arc<MemoryBackend>,
    pub sizes: Arc<MemoryAuSizeStore>,
    pub storage: Arc<MemoryByteStorage>,
    pub index: Arc<ArtifactIndex>,
}

impl Harness {
    pub fn journal_dir(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("journal")
    }

    /// A fresh index over the same backend, stores and journal directory,
    /// as after a process restart
    pub async fn reopen(&self) -> Arc<ArtifactIndex> {
        let index = ArtifactIndex::new(
            test_config(&self.journal_dir()),
            self.backend.clone(),
            self.sizes.clone(),
            self.storage.clone(),
        )
        .unwrap();
        index.init().await.unwrap();
        index.start().await.unwrap();
        Arc::new(index)
    }
}

/// A running index over in-memory collaborators
pub async fn running_index() -> Harness {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let sizes = Arc::new(MemoryAuSizeStore::new());
    let storage = Arc::new(MemoryByteStorage::new());

    let index = ArtifactIndex::new(
        test_config(&temp_dir.path().join("journal")),
        backend.clone(),
        sizes.clone(),
        storage.clone(),
    )
    .unwrap();
    index.init().await.unwrap();
    index.start().await.unwrap();

    Harness {
        temp_dir,
        backend,
        sizes,
        storage,
        index: Arc::new(index),
    }
}

pub fn artifact(namespace: &str, auid: &str, uri: &str, version: u32, length: u64) -> Artifact {
    Artifact::new(
        ArtifactIdentifier::new(namespace, auid, uri, version, Uuid::new_v4()),
        format!("file:///warcs/{}.warc", Uuid::new_v4()),
        length,
        "sha256:0000",
        Utc::now(),
    )
}

/// Indexes and commits
pub async fn add_committed(index: &ArtifactIndex, artifact: Artifact) -> Artifact {
    let added = index.index_artifact(artifact).await.unwrap();
    index.commit_artifact(added.uuid()).await.unwrap().unwrap()
}
