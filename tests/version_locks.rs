//! Version lock tests
//!
//! Concurrent version creators on one stem, serialized by the lock table,
//! allocate exactly the versions 1..=N.

mod common;

use std::sync::Arc;
use std::time::Duration;

use artifact_index::{ArtifactIndex, ArtifactStem};
use common::{artifact, running_index};

/// Allocates the next version of `stem` under its lock and indexes it
async fn create_next_version(index: Arc<ArtifactIndex>, stem: ArtifactStem) -> u32 {
    let guard = index.acquire_version_lock(&stem).await.unwrap();

    let latest = index
        .get_latest_artifact(&stem.namespace, &stem.auid, &stem.uri, true)
        .await
        .unwrap();
    let next = latest.map_or(1, |a| a.version() + 1);

    // Widen the race window
    tokio::task::yield_now().await;
    index
        .index_artifact(artifact(&stem.namespace, &stem.auid, &stem.uri, next, 1))
        .await
        .unwrap();

    index.release_version_lock(guard);
    next
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creators_get_dense_versions() {
    let h = running_index().await;
    let stem = ArtifactStem::new("ns", "au", "http://example.com/contended");
    const CREATORS: u32 = 12;

    let tasks: Vec<_> = (0..CREATORS)
        .map(|_| tokio::spawn(create_next_version(h.index.clone(), stem.clone())))
        .collect();

    let mut versions = Vec::new();
    for task in tasks {
        versions.push(task.await.unwrap());
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=CREATORS).collect::<Vec<u32>>());

    let all = h
        .index
        .get_artifact_all_versions("ns", "au", "http://example.com/contended", true)
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(all.len(), CREATORS as usize);
    assert_eq!(h.index.version_locks().active_stems(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_stems_proceed_in_parallel() {
    let h = running_index().await;
    let held = h
        .index
        .acquire_version_lock(&ArtifactStem::new("ns", "au", "http://example.com/held"))
        .await
        .unwrap();

    let other = tokio::time::timeout(
        Duration::from_secs(1),
        create_next_version(
            h.index.clone(),
            ArtifactStem::new("ns", "au", "http://example.com/free"),
        ),
    )
    .await;
    assert_eq!(other.unwrap(), 1);
    drop(held);
}

#[tokio::test]
async fn test_cancelled_waiter_does_not_leak() {
    let h = running_index().await;
    let stem = ArtifactStem::new("ns", "au", "http://example.com/a");
    let holder = h.index.acquire_version_lock(&stem).await.unwrap();

    let waiter =
        tokio::time::timeout(Duration::from_millis(20), h.index.acquire_version_lock(&stem)).await;
    assert!(waiter.is_err());

    let aborted = {
        let index = h.index.clone();
        let stem = stem.clone();
        tokio::spawn(async move { index.acquire_version_lock(&stem).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    aborted.abort();
    let _ = aborted.await;

    assert_eq!(h.index.version_locks().active_stems(), 1);
    h.index.release_version_lock(holder);
    assert_eq!(h.index.version_locks().active_stems(), 0);

    // The stem is immediately acquirable again
    let again =
        tokio::time::timeout(Duration::from_millis(100), h.index.acquire_version_lock(&stem)).await;
    assert!(again.is_ok());
}
