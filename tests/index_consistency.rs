//! Index façade consistency tests
//!
//! - Reads reflect every completed mutation
//! - Latest-version listings return at most one document per stem
//! - AU size aggregates follow the committed document set

mod common;

use std::collections::HashSet;

use artifact_index::{ArtifactStem, ArtifactVersions, AuKey, AuSize};
use common::{add_committed, artifact, running_index};
use uuid::Uuid;

// =============================================================================
// CRUD
// =============================================================================

#[tokio::test]
async fn test_index_then_get_returns_artifact_unchanged() {
    let h = running_index().await;
    let a = artifact("ns", "au", "http://example.com/a", 1, 42);

    let returned = h.index.index_artifact(a.clone()).await.unwrap();
    assert_eq!(returned, a);

    let fetched = h.index.get_artifact(a.uuid()).await.unwrap();
    assert_eq!(fetched, Some(a));
}

#[tokio::test]
async fn test_uncommitted_visible_only_when_requested() {
    let h = running_index().await;
    let a = h
        .index
        .index_artifact(artifact("ns", "au", "http://example.com/a", 1, 1))
        .await
        .unwrap();

    let hidden = h
        .index
        .get_artifact_version("ns", "au", "http://example.com/a", 1, false)
        .await
        .unwrap();
    assert!(hidden.is_none());

    let shown = h
        .index
        .get_artifact_version("ns", "au", "http://example.com/a", 1, true)
        .await
        .unwrap();
    assert_eq!(shown.map(|s| s.uuid()), Some(a.uuid()));
}

#[tokio::test]
async fn test_commit_is_idempotent() {
    let h = running_index().await;
    let a = h
        .index
        .index_artifact(artifact("ns", "au", "http://example.com/a", 1, 1))
        .await
        .unwrap();

    let first = h.index.commit_artifact(a.uuid()).await.unwrap().unwrap();
    let second = h.index.commit_artifact(a.uuid()).await.unwrap().unwrap();
    assert!(first.committed);
    assert_eq!(first, second);
    assert_eq!(h.index.get_artifact(a.uuid()).await.unwrap(), Some(first));
}

#[tokio::test]
async fn test_mutations_on_absent_uuid() {
    let h = running_index().await;
    let missing = Uuid::new_v4();

    assert_eq!(h.index.commit_artifact(missing).await.unwrap(), None);
    assert_eq!(h.index.update_storage_url(missing, "file:///x").await.unwrap(), None);
    assert!(!h.index.delete_artifact(missing).await.unwrap());

    // Nothing journaled for any of them
    assert_eq!(h.index.journal().active_entries(), 0);
}

#[tokio::test]
async fn test_update_storage_url_and_delete() {
    let h = running_index().await;
    let a = add_committed(&h.index, artifact("ns", "au", "http://example.com/a", 1, 1)).await;

    let moved = h
        .index
        .update_storage_url(a.uuid(), "file:///archive/moved.warc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.storage_url, "file:///archive/moved.warc");
    assert_eq!(h.index.get_artifact(a.uuid()).await.unwrap(), Some(moved));

    assert!(h.index.delete_artifact(a.uuid()).await.unwrap());
    assert_eq!(h.index.get_artifact(a.uuid()).await.unwrap(), None);
    assert!(!h.index.delete_artifact(a.uuid()).await.unwrap());
}

// =============================================================================
// Listings
// =============================================================================

#[tokio::test]
async fn test_latest_in_au_one_per_stem() {
    let h = running_index().await;
    for version in 1..=3 {
        add_committed(&h.index, artifact("ns", "au", "http://example.com/a", version, 1)).await;
    }
    for version in 1..=2 {
        add_committed(&h.index, artifact("ns", "au", "http://example.com/b", version, 1)).await;
    }
    // Uncommitted v4 hides behind committed v3 unless requested
    h.index
        .index_artifact(artifact("ns", "au", "http://example.com/a", 4, 1))
        .await
        .unwrap();

    let latest = h
        .index
        .get_artifacts_in_au("ns", "au", false)
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let found: Vec<(&str, u32)> = latest.iter().map(|a| (a.uri(), a.version())).collect();
    assert_eq!(found, vec![("http://example.com/a", 3), ("http://example.com/b", 2)]);

    let with_pending = h
        .index
        .get_artifacts_in_au("ns", "au", true)
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(with_pending[0].version(), 4);
}

#[tokio::test]
async fn test_all_versions_sorted_uri_then_version_desc() {
    let h = running_index().await;
    for (uri, version) in [("b", 1), ("a", 1), ("a", 2), ("b", 2), ("a", 3)] {
        add_committed(&h.index, artifact("ns", "au", uri, version, 1)).await;
    }

    let all = h
        .index
        .get_artifacts_all_versions_in_au("ns", "au", false)
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let found: Vec<(&str, u32)> = all.iter().map(|a| (a.uri(), a.version())).collect();
    assert_eq!(found, vec![("a", 3), ("a", 2), ("a", 1), ("b", 2), ("b", 1)]);
}

#[tokio::test]
async fn test_cross_au_latest_grouped_per_au() {
    let h = running_index().await;
    let uri = "http://example.com/shared";
    add_committed(&h.index, artifact("ns", "au1", uri, 1, 1)).await;
    add_committed(&h.index, artifact("ns", "au1", uri, 2, 1)).await;
    add_committed(&h.index, artifact("ns", "au2", uri, 1, 1)).await;
    add_committed(&h.index, artifact("ns", "au2", uri, 2, 1)).await;
    add_committed(&h.index, artifact("ns", "au2", uri, 3, 1)).await;
    add_committed(&h.index, artifact("other", "au1", uri, 9, 1)).await;

    let latest = h
        .index
        .get_artifacts_with_uri_from_all_aus("ns", uri, ArtifactVersions::Latest)
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let found: Vec<(&str, u32)> = latest.iter().map(|a| (a.auid(), a.version())).collect();
    assert_eq!(found, vec![("au1", 2), ("au2", 3)]);

    let stems: HashSet<ArtifactStem> = latest.iter().map(|a| a.stem()).collect();
    assert_eq!(stems.len(), latest.len());

    let all = h
        .index
        .get_artifacts_with_uri_from_all_aus("ns", uri, ArtifactVersions::All)
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn test_prefix_listings() {
    let h = running_index().await;
    add_committed(&h.index, artifact("ns", "au1", "http://example.com/dir/a", 1, 1)).await;
    add_committed(&h.index, artifact("ns", "au1", "http://example.com/dir/a", 2, 1)).await;
    add_committed(&h.index, artifact("ns", "au1", "http://example.com/other", 1, 1)).await;
    add_committed(&h.index, artifact("ns", "au2", "http://example.com/dir/b", 1, 1)).await;

    let in_au = h
        .index
        .get_artifacts_with_prefix("ns", "au1", "http://example.com/dir/", ArtifactVersions::All)
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(in_au.len(), 2);

    let across = h
        .index
        .get_artifacts_with_uri_prefix_from_all_aus(
            "ns",
            "http://example.com/dir/",
            ArtifactVersions::Latest,
        )
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let found: Vec<(&str, u32)> = across.iter().map(|a| (a.uri(), a.version())).collect();
    assert_eq!(
        found,
        vec![("http://example.com/dir/a", 2), ("http://example.com/dir/b", 1)]
    );
}

#[tokio::test]
async fn test_cursor_spans_many_batches() {
    let h = running_index().await;
    let uri = "http://example.com/many";
    for version in 1..=9 {
        add_committed(&h.index, artifact("ns", "au", uri, version, 1)).await;
    }

    let mut cursor = h.index.get_artifact_all_versions("ns", "au", uri, false).unwrap();
    let mut versions = Vec::new();
    while cursor.has_next().await.unwrap() {
        versions.push(cursor.next().await.unwrap().unwrap().version());
    }
    assert_eq!(versions, (1..=9).rev().collect::<Vec<u32>>());
    assert!(cursor.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_namespaces_and_au_ids() {
    let h = running_index().await;
    add_committed(&h.index, artifact("ns2", "auB", "u", 1, 1)).await;
    add_committed(&h.index, artifact("ns1", "auB", "u", 1, 1)).await;
    add_committed(&h.index, artifact("ns1", "auA", "u", 1, 1)).await;

    assert_eq!(h.index.get_namespaces().await.unwrap(), vec!["ns1", "ns2"]);
    assert_eq!(h.index.get_au_ids("ns1").await.unwrap(), vec!["auA", "auB"]);
    assert!(h.index.get_au_ids("missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_artifact_lookup() {
    let h = running_index().await;
    add_committed(&h.index, artifact("ns", "au", "u", 1, 1)).await;
    let v2 = add_committed(&h.index, artifact("ns", "au", "u", 2, 1)).await;

    let latest = h.index.get_latest_artifact("ns", "au", "u", false).await.unwrap();
    assert_eq!(latest, Some(v2));
    assert!(h.index.get_latest_artifact("ns", "au", "nope", true).await.unwrap().is_none());
}

// =============================================================================
// AU sizes
// =============================================================================

#[tokio::test]
async fn test_au_size_all_and_latest() {
    let h = running_index().await;
    h.storage.set_au_disk_size(AuKey::new("ns", "au"), 4096);

    add_committed(&h.index, artifact("ns", "au", "U1", 1, 100)).await;
    add_committed(&h.index, artifact("ns", "au", "U1", 2, 150)).await;
    // Uncommitted content does not count
    h.index
        .index_artifact(artifact("ns", "au", "U1", 3, 1000))
        .await
        .unwrap();

    let size = h.index.au_size("ns", "au").await.unwrap();
    assert_eq!(
        size,
        AuSize {
            total_all_versions: 250,
            total_latest_versions: 150,
            total_disk_size: 4096,
        }
    );
    assert!(h.sizes.contains(&AuKey::new("ns", "au")));
}

#[tokio::test]
async fn test_au_size_follows_mutations() {
    let h = running_index().await;
    let a = add_committed(&h.index, artifact("ns", "au", "U1", 1, 100)).await;
    assert_eq!(h.index.au_size("ns", "au").await.unwrap().total_all_versions, 100);

    add_committed(&h.index, artifact("ns", "au", "U2", 1, 50)).await;
    assert!(!h.sizes.contains(&AuKey::new("ns", "au")));
    assert_eq!(h.index.au_size("ns", "au").await.unwrap().total_all_versions, 150);

    h.index.delete_artifact(a.uuid()).await.unwrap();
    assert_eq!(h.index.au_size("ns", "au").await.unwrap().total_all_versions, 50);
}

#[tokio::test]
async fn test_au_size_of_unknown_au_is_zero() {
    let h = running_index().await;
    assert_eq!(h.index.au_size("ns", "nothing").await.unwrap(), AuSize::default());
    assert!(h.index.au_size("", "au").await.is_err());
}
