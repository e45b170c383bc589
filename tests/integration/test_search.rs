//! Similarity search over the fragment pool.

use std::sync::Arc;

use tempfile::TempDir;

use coalesce::vector::max_distance_for_similarity;
use coalesce::{Config, FragmentId, FragmentScope, FragmentStore, MemoryStore};

use super::common::{coordinator_with, two_groups, AllMembers};

#[tokio::test]
async fn test_each_fragment_finds_itself_first() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    for fragment in two_groups() {
        let vector = coordinator.embedding_of(fragment.id).await.unwrap();
        let query = coordinator.similarity_query(vector).limit(1);
        let hits = coordinator.find_similar(&query).await.unwrap();
        assert_eq!(hits[0].fragment_id, fragment.id);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[0].similarity() - 1.0).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_min_similarity_bounds_distance() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let query = coordinator
        .similarity_query(vec![1.0, 0.0, 0.0])
        .limit(10)
        .min_similarity(0.9);
    let hits = coordinator.find_similar(&query).await.unwrap();

    let found: Vec<FragmentId> = hits.iter().map(|h| h.fragment_id).collect();
    assert_eq!(found, vec![FragmentId(1), FragmentId(2), FragmentId(3)]);
    let bound = max_distance_for_similarity(0.9);
    assert!(hits.iter().all(|h| h.distance <= bound));
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn test_scope_filters_by_source() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let query = coordinator
        .similarity_query(vec![0.0, 1.0, 0.0])
        .limit(10)
        .filter(FragmentScope::all().source("chat"));
    let hits = coordinator.find_similar(&query).await.unwrap();

    let found: Vec<FragmentId> = hits.iter().map(|h| h.fragment_id).collect();
    assert_eq!(found, vec![FragmentId(4), FragmentId(3)]);
}

#[tokio::test]
async fn test_exclude_owned_after_session() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let handle = coordinator
        .start_session(coordinator.default_session_config(FragmentScope::all().source("wiki")))
        .await
        .unwrap();
    handle.wait().await.unwrap();

    // Only 1 and 2 share a group within "wiki"; 5 is left on its own.
    let query = coordinator.similarity_query(vec![1.0, 0.0, 0.0]).limit(10);
    assert_eq!(coordinator.find_similar(&query).await.unwrap().len(), 5);

    let unowned = coordinator
        .find_similar(&query.clone().exclude_owned(true))
        .await
        .unwrap();
    let found: Vec<FragmentId> = unowned.iter().map(|h| h.fragment_id).collect();
    assert_eq!(found, vec![FragmentId(3), FragmentId(4), FragmentId(5)]);
}

#[tokio::test]
async fn test_fragments_without_embedding_are_invisible() {
    let mut fragments = two_groups();
    fragments.push(coalesce::Fragment::new(6, "fact", "not embedded yet"));
    let store = Arc::new(MemoryStore::with_fragments(fragments));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let query = coordinator.similarity_query(vec![1.0, 0.0, 0.0]).limit(10);
    let hits = coordinator.find_similar(&query).await.unwrap();
    assert!(hits.iter().all(|h| h.fragment_id != FragmentId(6)));
    assert!(coordinator.embedding_of(FragmentId(6)).await.is_err());
    assert!(coordinator.embedding_of(FragmentId(42)).await.is_err());
}

#[tokio::test]
async fn test_store_loads_fragments_file_from_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fragments.jsonl");
    let lines: Vec<String> = two_groups()
        .iter()
        .map(|f| serde_json::to_string(f).unwrap())
        .collect();
    std::fs::write(&path, lines.join("\n")).unwrap();

    let toml = format!(
        r#"
        [storage]
        fragments_file = "{}"

        [workers]
        threads = 1
        "#,
        path.display()
    );
    let config = Config::from_str(&toml).unwrap();
    let coordinator = coalesce::ClusteringCoordinator::from_config(config)
        .await
        .unwrap();

    let stats = coordinator.stats().await.unwrap();
    assert_eq!(stats.fragment_count, 5);
    assert_eq!(stats.embedded_count, 5);

    let loaded = coordinator
        .store()
        .read_fragments(&[FragmentId(4)])
        .await
        .unwrap();
    assert_eq!(loaded[0].title, "Key rotation");
}
