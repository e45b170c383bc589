//! End-to-end session behaviour through the coordinator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use coalesce::{
    ChannelSink, DistanceMetric, ErrorClass, Fragment, FragmentId, FragmentScope, FragmentStore,
    Linkage, MemoryStore, SessionConfig, SessionEventKind, SessionStatus,
};

use super::common::{
    coordinator_with, two_groups, AllMembers, FailOnCall, Fixed, FlakyStore, Hanging,
};

fn ids(raw: &[u64]) -> Vec<FragmentId> {
    raw.iter().copied().map(FragmentId).collect()
}

#[tokio::test]
async fn test_two_groups_become_two_units() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let config =
        SessionConfig::hierarchical(Linkage::Average, 0.5).with_metric(DistanceMetric::Cosine);
    let handle = coordinator.start_session(config).await.unwrap();
    let session_id = handle.session_id();
    let record = handle.wait().await.unwrap();

    assert_eq!(record.status, SessionStatus::Completed);
    assert_eq!(record.claimed_count, 5);
    assert_eq!(record.clusters_found, 2);
    assert_eq!(record.units_created, 2);
    assert_eq!(record.unclustered_count, 0);

    let clusters = coordinator.clusters(session_id).await.unwrap();
    let mut sizes: Vec<usize> = clusters.iter().map(|c| c.len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 3]);

    let units = coordinator.knowledge_units(session_id).await.unwrap();
    assert_eq!(units.len(), 2);
    for unit in &units {
        assert!(unit.fragment_ids.len() >= 2);
        let cluster = clusters
            .iter()
            .find(|c| Some(c.id) == unit.cluster_id)
            .expect("unit points at its cluster");
        assert!(unit.fragment_ids.iter().all(|id| cluster.contains(*id)));
    }

    let fragments = store.fragments().await;
    assert!(fragments.iter().all(|f| f.is_owned() && !f.is_claimed()));

    let stats = coordinator.stats().await.unwrap();
    assert_eq!(stats.owned_count, 5);
    assert_eq!(stats.available_count, 0);
    assert_eq!(stats.claimed_count, 0);
}

#[tokio::test]
async fn test_ward_with_cosine_is_rejected_before_claiming() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let config =
        SessionConfig::hierarchical(Linkage::Ward, 0.5).with_metric(DistanceMetric::Cosine);
    let err = coordinator.start_session(config).await.err().unwrap();
    assert_eq!(err.class(), ErrorClass::Configuration);

    let stats = coordinator.stats().await.unwrap();
    assert_eq!(stats.session_count, 1);
    assert_eq!(stats.claimed_count, 0);
    assert_eq!(stats.owned_count, 0);
}

#[tokio::test]
async fn test_ward_with_cosine_records_failure() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let config =
        SessionConfig::hierarchical(Linkage::Ward, 0.5).with_metric(DistanceMetric::Cosine);
    let session_id = coordinator.create_session(config).await.unwrap();
    let (_cancel, signal) = coalesce::cancel_pair();
    assert!(coordinator.run_session(session_id, signal).await.is_err());

    let status = coordinator.get_session_status(session_id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Failed);
    assert_eq!(status.error.unwrap().class, ErrorClass::Configuration);
    assert_eq!(coordinator.get_session(session_id).await.unwrap().claimed_count, 0);
}

#[tokio::test]
async fn test_synthesizer_failure_returns_fragments_to_pool() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let (sink, mut events) = ChannelSink::new();
    let coordinator =
        coordinator_with(store.clone(), Arc::new(FailOnCall::new(1)), Some(Arc::new(sink))).await;

    let handle = coordinator
        .start_session(coordinator.default_session_config(FragmentScope::all()))
        .await
        .unwrap();
    let session_id = handle.session_id();
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::ExternalSynthesizer);

    let record = coordinator.get_session(session_id).await.unwrap();
    assert_eq!(record.status, SessionStatus::Failed);
    assert_eq!(record.units_created, 0);
    assert!(coordinator.knowledge_units(session_id).await.unwrap().is_empty());

    // The first cluster synthesized fine but nothing was committed.
    let fragments = store.fragments().await;
    assert!(fragments.iter().all(|f| !f.is_owned() && !f.is_claimed()));

    let query = coordinator
        .similarity_query(vec![1.0, 0.0, 0.0])
        .exclude_owned(true)
        .limit(10);
    let neighbors = coordinator.find_similar(&query).await.unwrap();
    assert_eq!(neighbors.len(), 5);

    let kinds: Vec<SessionEventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds.last(), Some(&SessionEventKind::Failed));
}

#[tokio::test]
async fn test_cancel_during_synthesis_releases_claims() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let called = Arc::new(Notify::new());
    let synthesizer = Arc::new(Hanging {
        called: called.clone(),
    });
    let coordinator = coordinator_with(store.clone(), synthesizer, None).await;

    let handle = coordinator
        .start_session(coordinator.default_session_config(FragmentScope::all()))
        .await
        .unwrap();
    let session_id = handle.session_id();

    tokio::time::timeout(Duration::from_secs(5), called.notified())
        .await
        .expect("synthesizer was called");
    assert!(!store.claimed_by(session_id).await.is_empty());

    handle.cancel();
    let err = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("session stops after cancel")
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Cancelled);

    let record = coordinator.get_session(session_id).await.unwrap();
    assert_eq!(record.status, SessionStatus::Failed);
    assert_eq!(record.error.unwrap().class, ErrorClass::Cancelled);
    assert!(store.claimed_by(session_id).await.is_empty());

    let stats = coordinator.stats().await.unwrap();
    assert_eq!(stats.owned_count, 0);
    assert_eq!(stats.available_count, 5);
}

#[tokio::test]
async fn test_all_candidates_rejected_still_completes() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let synthesizer = Arc::new(Fixed(vec![vec![1, 999]]));
    let coordinator = coordinator_with(store.clone(), synthesizer, None).await;

    let handle = coordinator
        .start_session(coordinator.default_session_config(FragmentScope::all()))
        .await
        .unwrap();
    let record = handle.wait().await.unwrap();

    assert_eq!(record.status, SessionStatus::Completed);
    assert_eq!(record.clusters_found, 2);
    assert_eq!(record.units_created, 0);
    assert_eq!(record.rejected_candidates, 2);

    let stats = coordinator.stats().await.unwrap();
    assert_eq!(stats.owned_count, 0);
    assert_eq!(stats.claimed_count, 0);
    assert_eq!(stats.available_count, 5);
}

#[tokio::test]
async fn test_overlapping_candidates_are_trimmed() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let synthesizer = Arc::new(Fixed(vec![vec![1, 2], vec![2, 3]]));
    let coordinator = coordinator_with(store.clone(), synthesizer, None).await;

    let handle = coordinator
        .start_session(coordinator.default_session_config(FragmentScope::all()))
        .await
        .unwrap();
    let session_id = handle.session_id();
    let record = handle.wait().await.unwrap();

    // {1,2,3}: [1,2] accepted, [2,3] trimmed to [3] and dropped.
    // {4,5}: both candidates name foreign fragments.
    assert_eq!(record.units_created, 1);
    assert_eq!(record.rejected_candidates, 3);

    let units = coordinator.knowledge_units(session_id).await.unwrap();
    assert_eq!(units[0].fragment_ids, ids(&[1, 2]));

    let owned: HashSet<FragmentId> = store
        .fragments()
        .await
        .into_iter()
        .filter(|f| f.is_owned())
        .map(|f| f.id)
        .collect();
    assert_eq!(owned, ids(&[1, 2]).into_iter().collect());
}

#[tokio::test]
async fn test_store_failure_during_commit_revokes_earlier_units() {
    let inner = Arc::new(MemoryStore::with_fragments(two_groups()));
    let store = Arc::new(FlakyStore::new(inner.clone(), 1));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let handle = coordinator
        .start_session(coordinator.default_session_config(FragmentScope::all()))
        .await
        .unwrap();
    let session_id = handle.session_id();
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Store);

    assert!(store.units_for_session(session_id).await.unwrap().is_empty());
    let fragments = inner.fragments().await;
    assert!(fragments.iter().all(|f| !f.is_owned() && !f.is_claimed()));
}

#[tokio::test]
async fn test_revoke_unit_frees_fragments_for_next_session() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;
    let config = coordinator.default_session_config(FragmentScope::all());

    let first = coordinator.start_session(config.clone()).await.unwrap();
    let first_id = first.session_id();
    first.wait().await.unwrap();

    let units = coordinator.knowledge_units(first_id).await.unwrap();
    let small = units.iter().find(|u| u.fragment_ids.len() == 2).unwrap();
    let mut released = coordinator.revoke_unit(small.id).await.unwrap();
    released.sort();
    assert_eq!(released, ids(&[4, 5]));

    let second = coordinator.start_session(config).await.unwrap();
    let record = second.wait().await.unwrap();
    assert_eq!(record.claimed_count, 2);
    assert_eq!(record.units_created, 1);
    assert_eq!(coordinator.stats().await.unwrap().owned_count, 5);
}

#[tokio::test]
async fn test_nothing_left_to_claim() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;
    let config = coordinator.default_session_config(FragmentScope::all().source("nowhere"));

    let handle = coordinator.start_session(config).await.unwrap();
    let record = handle.wait().await.unwrap();
    assert_eq!(record.status, SessionStatus::Failed);
    assert_eq!(record.error.unwrap().class, ErrorClass::ClaimConflict);
    assert_eq!(record.claimed_count, 0);
}

#[tokio::test]
async fn test_kmeans_and_dbscan_sessions() {
    for config in [
        SessionConfig::kmeans(2).with_metric(DistanceMetric::Cosine),
        SessionConfig::dbscan(0.1, 2).with_metric(DistanceMetric::Cosine),
    ] {
        let store = Arc::new(MemoryStore::with_fragments(two_groups()));
        let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

        let handle = coordinator.start_session(config).await.unwrap();
        let record = handle.wait().await.unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.clusters_found, 2);
        assert_eq!(record.units_created, 2);
    }
}

#[tokio::test]
async fn test_unusable_embeddings_are_skipped_not_fatal() {
    let mut fragments = two_groups();
    fragments.push(Fragment::new(6, "fact", "short vector").with_embedding(vec![1.0, 0.0]));
    fragments.push(
        Fragment::new(7, "fact", "corrupt vector").with_embedding(vec![f32::NAN, 1.0, 0.0]),
    );
    let store = Arc::new(MemoryStore::with_fragments(fragments));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;
    let config = coordinator.default_session_config(FragmentScope::all());

    let handle = coordinator.start_session(config).await.unwrap();
    let record = handle.wait().await.unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert_eq!(record.claimed_count, 7);
    assert_eq!(record.skipped_count, 2);
    assert_eq!(record.clusters_found, 2);
    assert_eq!(record.units_created, 2);

    for fragment in store.fragments().await {
        let skipped = fragment.id == FragmentId(6) || fragment.id == FragmentId(7);
        assert_eq!(fragment.is_owned(), !skipped);
        assert!(!fragment.is_claimed());
    }

    let stats = coordinator.stats().await.unwrap();
    assert_eq!(stats.claimed_count, 0);
    assert_eq!(stats.available_count, 2);
}

#[tokio::test]
async fn test_algorithm_failure_returns_fragments_to_pool() {
    let inner = Arc::new(MemoryStore::with_fragments(two_groups()));
    let store = Arc::new(FlakyStore::stripping_embeddings(inner.clone()));
    let (sink, mut events) = ChannelSink::new();
    let coordinator =
        coordinator_with(store.clone(), Arc::new(AllMembers), Some(Arc::new(sink))).await;

    let handle = coordinator
        .start_session(coordinator.default_session_config(FragmentScope::all()))
        .await
        .unwrap();
    let session_id = handle.session_id();
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Algorithm);

    let record = coordinator.get_session(session_id).await.unwrap();
    assert_eq!(record.status, SessionStatus::Failed);
    assert_eq!(record.error.unwrap().class, ErrorClass::Algorithm);
    assert_eq!(record.claimed_count, 5);
    assert_eq!(record.clusters_found, 0);
    assert!(coordinator.clusters(session_id).await.unwrap().is_empty());

    let query = coordinator
        .similarity_query(vec![1.0, 0.0, 0.0])
        .exclude_owned(true)
        .limit(10);
    assert_eq!(coordinator.find_similar(&query).await.unwrap().len(), 5);
    assert!(inner.claimed_by(session_id).await.is_empty());

    let kinds: Vec<SessionEventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![SessionEventKind::Started, SessionEventKind::Failed]);
}
