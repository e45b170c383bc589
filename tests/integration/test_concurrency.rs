//! Concurrent sessions over a shared store.

use std::collections::HashSet;
use std::sync::Arc;

use coalesce::{
    FragmentId, FragmentScope, FragmentStore, MemoryStore, SessionId, SessionStatus,
};

use super::common::{coordinator_with, two_groups, AllMembers};

fn many_fragments(n: u64) -> Vec<coalesce::Fragment> {
    (1..=n)
        .map(|i| {
            let angle = i as f32 * 0.05;
            coalesce::Fragment::new(i, "fact", format!("fragment {}", i))
                .with_embedding(vec![angle.cos(), angle.sin()])
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_disjoint() {
    let store = Arc::new(MemoryStore::with_fragments(many_fragments(200)));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .claim_unowned(&FragmentScope::all(), SessionId::new(), Some(40))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut seen: HashSet<FragmentId> = HashSet::new();
    let mut total = 0;
    for task in tasks {
        let claimed = task.await.unwrap();
        total += claimed.len();
        for id in claimed {
            assert!(seen.insert(id), "fragment {} claimed twice", id);
        }
    }
    assert_eq!(total, 200);
    assert_eq!(store.stats().await.unwrap().available_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_never_share_fragments() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;
    let config = coordinator.default_session_config(FragmentScope::all());

    let first = coordinator.start_session(config.clone()).await.unwrap();
    let second = coordinator.start_session(config).await.unwrap();
    let ids = [first.session_id(), second.session_id()];
    let records = [first.wait().await.unwrap(), second.wait().await.unwrap()];

    let claimed: usize = records.iter().map(|r| r.claimed_count).sum();
    assert_eq!(claimed, 5);
    // The loser either found nothing or got a disjoint remainder.
    for record in &records {
        assert!(matches!(
            record.status,
            SessionStatus::Completed | SessionStatus::Failed
        ));
    }

    let mut owned: HashSet<FragmentId> = HashSet::new();
    for id in ids {
        for unit in coordinator.knowledge_units(id).await.unwrap() {
            for fragment_id in unit.fragment_ids {
                assert!(owned.insert(fragment_id), "fragment {} in two units", fragment_id);
            }
        }
    }

    let fragments = store.fragments().await;
    assert!(fragments.iter().all(|f| !f.is_claimed()));
    for fragment in fragments.iter().filter(|f| f.is_owned()) {
        assert!(owned.contains(&fragment.id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commit_loses_to_existing_owner() {
    let store = Arc::new(MemoryStore::with_fragments(two_groups()));
    let coordinator = coordinator_with(store.clone(), Arc::new(AllMembers), None).await;

    let handle = coordinator
        .start_session(coordinator.default_session_config(FragmentScope::all()))
        .await
        .unwrap();
    let session_id = handle.session_id();
    handle.wait().await.unwrap();

    // Re-committing a copy of an existing unit under a new id must conflict.
    let mut copy = coordinator.knowledge_units(session_id).await.unwrap().remove(0);
    copy.id = coalesce::UnitId::new();
    let outcome = store.commit_knowledge_unit(&copy, None).await.unwrap();
    assert!(!outcome.is_committed());
    assert!(store.knowledge_unit(copy.id).await.unwrap().is_none());
}
