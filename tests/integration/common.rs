//! Shared fixtures: fragment sets, scripted synthesizers and a flaky store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use coalesce::error::{Result, StoreError, SynthesisError};
use coalesce::model::{Cluster, Fragment, FragmentId, KnowledgeUnit, SessionId, UnitId};
use coalesce::notify::NotificationSink;
use coalesce::session::SessionRecord;
use coalesce::storage::{CommitOutcome, FragmentStore, MemoryStore, StoreStats};
use coalesce::synthesis::{CandidateUnit, SynthesisRequest, SynthesisResponse, Synthesizer};
use coalesce::vector::{FragmentScope, Neighbor, SimilarityQuery};
use coalesce::{ClusteringCoordinator, ClusteringCoordinatorBuilder, Config};

/// {1,2,3} near-identical, {4,5} near-identical and far from the first group.
pub fn two_groups() -> Vec<Fragment> {
    vec![
        Fragment::new(1, "fact", "The API gateway times out after 30 seconds")
            .with_title("Gateway timeout")
            .with_source("wiki")
            .with_embedding(vec![1.0, 0.0, 0.0]),
        Fragment::new(2, "fact", "Gateway requests are cut off at 30s")
            .with_title("Gateway cutoff")
            .with_source("wiki")
            .with_embedding(vec![0.99, 0.01, 0.0]),
        Fragment::new(3, "fact", "A 30 second timeout applies at the gateway")
            .with_title("Timeout at gateway")
            .with_source("chat")
            .with_embedding(vec![0.98, 0.0, 0.02]),
        Fragment::new(4, "howto", "Rotate the signing key with the admin CLI")
            .with_title("Key rotation")
            .with_source("chat")
            .with_embedding(vec![0.0, 1.0, 0.0]),
        Fragment::new(5, "howto", "Use the admin CLI to rotate signing keys")
            .with_title("Rotating keys")
            .with_source("wiki")
            .with_embedding(vec![0.0, 0.99, 0.01]),
    ]
}

pub async fn coordinator_with(
    store: Arc<dyn FragmentStore>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Option<Arc<dyn NotificationSink>>,
) -> ClusteringCoordinator {
    let mut config = Config::default();
    config.workers.threads = 2;
    let mut builder = ClusteringCoordinatorBuilder::new()
        .config(config)
        .store(store)
        .synthesizer(synthesizer);
    if let Some(sink) = sink {
        builder = builder.sink(sink);
    }
    builder.build().await.unwrap()
}

fn candidate(ids: &[u64]) -> CandidateUnit {
    CandidateUnit {
        fragment_ids: ids.iter().copied().map(FragmentId).collect(),
        title: format!("Unit over {:?}", ids),
        summary: "Consolidated".to_string(),
        category: "fact".to_string(),
        content: "Consolidated content".to_string(),
        confidence: "high".to_string(),
        confidence_comment: None,
        clustering_rationale: Some("Same topic".to_string()),
    }
}

/// One candidate covering every fragment in the request.
pub struct AllMembers;

#[async_trait]
impl Synthesizer for AllMembers {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResponse> {
        let ids: Vec<u64> = request.fragments.iter().map(|f| f.id.0).collect();
        Ok(SynthesisResponse {
            knowledge_units: vec![candidate(&ids)],
            message: None,
        })
    }

    fn name(&self) -> &str {
        "all-members"
    }
}

/// Returns fixed candidates regardless of the request.
pub struct Fixed(pub Vec<Vec<u64>>);

#[async_trait]
impl Synthesizer for Fixed {
    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<SynthesisResponse> {
        Ok(SynthesisResponse {
            knowledge_units: self.0.iter().map(|ids| candidate(ids)).collect(),
            message: None,
        })
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Fails the nth call (0-based) and succeeds with all members otherwise.
pub struct FailOnCall {
    pub fail_at: usize,
    calls: AtomicUsize,
}

impl FailOnCall {
    pub fn new(fail_at: usize) -> Self {
        Self {
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Synthesizer for FailOnCall {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResponse> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(SynthesisError::Timeout(30).into());
        }
        AllMembers.synthesize(request).await
    }

    fn name(&self) -> &str {
        "fail-on-call"
    }
}

/// Never answers. `called` is notified on the first call.
pub struct Hanging {
    pub called: Arc<Notify>,
}

#[async_trait]
impl Synthesizer for Hanging {
    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<SynthesisResponse> {
        self.called.notify_one();
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

/// Delegates to a `MemoryStore` with injected faults: the nth unit commit
/// (0-based) fails, and reads can come back without embeddings.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    fail_commit_at: Option<usize>,
    strip_embeddings: bool,
    commits: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, fail_commit_at: usize) -> Self {
        Self {
            inner,
            fail_commit_at: Some(fail_commit_at),
            strip_embeddings: false,
            commits: AtomicUsize::new(0),
        }
    }

    /// Reads return fragments with their embeddings cleared.
    pub fn stripping_embeddings(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_commit_at: None,
            strip_embeddings: true,
            commits: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FragmentStore for FlakyStore {
    async fn insert_fragments(&self, fragments: Vec<Fragment>) -> Result<usize> {
        self.inner.insert_fragments(fragments).await
    }

    async fn query_vector_neighbors(&self, query: &SimilarityQuery) -> Result<Vec<Neighbor>> {
        self.inner.query_vector_neighbors(query).await
    }

    async fn read_fragments(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>> {
        let mut fragments = self.inner.read_fragments(ids).await?;
        if self.strip_embeddings {
            for fragment in &mut fragments {
                fragment.embedding = None;
            }
        }
        Ok(fragments)
    }

    async fn claim_unowned(
        &self,
        scope: &FragmentScope,
        session_id: SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<FragmentId>> {
        self.inner.claim_unowned(scope, session_id, limit).await
    }

    async fn release(&self, session_id: SessionId, ids: &[FragmentId]) -> Result<usize> {
        self.inner.release(session_id, ids).await
    }

    async fn release_session(&self, session_id: SessionId) -> Result<usize> {
        self.inner.release_session(session_id).await
    }

    async fn write_clusters(&self, session_id: SessionId, clusters: &[Cluster]) -> Result<()> {
        self.inner.write_clusters(session_id, clusters).await
    }

    async fn clusters_for_session(&self, session_id: SessionId) -> Result<Vec<Cluster>> {
        self.inner.clusters_for_session(session_id).await
    }

    async fn commit_knowledge_unit(
        &self,
        unit: &KnowledgeUnit,
        claimant: Option<SessionId>,
    ) -> Result<CommitOutcome> {
        if Some(self.commits.fetch_add(1, Ordering::SeqCst)) == self.fail_commit_at {
            return Err(StoreError::InvalidOperation("disk full".to_string()).into());
        }
        self.inner.commit_knowledge_unit(unit, claimant).await
    }

    async fn revoke_knowledge_unit(&self, unit_id: UnitId) -> Result<Vec<FragmentId>> {
        self.inner.revoke_knowledge_unit(unit_id).await
    }

    async fn knowledge_unit(&self, unit_id: UnitId) -> Result<Option<KnowledgeUnit>> {
        self.inner.knowledge_unit(unit_id).await
    }

    async fn units_for_session(&self, session_id: SessionId) -> Result<Vec<KnowledgeUnit>> {
        self.inner.units_for_session(session_id).await
    }

    async fn create_session(&self, record: &SessionRecord) -> Result<()> {
        self.inner.create_session(record).await
    }

    async fn update_session(&self, record: &SessionRecord) -> Result<()> {
        self.inner.update_session(record).await
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>> {
        self.inner.get_session(session_id).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }
}
