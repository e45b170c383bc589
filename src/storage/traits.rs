//! Store trait definitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Cluster, Fragment, FragmentId, KnowledgeUnit, SessionId, UnitId};
use crate::session::SessionRecord;
use crate::vector::{FragmentScope, Neighbor, SimilarityQuery};

/// Result of a knowledge unit commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// Unit stored and every member fragment now points at it.
    Committed,
    /// Some members were already owned or held by another claimant.
    /// Nothing was written.
    Conflict { fragment_ids: Vec<FragmentId> },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of fragments
    pub fragment_count: usize,
    /// Fragments with an embedding
    pub embedded_count: usize,
    /// Fragments owned by a knowledge unit
    pub owned_count: usize,
    /// Fragments claimed by a running session
    pub claimed_count: usize,
    /// Embedded fragments neither owned nor claimed
    pub available_count: usize,
    /// Number of persisted clusters
    pub cluster_count: usize,
    /// Number of knowledge units
    pub unit_count: usize,
    /// Number of sessions
    pub session_count: usize,
}

/// Persistence for fragments, clusters, knowledge units and sessions.
///
/// Every operation that touches several rows (claim, cluster batch, commit,
/// revoke) is a single atomic step: either all rows change or none do.
/// Ownership changes are conditional updates on the current owner, so two
/// writers racing over the same fragment cannot both win.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// Insert or replace fragments. Returns how many were written.
    async fn insert_fragments(&self, fragments: Vec<Fragment>) -> Result<usize>;

    /// Ranked nearest neighbours of the query vector.
    async fn query_vector_neighbors(&self, query: &SimilarityQuery) -> Result<Vec<Neighbor>>;

    /// Read fragments by id, in id order. Unknown ids are skipped.
    async fn read_fragments(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>>;

    /// Claim every embedded, unowned, unclaimed fragment in `scope` for the
    /// session, lowest ids first, up to `limit`. An empty result is not an error.
    async fn claim_unowned(
        &self,
        scope: &FragmentScope,
        session_id: SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<FragmentId>>;

    /// Drop the session's claim on these fragments. Fragments claimed by
    /// anyone else are left alone. Returns how many were released.
    async fn release(&self, session_id: SessionId, ids: &[FragmentId]) -> Result<usize>;

    /// Drop every claim the session still holds.
    async fn release_session(&self, session_id: SessionId) -> Result<usize>;

    /// Persist a batch of clusters for a session. Every member must be claimed
    /// by the session.
    async fn write_clusters(&self, session_id: SessionId, clusters: &[Cluster]) -> Result<()>;

    /// Persist a single cluster.
    async fn write_cluster(
        &self,
        session_id: SessionId,
        ordinal: usize,
        fragment_ids: Vec<FragmentId>,
    ) -> Result<Cluster> {
        let cluster = Cluster::new(session_id, ordinal, fragment_ids);
        self.write_clusters(session_id, std::slice::from_ref(&cluster))
            .await?;
        Ok(cluster)
    }

    /// Clusters of a session, in ordinal order.
    async fn clusters_for_session(&self, session_id: SessionId) -> Result<Vec<Cluster>>;

    /// Store a unit and take ownership of its fragments.
    ///
    /// Succeeds only if every member is unowned and either unclaimed or
    /// claimed by `claimant`. Claims are cleared on success.
    async fn commit_knowledge_unit(
        &self,
        unit: &KnowledgeUnit,
        claimant: Option<SessionId>,
    ) -> Result<CommitOutcome>;

    /// Delete a unit and return its fragments to the unowned pool.
    async fn revoke_knowledge_unit(&self, unit_id: UnitId) -> Result<Vec<FragmentId>>;

    /// Get a unit by id.
    async fn knowledge_unit(&self, unit_id: UnitId) -> Result<Option<KnowledgeUnit>>;

    /// Units committed by a session.
    async fn units_for_session(&self, session_id: SessionId) -> Result<Vec<KnowledgeUnit>>;

    /// Persist a new session record.
    async fn create_session(&self, record: &SessionRecord) -> Result<()>;

    /// Overwrite an existing session record.
    async fn update_session(&self, record: &SessionRecord) -> Result<()>;

    /// Get a session record.
    async fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>>;

    /// Get store statistics.
    async fn stats(&self) -> Result<StoreStats>;
}
