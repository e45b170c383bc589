//! In-process store backed by ordered maps behind a single lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cluster::MIN_CLUSTER_SIZE;
use crate::error::{Result, StoreError};
use crate::model::{Cluster, Fragment, FragmentId, KnowledgeUnit, SessionId, UnitId};
use crate::session::SessionRecord;
use crate::storage::{CommitOutcome, FragmentStore, StoreStats};
use crate::vector::{FragmentScope, Neighbor, SimilarityQuery, VectorIndex};

#[derive(Default)]
struct Inner {
    fragments: BTreeMap<FragmentId, Fragment>,
    clusters: HashMap<SessionId, Vec<Cluster>>,
    units: HashMap<UnitId, KnowledgeUnit>,
    sessions: HashMap<SessionId, SessionRecord>,
}

/// Memory-resident [`FragmentStore`].
///
/// One `RwLock` guards every table, so each multi-row write runs under a
/// single write guard and is atomic with respect to every other call.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding these fragments.
    pub fn with_fragments(fragments: impl IntoIterator<Item = Fragment>) -> Self {
        let inner = Inner {
            fragments: fragments.into_iter().map(|f| (f.id, f)).collect(),
            ..Default::default()
        };
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Load fragments from a JSON Lines file, one fragment per line.
    ///
    /// Blank lines are skipped. Returns the number of fragments loaded.
    pub async fn load_jsonl(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(StoreError::Io)?;

        let mut fragments = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fragment: Fragment =
                serde_json::from_str(line).map_err(|e| StoreError::Malformed {
                    line: index + 1,
                    message: e.to_string(),
                })?;
            fragments.push(fragment);
        }

        let count = self.insert_fragments(fragments).await?;
        info!("Loaded {} fragments from {}", count, path.display());
        Ok(count)
    }

    /// Write every fragment, in id order, as JSON Lines.
    pub async fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let (body, count) = {
            let inner = self.inner.read().await;
            let mut body = String::new();
            for fragment in inner.fragments.values() {
                body.push_str(&serde_json::to_string(fragment)?);
                body.push('\n');
            }
            (body, inner.fragments.len())
        };

        tokio::fs::write(path, body).await.map_err(StoreError::Io)?;
        info!("Exported {} fragments to {}", count, path.display());
        Ok(count)
    }

    /// Copy of every fragment, in id order.
    pub async fn fragments(&self) -> Vec<Fragment> {
        self.inner.read().await.fragments.values().cloned().collect()
    }

    /// Fragments currently claimed by a session.
    pub async fn claimed_by(&self, session_id: SessionId) -> Vec<FragmentId> {
        self.inner
            .read()
            .await
            .fragments
            .values()
            .filter(|f| f.claimed_by == Some(session_id))
            .map(|f| f.id)
            .collect()
    }
}

#[async_trait]
impl FragmentStore for MemoryStore {
    async fn insert_fragments(&self, fragments: Vec<Fragment>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let count = fragments.len();
        for fragment in fragments {
            inner.fragments.insert(fragment.id, fragment);
        }
        Ok(count)
    }

    async fn query_vector_neighbors(&self, query: &SimilarityQuery) -> Result<Vec<Neighbor>> {
        let inner = self.inner.read().await;
        Ok(VectorIndex::find_similar(inner.fragments.values(), query))
    }

    async fn read_fragments(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>> {
        let inner = self.inner.read().await;
        let mut wanted: Vec<FragmentId> = ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();
        Ok(wanted
            .into_iter()
            .filter_map(|id| inner.fragments.get(&id).cloned())
            .collect())
    }

    async fn claim_unowned(
        &self,
        scope: &FragmentScope,
        session_id: SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<FragmentId>> {
        let mut inner = self.inner.write().await;
        let limit = limit.unwrap_or(usize::MAX);

        let mut claimed = Vec::new();
        for fragment in inner.fragments.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            let eligible = fragment.embedding.is_some() && fragment.is_available();
            if !eligible || !scope.matches(fragment) {
                continue;
            }
            fragment.claimed_by = Some(session_id);
            claimed.push(fragment.id);
        }

        debug!("Session {} claimed {} fragments", session_id, claimed.len());
        Ok(claimed)
    }

    async fn release(&self, session_id: SessionId, ids: &[FragmentId]) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut released = 0;
        for id in ids {
            if let Some(fragment) = inner.fragments.get_mut(id) {
                if fragment.claimed_by == Some(session_id) {
                    fragment.claimed_by = None;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn release_session(&self, session_id: SessionId) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut released = 0;
        for fragment in inner.fragments.values_mut() {
            if fragment.claimed_by == Some(session_id) {
                fragment.claimed_by = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn write_clusters(&self, session_id: SessionId, clusters: &[Cluster]) -> Result<()> {
        let mut inner = self.inner.write().await;

        let existing = inner.clusters.get(&session_id);
        let mut ordinals: HashSet<usize> = existing
            .map(|cs| cs.iter().map(|c| c.ordinal).collect())
            .unwrap_or_default();
        let mut members: HashSet<FragmentId> = existing
            .map(|cs| cs.iter().flat_map(|c| c.fragment_ids.iter().copied()).collect())
            .unwrap_or_default();

        for cluster in clusters {
            if cluster.session_id != session_id {
                return Err(StoreError::InvalidOperation(format!(
                    "cluster {} belongs to session {}, not {}",
                    cluster.id, cluster.session_id, session_id
                ))
                .into());
            }
            if cluster.len() < MIN_CLUSTER_SIZE {
                return Err(StoreError::InvalidOperation(format!(
                    "cluster {} has {} members, need at least {}",
                    cluster.ordinal,
                    cluster.len(),
                    MIN_CLUSTER_SIZE
                ))
                .into());
            }
            if !ordinals.insert(cluster.ordinal) {
                return Err(StoreError::InvalidOperation(format!(
                    "session {} already has cluster {}",
                    session_id, cluster.ordinal
                ))
                .into());
            }
            for id in &cluster.fragment_ids {
                let fragment = inner
                    .fragments
                    .get(id)
                    .ok_or(StoreError::FragmentNotFound(id.0))?;
                if fragment.claimed_by != Some(session_id) {
                    return Err(StoreError::InvalidOperation(format!(
                        "fragment {} is not claimed by session {}",
                        id, session_id
                    ))
                    .into());
                }
                if !members.insert(*id) {
                    return Err(StoreError::InvalidOperation(format!(
                        "fragment {} appears in two clusters of session {}",
                        id, session_id
                    ))
                    .into());
                }
            }
        }

        let stored = inner.clusters.entry(session_id).or_default();
        stored.extend(clusters.iter().cloned());
        stored.sort_by_key(|c| c.ordinal);
        Ok(())
    }

    async fn clusters_for_session(&self, session_id: SessionId) -> Result<Vec<Cluster>> {
        let inner = self.inner.read().await;
        Ok(inner.clusters.get(&session_id).cloned().unwrap_or_default())
    }

    async fn commit_knowledge_unit(
        &self,
        unit: &KnowledgeUnit,
        claimant: Option<SessionId>,
    ) -> Result<CommitOutcome> {
        let mut inner = self.inner.write().await;

        if unit.fragment_ids.is_empty() {
            return Err(StoreError::InvalidOperation(format!(
                "knowledge unit {} has no fragments",
                unit.id
            ))
            .into());
        }
        if inner.units.contains_key(&unit.id) {
            return Err(StoreError::InvalidOperation(format!(
                "knowledge unit {} already exists",
                unit.id
            ))
            .into());
        }

        let mut conflicts = Vec::new();
        for id in &unit.fragment_ids {
            let fragment = inner
                .fragments
                .get(id)
                .ok_or(StoreError::FragmentNotFound(id.0))?;
            let held_elsewhere = fragment.claimed_by.is_some() && fragment.claimed_by != claimant;
            if fragment.knowledge_unit_id.is_some() || held_elsewhere {
                conflicts.push(*id);
            }
        }
        if !conflicts.is_empty() {
            return Ok(CommitOutcome::Conflict {
                fragment_ids: conflicts,
            });
        }

        for id in &unit.fragment_ids {
            if let Some(fragment) = inner.fragments.get_mut(id) {
                fragment.knowledge_unit_id = Some(unit.id);
                fragment.claimed_by = None;
            }
        }
        inner.units.insert(unit.id, unit.clone());
        Ok(CommitOutcome::Committed)
    }

    async fn revoke_knowledge_unit(&self, unit_id: UnitId) -> Result<Vec<FragmentId>> {
        let mut inner = self.inner.write().await;
        let unit = inner
            .units
            .remove(&unit_id)
            .ok_or_else(|| StoreError::UnitNotFound(unit_id.to_string()))?;

        let mut released = Vec::new();
        for id in &unit.fragment_ids {
            if let Some(fragment) = inner.fragments.get_mut(id) {
                if fragment.knowledge_unit_id == Some(unit_id) {
                    fragment.knowledge_unit_id = None;
                    released.push(*id);
                }
            }
        }
        Ok(released)
    }

    async fn knowledge_unit(&self, unit_id: UnitId) -> Result<Option<KnowledgeUnit>> {
        Ok(self.inner.read().await.units.get(&unit_id).cloned())
    }

    async fn units_for_session(&self, session_id: SessionId) -> Result<Vec<KnowledgeUnit>> {
        let inner = self.inner.read().await;
        let mut units: Vec<KnowledgeUnit> = inner
            .units
            .values()
            .filter(|u| u.session_id == Some(session_id))
            .cloned()
            .collect();
        units.sort_by_key(|u| u.fragment_ids.first().copied());
        Ok(units)
    }

    async fn create_session(&self, record: &SessionRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&record.id) {
            return Err(StoreError::InvalidOperation(format!(
                "session {} already exists",
                record.id
            ))
            .into());
        }
        inner.sessions.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_session(&self, record: &SessionRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(record.id.to_string()).into()),
        }
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.inner.read().await.sessions.get(&session_id).cloned())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.read().await;
        let fragments = inner.fragments.values();

        let mut stats = StoreStats {
            fragment_count: inner.fragments.len(),
            cluster_count: inner.clusters.values().map(Vec::len).sum(),
            unit_count: inner.units.len(),
            session_count: inner.sessions.len(),
            ..Default::default()
        };
        for fragment in fragments {
            let embedded = fragment.embedding.is_some();
            stats.embedded_count += embedded as usize;
            stats.owned_count += fragment.is_owned() as usize;
            stats.claimed_count += fragment.is_claimed() as usize;
            stats.available_count += (embedded && fragment.is_available()) as usize;
        }
        Ok(stats)
    }
}
