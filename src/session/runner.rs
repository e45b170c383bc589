//! Executes one clustering session end to end.
//!
//! Pending -> Running -> claim -> partition (worker pool) -> persist clusters
//! -> synthesize every cluster -> commit units -> Completed.
//!
//! Any failure after the claim releases every fragment the session still
//! holds. Units are committed only after all synthesizer calls succeeded, and
//! a store error during commit revokes the units already committed.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::cancel::CancelSignal;
use super::state::{SessionFailure, SessionRecord, SessionStatus};
use crate::cluster::{DistanceMatrix, Partition, PartitionMetrics, WorkingSet};
use crate::error::{ClusterError, CoalesceError, ErrorClass, Result, SessionError};
use crate::metrics;
use crate::model::{Cluster, Fragment, SessionId, UnitId};
use crate::notify::{NotificationSink, SessionEvent, SessionEventKind};
use crate::storage::{CommitOutcome, FragmentStore};
use crate::synthesis::{ClusterSynthesis, SynthesisCoordinator};

/// Build a CPU worker pool with `threads` threads.
pub fn build_worker_pool(threads: usize) -> Result<Arc<rayon::ThreadPool>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("coalesce-worker-{}", i))
        .build()
        .map_err(|e| SessionError::WorkerPool(e.to_string()))?;
    Ok(Arc::new(pool))
}

/// Runs sessions against a store, a synthesizer and a notification sink.
#[derive(Clone)]
pub struct SessionRunner {
    store: Arc<dyn FragmentStore>,
    synthesis: Arc<SynthesisCoordinator>,
    sink: Arc<dyn NotificationSink>,
    pool: Arc<rayon::ThreadPool>,
}

impl SessionRunner {
    pub fn new(
        store: Arc<dyn FragmentStore>,
        synthesis: Arc<SynthesisCoordinator>,
        sink: Arc<dyn NotificationSink>,
        pool: Arc<rayon::ThreadPool>,
    ) -> Self {
        Self {
            store,
            synthesis,
            sink,
            pool,
        }
    }

    /// Run a Pending session to a terminal state.
    ///
    /// Returns the final record. A session that found nothing to claim ends
    /// Failed but is returned as `Ok`; every other failure is recorded on the
    /// session and then returned as the error.
    pub async fn run(&self, session_id: SessionId, cancel: CancelSignal) -> Result<SessionRecord> {
        let mut record = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if let Err(e) = record.config.validate() {
            let err = CoalesceError::from(e);
            warn!("Session {} rejected: {}", session_id, err);
            record.fail(SessionFailure::from(&err))?;
            self.store.update_session(&record).await?;
            metrics::record(|m| m.sessions_failed_total.inc());
            self.publish(SessionEventKind::Failed, session_id, err.to_string())
                .await;
            return Err(err);
        }

        record.transition(SessionStatus::Running)?;
        self.store.update_session(&record).await?;
        metrics::record(|m| {
            m.sessions_started_total.inc();
            m.active_sessions.inc();
        });
        info!(
            "Session {} started ({}, {})",
            session_id,
            record.config.algorithm.kind().as_str(),
            record.config.metric.as_str()
        );
        self.publish(SessionEventKind::Started, session_id, "session started")
            .await;

        let outcome = self.execute(&mut record, &cancel).await;

        match self.store.release_session(session_id).await {
            Ok(0) => {}
            Ok(released) => {
                debug!("Session {} released {} claimed fragments", session_id, released);
                metrics::record(|m| m.fragments_released_total.inc_by(released as u64));
            }
            Err(e) => error!("Session {} failed to release claims: {}", session_id, e),
        }
        metrics::record(|m| m.active_sessions.dec());

        match outcome {
            Ok(()) => {
                record.transition(SessionStatus::Completed)?;
                self.store.update_session(&record).await?;
                metrics::record(|m| m.sessions_completed_total.inc());
                let message = format!(
                    "{} clusters, {} knowledge units",
                    record.clusters_found, record.units_created
                );
                info!("Session {} completed: {}", session_id, message);
                self.publish(SessionEventKind::Completed, session_id, message)
                    .await;
                Ok(record)
            }
            Err(err) => {
                let failure = SessionFailure::from(&err);
                record.fail(failure.clone())?;
                if let Err(e) = self.store.update_session(&record).await {
                    error!("Session {} failed to record failure: {}", session_id, e);
                }
                metrics::record(|m| m.sessions_failed_total.inc());
                self.publish(SessionEventKind::Failed, session_id, failure.message.clone())
                    .await;

                if failure.class == ErrorClass::ClaimConflict {
                    info!("Session {} had nothing to claim", session_id);
                    Ok(record)
                } else {
                    warn!("Session {} failed: {}", session_id, failure.message);
                    Err(err)
                }
            }
        }
    }

    async fn execute(&self, record: &mut SessionRecord, cancel: &CancelSignal) -> Result<()> {
        let session_id = record.id;
        let config = record.config.clone();

        let claimed = self
            .store
            .claim_unowned(&config.scope, session_id, config.max_fragments)
            .await?;
        record.claimed_count = claimed.len();
        metrics::record(|m| m.fragments_claimed_total.inc_by(claimed.len() as u64));
        if claimed.is_empty() {
            return Err(SessionError::NothingToClaim.into());
        }
        info!("Session {} claimed {} fragments", session_id, claimed.len());

        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled.into());
        }

        let (fragments, skipped) =
            WorkingSet::split_clusterable(self.store.read_fragments(&claimed).await?);
        if !skipped.is_empty() {
            warn!(
                "Session {} skipping {} fragments with unusable embeddings: {:?}",
                session_id,
                skipped.len(),
                skipped
            );
            let released = self.store.release(session_id, &skipped).await?;
            record.skipped_count = skipped.len();
            metrics::record(|m| m.fragments_released_total.inc_by(released as u64));
        }
        if fragments.is_empty() {
            return Err(
                ClusterError::EmptyInput("no claimed fragment has a usable embedding".to_string())
                    .into(),
            );
        }

        let (partition, partition_metrics) =
            self.partition(fragments.clone(), record, cancel).await?;

        let clusters: Vec<Cluster> = partition
            .clusters
            .iter()
            .enumerate()
            .map(|(i, ids)| Cluster::new(session_id, i + 1, ids.clone()))
            .collect();
        if !clusters.is_empty() {
            self.store.write_clusters(session_id, &clusters).await?;
        }
        record.clusters_found = clusters.len();
        metrics::record(|m| m.clusters_persisted_total.inc_by(clusters.len() as u64));

        let released = self.store.release(session_id, &partition.unclustered).await?;
        record.unclustered_count = partition.unclustered.len();
        metrics::record(|m| m.fragments_released_total.inc_by(released as u64));
        record.metrics = Some(partition_metrics);
        self.store.update_session(record).await?;

        info!(
            "Session {} persisted {} clusters, released {} unclustered fragments",
            session_id,
            clusters.len(),
            released
        );
        self.publish(
            SessionEventKind::ClusterBatchReady,
            session_id,
            format!("{} clusters ready for synthesis", clusters.len()),
        )
        .await;

        let syntheses = self.synthesize(session_id, &clusters, &fragments, cancel).await?;
        record.rejected_candidates = syntheses.iter().map(|s| s.rejected.len()).sum();
        metrics::record(|m| {
            m.candidates_rejected_total
                .inc_by(record.rejected_candidates as u64)
        });

        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled.into());
        }

        let (committed, conflicts) = self.commit(session_id, syntheses).await?;
        record.units_created = committed.len();
        record.rejected_candidates += conflicts;
        Ok(())
    }

    /// Build the matrix and partition on the worker pool.
    async fn partition(
        &self,
        fragments: Vec<Fragment>,
        record: &SessionRecord,
        cancel: &CancelSignal,
    ) -> Result<(Partition, PartitionMetrics)> {
        let algorithm = record.config.algorithm.clone();
        let metric = record.config.metric;
        let (tx, rx) = oneshot::channel();

        self.pool.spawn(move || {
            let result = (|| -> std::result::Result<(Partition, PartitionMetrics), ClusterError> {
                let set = WorkingSet::from_fragments(&fragments)?;
                let matrix = {
                    let _timer = metrics::timer(|m| &m.matrix_build_duration_seconds);
                    DistanceMatrix::from_working_set(&set, metric)
                };
                let partitioner = algorithm.partitioner();
                let partition = {
                    let _timer = metrics::timer(|m| &m.partition_duration_seconds);
                    partitioner.partition(&set, &matrix)?
                };
                let quality = PartitionMetrics::compute(&set, &matrix, &partition);
                Ok((partition, quality))
            })();
            // The receiver is gone if the session was cancelled.
            let _ = tx.send(result);
        });

        tokio::select! {
            result = rx => {
                let result = result.map_err(|_| {
                    SessionError::WorkerPool("worker dropped the partition".to_string())
                })?;
                Ok(result?)
            }
            _ = cancel.cancelled() => Err(SessionError::Cancelled.into()),
        }
    }

    /// Synthesize and validate every cluster. Nothing is committed here.
    async fn synthesize(
        &self,
        session_id: SessionId,
        clusters: &[Cluster],
        fragments: &[Fragment],
        cancel: &CancelSignal,
    ) -> Result<Vec<ClusterSynthesis>> {
        let mut syntheses = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let _timer = metrics::timer(|m| &m.synthesis_duration_seconds);
            let synthesis = tokio::select! {
                result = self.synthesis.synthesize_cluster(session_id, cluster, fragments) => {
                    result?
                }
                _ = cancel.cancelled() => return Err(SessionError::Cancelled.into()),
            };
            debug!(
                "Session {} cluster {}: {} accepted, {} rejected",
                session_id,
                cluster.ordinal,
                synthesis.accepted.len(),
                synthesis.rejected.len()
            );
            syntheses.push(synthesis);
        }
        Ok(syntheses)
    }

    /// Commit accepted units. Returns committed ids and the conflict count.
    async fn commit(
        &self,
        session_id: SessionId,
        syntheses: Vec<ClusterSynthesis>,
    ) -> Result<(Vec<UnitId>, usize)> {
        let mut committed: Vec<UnitId> = Vec::new();
        let mut conflicts = 0;

        for unit in syntheses.into_iter().flat_map(|s| s.accepted) {
            match self.store.commit_knowledge_unit(&unit, Some(session_id)).await {
                Ok(CommitOutcome::Committed) => {
                    metrics::record(|m| m.units_committed_total.inc());
                    committed.push(unit.id);
                }
                Ok(CommitOutcome::Conflict { fragment_ids }) => {
                    warn!(
                        "Session {} unit '{}' lost ownership check on {} fragments",
                        session_id,
                        unit.title,
                        fragment_ids.len()
                    );
                    metrics::record(|m| m.commit_conflicts_total.inc());
                    conflicts += 1;
                }
                Err(e) => {
                    error!(
                        "Session {} commit failed, revoking {} units: {}",
                        session_id,
                        committed.len(),
                        e
                    );
                    for unit_id in &committed {
                        if let Err(revoke_err) = self.store.revoke_knowledge_unit(*unit_id).await {
                            error!("Failed to revoke unit {}: {}", unit_id, revoke_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok((committed, conflicts))
    }

    async fn publish(
        &self,
        kind: SessionEventKind,
        session_id: SessionId,
        message: impl Into<String>,
    ) {
        self.sink
            .notify(&SessionEvent::new(kind, session_id, message))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Linkage;
    use crate::model::FragmentId;
    use crate::notify::{ChannelSink, NullSink};
    use crate::session::{cancel_pair, SessionConfig};
    use crate::storage::MemoryStore;
    use crate::synthesis::{KeywordSynthesizer, SynthesisGuidance};
    use crate::vector::DistanceMetric;

    fn fragments() -> Vec<Fragment> {
        vec![
            Fragment::new(1, "fact", "alpha one").with_embedding(vec![1.0, 0.0]),
            Fragment::new(2, "fact", "alpha two").with_embedding(vec![0.99, 0.01]),
            Fragment::new(3, "fact", "beta one").with_embedding(vec![0.0, 1.0]),
            Fragment::new(4, "fact", "beta two").with_embedding(vec![0.01, 0.99]),
            Fragment::new(5, "fact", "loner").with_embedding(vec![-1.0, -1.0]),
        ]
    }

    fn runner(store: Arc<MemoryStore>, sink: Arc<dyn NotificationSink>) -> SessionRunner {
        let synthesis = SynthesisCoordinator::new(
            Arc::new(KeywordSynthesizer::default()),
            SynthesisGuidance::default(),
        );
        SessionRunner::new(store, Arc::new(synthesis), sink, build_worker_pool(2).unwrap())
    }

    #[tokio::test]
    async fn test_run_completes() {
        let store = Arc::new(MemoryStore::with_fragments(fragments()));
        let (sink, mut rx) = ChannelSink::new();
        let runner = runner(store.clone(), Arc::new(sink));

        let record = SessionRecord::new(SessionConfig::hierarchical(Linkage::Average, 0.1));
        store.create_session(&record).await.unwrap();
        let done = runner.run(record.id, CancelSignal::never()).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.claimed_count, 5);
        assert_eq!(done.clusters_found, 2);
        assert_eq!(done.units_created, 2);
        assert_eq!(done.unclustered_count, 1);
        assert!(done.metrics.is_some());
        assert!(store.claimed_by(record.id).await.is_empty());

        let kinds: Vec<SessionEventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                SessionEventKind::Started,
                SessionEventKind::ClusterBatchReady,
                SessionEventKind::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_nothing_to_claim_is_ok() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(store.clone(), Arc::new(NullSink));

        let record = SessionRecord::new(SessionConfig::default());
        store.create_session(&record).await.unwrap();
        let done = runner.run(record.id, CancelSignal::never()).await.unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert_eq!(done.error.unwrap().class, ErrorClass::ClaimConflict);
    }

    #[tokio::test]
    async fn test_invalid_config_claims_nothing() {
        let store = Arc::new(MemoryStore::with_fragments(fragments()));
        let runner = runner(store.clone(), Arc::new(NullSink));

        let record = SessionRecord::new(
            SessionConfig::hierarchical(Linkage::Ward, 0.5).with_metric(DistanceMetric::Cosine),
        );
        store.create_session(&record).await.unwrap();
        let err = runner.run(record.id, CancelSignal::never()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);

        let stored = store.get_session(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.claimed_count, 0);
        assert_eq!(store.stats().await.unwrap().claimed_count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_releases() {
        let store = Arc::new(MemoryStore::with_fragments(fragments()));
        let runner = runner(store.clone(), Arc::new(NullSink));
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let record = SessionRecord::new(SessionConfig::hierarchical(Linkage::Average, 0.1));
        store.create_session(&record).await.unwrap();
        let err = runner.run(record.id, signal).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Cancelled);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.claimed_count, 0);
        assert_eq!(stats.owned_count, 0);
        assert!(store.clusters_for_session(record.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let store = Arc::new(MemoryStore::with_fragments(fragments()));
        let runner = runner(store.clone(), Arc::new(NullSink));

        let record = SessionRecord::new(SessionConfig::hierarchical(Linkage::Average, 0.1));
        store.create_session(&record).await.unwrap();
        runner.run(record.id, CancelSignal::never()).await.unwrap();
        assert!(runner.run(record.id, CancelSignal::never()).await.is_err());

        let owned: Vec<FragmentId> = store
            .fragments()
            .await
            .into_iter()
            .filter(|f| f.is_owned())
            .map(|f| f.id)
            .collect();
        assert_eq!(owned.len(), 4);
    }
}
