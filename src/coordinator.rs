//! Clustering coordinator: the caller-facing API.
//!
//! The coordinator handles:
//! - Session creation, execution and background runs with cancellation
//! - Session status reporting
//! - Ad hoc similarity search over the fragment pool
//! - Knowledge unit revocation

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::{Result, SessionError, StoreError};
use crate::metrics;
use crate::model::{Cluster, FragmentId, KnowledgeUnit, SessionId, UnitId};
use crate::notify::{create_sink, NotificationSink};
use crate::session::{
    build_worker_pool, cancel_pair, CancelHandle, CancelSignal, SessionConfig, SessionRecord,
    SessionRunner, SessionStatusReport,
};
use crate::storage::{create_store, FragmentStore, StoreStats};
use crate::synthesis::{create_synthesizer, SynthesisCoordinator, Synthesizer};
use crate::vector::{FragmentScope, Neighbor, SimilarityQuery};

/// A session running in the background.
pub struct SessionHandle {
    session_id: SessionId,
    cancel: CancelHandle,
    task: JoinHandle<Result<SessionRecord>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Request cancellation. Claimed fragments are released as on failure.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session to reach a terminal state.
    pub async fn wait(self) -> Result<SessionRecord> {
        self.task
            .await
            .map_err(|e| SessionError::WorkerPool(format!("session task failed: {}", e)))?
    }
}

/// The main clustering coordinator.
pub struct ClusteringCoordinator {
    config: Config,
    store: Arc<dyn FragmentStore>,
    runner: SessionRunner,
}

impl ClusteringCoordinator {
    /// Build a coordinator with the default store, synthesizer and sink for `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        ClusteringCoordinatorBuilder::new().config(config).build().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn FragmentStore> {
        &self.store
    }

    /// Session configuration from the `[clustering]` defaults.
    pub fn default_session_config(&self, scope: FragmentScope) -> SessionConfig {
        self.config.clustering.session_config(scope)
    }

    /// Persist a Pending session.
    pub async fn create_session(&self, config: SessionConfig) -> Result<SessionId> {
        let record = SessionRecord::new(config);
        self.store.create_session(&record).await?;
        info!("Created session {}", record.id);
        Ok(record.id)
    }

    /// Execute a Pending session to completion on the current task.
    pub async fn run_session(
        &self,
        session_id: SessionId,
        cancel: CancelSignal,
    ) -> Result<SessionRecord> {
        self.runner.run(session_id, cancel).await
    }

    /// Create a session and run it in the background.
    ///
    /// An invalid configuration fails the session immediately, before any
    /// fragment is claimed, and is returned as the error.
    pub async fn start_session(&self, config: SessionConfig) -> Result<SessionHandle> {
        let invalid = config.validate().err();
        let session_id = self.create_session(config).await?;

        if let Some(e) = invalid {
            return match self.runner.run(session_id, CancelSignal::never()).await {
                Err(err) => Err(err),
                Ok(_) => Err(e.into()),
            };
        }

        let (cancel, signal) = cancel_pair();
        let runner = self.runner.clone();
        let task = tokio::spawn(async move { runner.run(session_id, signal).await });

        Ok(SessionHandle {
            session_id,
            cancel,
            task,
        })
    }

    /// Full session record.
    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionRecord> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()).into())
    }

    /// Status, cluster and unit counts, and failure detail.
    pub async fn get_session_status(&self, session_id: SessionId) -> Result<SessionStatusReport> {
        Ok(self.get_session(session_id).await?.status_report())
    }

    pub async fn clusters(&self, session_id: SessionId) -> Result<Vec<Cluster>> {
        self.store.clusters_for_session(session_id).await
    }

    pub async fn knowledge_units(&self, session_id: SessionId) -> Result<Vec<KnowledgeUnit>> {
        self.store.units_for_session(session_id).await
    }

    /// Query for `vector` with the `[search]` defaults applied.
    pub fn similarity_query(&self, vector: Vec<f32>) -> SimilarityQuery {
        let query = SimilarityQuery::new(vector).limit(self.config.search.default_limit);
        match self.config.search.min_similarity {
            Some(s) => query.min_similarity(s),
            None => query,
        }
    }

    /// Ranked nearest neighbours of the query vector.
    pub async fn find_similar(&self, query: &SimilarityQuery) -> Result<Vec<Neighbor>> {
        let _timer = metrics::timer(|m| &m.find_similar_duration_seconds);
        metrics::record(|m| m.similarity_queries_total.inc());
        self.store.query_vector_neighbors(query).await
    }

    /// Embedding of a stored fragment, for "more like this" queries.
    pub async fn embedding_of(&self, fragment_id: FragmentId) -> Result<Vec<f32>> {
        let fragment = self
            .store
            .read_fragments(&[fragment_id])
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::FragmentNotFound(fragment_id.0))?;
        fragment.embedding.ok_or_else(|| {
            StoreError::InvalidOperation(format!("fragment {} has no embedding", fragment_id))
                .into()
        })
    }

    /// Delete a unit and return its fragments to the unowned pool.
    pub async fn revoke_unit(&self, unit_id: UnitId) -> Result<Vec<FragmentId>> {
        let released = self.store.revoke_knowledge_unit(unit_id).await?;
        metrics::record(|m| {
            m.units_revoked_total.inc();
            m.fragments_released_total.inc_by(released.len() as u64);
        });
        info!("Revoked unit {}, released {} fragments", unit_id, released.len());
        Ok(released)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }
}

/// Builder for ClusteringCoordinator.
#[derive(Default)]
pub struct ClusteringCoordinatorBuilder {
    config: Option<Config>,
    store: Option<Arc<dyn FragmentStore>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl ClusteringCoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store instead of loading one from configuration.
    pub fn store(mut self, store: Arc<dyn FragmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this synthesizer instead of the configured provider.
    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Use this sink instead of the configured webhooks.
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the coordinator.
    pub async fn build(self) -> Result<ClusteringCoordinator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store: Arc<dyn FragmentStore> = match self.store {
            Some(store) => store,
            None => create_store(&config).await?,
        };
        let synthesizer = match self.synthesizer {
            Some(synthesizer) => synthesizer,
            None => create_synthesizer(&config.synthesis)?,
        };
        let sink = self
            .sink
            .unwrap_or_else(|| create_sink(&config.notifications));

        let synthesis = SynthesisCoordinator::new(synthesizer, config.synthesis.guidance.clone())
            .with_max_content_chars(config.synthesis.max_content_chars);
        let pool = build_worker_pool(config.workers.thread_count())?;
        info!(
            "Coordinator ready: synthesizer {}, {} worker threads",
            synthesis.synthesizer_name(),
            pool.current_num_threads()
        );

        let runner = SessionRunner::new(store.clone(), Arc::new(synthesis), sink, pool);
        Ok(ClusteringCoordinator {
            config,
            store,
            runner,
        })
    }
}
