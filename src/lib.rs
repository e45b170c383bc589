//! Coalesce: consolidating knowledge fragments into knowledge units.
//!
//! Fragments carrying embeddings are claimed by a clustering session,
//! partitioned by hierarchical agglomerative, K-Means or DBSCAN clustering
//! over a precomputed distance matrix, and handed cluster by cluster to a
//! synthesizer whose proposals are validated before they take ownership of
//! their fragments.

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod session;
pub mod storage;
pub mod synthesis;
pub mod utils;
pub mod vector;

pub use cluster::{
    AlgorithmParams, ClusteringAlgorithm, DbscanParams, DistanceMatrix, HierarchicalParams,
    KMeansParams, Linkage, Partition, PartitionMetrics, Partitioner, WorkingSet,
};
pub use config::Config;
pub use coordinator::{ClusteringCoordinator, ClusteringCoordinatorBuilder, SessionHandle};
pub use error::{CoalesceError, ErrorClass, Result};
pub use metrics::{get_metrics, Metrics};
pub use model::{
    Cluster, ClusterId, Confidence, Fragment, FragmentId, KnowledgeUnit, SessionId, UnitId,
};
pub use notify::{
    ChannelSink, NotificationSink, NullSink, SessionEvent, SessionEventKind, WebhookSink,
};
pub use session::{
    cancel_pair, CancelHandle, CancelSignal, SessionConfig, SessionFailure, SessionRecord,
    SessionStatus, SessionStatusReport,
};
pub use storage::{CommitOutcome, FragmentStore, MemoryStore, StoreStats};
pub use synthesis::{
    ApiSynthesizer, CandidateUnit, KeywordSynthesizer, SynthesisCoordinator, SynthesisGuidance,
    SynthesisRequest, SynthesisResponse, Synthesizer,
};
pub use vector::{DistanceMetric, FragmentScope, Neighbor, ScopeFilter, SimilarityQuery};
