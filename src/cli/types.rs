//! CLI response types.

use serde::{Deserialize, Serialize};

use coalesce::{Cluster, FragmentId, KnowledgeUnit, SessionRecord};

/// Outcome of `coalesce cluster`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterReport {
    pub session: SessionRecord,
    pub clusters: Vec<Cluster>,
    pub units: Vec<KnowledgeUnit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported: Option<ExportSummary>,
}

/// Where fragments were written after the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSummary {
    pub path: String,
    pub fragments: usize,
}

/// One row of `coalesce similar`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarHit {
    pub fragment_id: FragmentId,
    pub distance: f64,
    pub similarity: f64,
    pub category: String,
    pub title: String,
    pub preview: String,
}
