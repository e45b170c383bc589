//! Per-session configuration.

use serde::{Deserialize, Serialize};

use crate::cluster::{
    AlgorithmParams, DbscanParams, HierarchicalParams, KMeansParams, Linkage,
};
use crate::error::ConfigError;
use crate::vector::{DistanceMetric, FragmentScope};

/// What a clustering session runs and over which fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Algorithm and its parameters.
    pub algorithm: AlgorithmParams,
    /// Distance metric for the matrix.
    pub metric: DistanceMetric,
    /// Which unowned fragments the session claims.
    pub scope: FragmentScope,
    /// Cap on the claimed working set. Lowest ids are claimed first.
    pub max_fragments: Option<usize>,
}

impl SessionConfig {
    /// Hierarchical agglomerative clustering with a distance threshold.
    pub fn hierarchical(linkage: Linkage, distance_threshold: f64) -> Self {
        Self {
            algorithm: AlgorithmParams::HierarchicalAgglomerative(HierarchicalParams {
                linkage,
                distance_threshold: Some(distance_threshold),
                target_clusters: None,
            }),
            ..Default::default()
        }
    }

    /// K-Means with `k` clusters (0 = automatic).
    pub fn kmeans(k: usize) -> Self {
        Self {
            algorithm: AlgorithmParams::KMeans(KMeansParams {
                k,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// DBSCAN.
    pub fn dbscan(eps: f64, min_points: usize) -> Self {
        Self {
            algorithm: AlgorithmParams::Dbscan(DbscanParams { eps, min_points }),
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_scope(mut self, scope: FragmentScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_max_fragments(mut self, max: usize) -> Self {
        self.max_fragments = Some(max);
        self
    }

    /// Reject configurations that cannot run, before anything is claimed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.algorithm.validate(self.metric)?;
        if self.max_fragments == Some(0) {
            return Err(ConfigError::Invalid(
                "max_fragments must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
