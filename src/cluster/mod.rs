//! Clustering algorithms over a precomputed distance matrix.
//!
//! Every algorithm implements [`Partitioner`] and turns a [`WorkingSet`] plus
//! its [`DistanceMatrix`] into a [`Partition`]: groups of two or more
//! fragments and an unclustered remainder.
//!
//! # Supported Algorithms
//!
//! - **Hierarchical agglomerative**: greedy merging under a [`Linkage`]
//! - **K-Means**: spherical for cosine, Lloyd's for Euclidean
//! - **DBSCAN**: density-based, noise stays unclustered

mod dbscan;
mod hierarchical;
mod kmeans;
mod linkage;
mod matrix;
mod metrics;

pub use dbscan::{Dbscan, DbscanParams};
pub use hierarchical::{HierarchicalAgglomerative, HierarchicalParams};
pub use kmeans::{KMeans, KMeansParams};
pub use linkage::{
    AverageLinkage, CompleteLinkage, Linkage, LinkageStrategy, MergeSizes, SingleLinkage,
    WardLinkage,
};
pub use matrix::{DistanceMatrix, WorkingSet};
pub use metrics::PartitionMetrics;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ConfigError};
use crate::model::FragmentId;
use crate::vector::DistanceMetric;

/// Minimum number of fragments in a cluster worth synthesizing.
pub const MIN_CLUSTER_SIZE: usize = 2;

/// Output of a clustering algorithm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Groups of at least [`MIN_CLUSTER_SIZE`] fragments, each sorted, ordered
    /// by their lowest fragment id.
    pub clusters: Vec<Vec<FragmentId>>,
    /// Fragments not placed in any group, sorted.
    pub unclustered: Vec<FragmentId>,
}

impl Partition {
    /// Partition with no clusters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from one optional label per working-set index.
    ///
    /// Groups smaller than [`MIN_CLUSTER_SIZE`] are demoted to unclustered.
    pub fn from_labels(set: &WorkingSet, labels: &[Option<usize>]) -> Self {
        let mut groups: BTreeMap<usize, Vec<FragmentId>> = BTreeMap::new();
        let mut unclustered = Vec::new();

        for (i, label) in labels.iter().enumerate() {
            match label {
                Some(label) => groups.entry(*label).or_default().push(set.id(i)),
                None => unclustered.push(set.id(i)),
            }
        }

        let mut clusters = Vec::new();
        for (_, members) in groups {
            if members.len() >= MIN_CLUSTER_SIZE {
                clusters.push(members);
            } else {
                unclustered.extend(members);
            }
        }

        // members were pushed in index order, which is id order
        clusters.sort_by_key(|c| c[0]);
        unclustered.sort_unstable();

        Self {
            clusters,
            unclustered,
        }
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Total number of fragments covered.
    pub fn fragment_count(&self) -> usize {
        self.clusters.iter().map(Vec::len).sum::<usize>() + self.unclustered.len()
    }
}

/// A clustering algorithm.
///
/// Implementations are pure: the same set and matrix always produce the same
/// partition.
pub trait Partitioner: Send + Sync {
    /// Algorithm name.
    fn name(&self) -> &'static str;

    /// Partition the working set.
    fn partition(&self, set: &WorkingSet, matrix: &DistanceMatrix)
        -> Result<Partition, ClusterError>;
}

/// Algorithm selector used in configuration files and on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringAlgorithm {
    #[default]
    HierarchicalAgglomerative,
    #[serde(rename = "kmeans")]
    KMeans,
    Dbscan,
}

impl ClusteringAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HierarchicalAgglomerative => "hierarchical_agglomerative",
            Self::KMeans => "kmeans",
            Self::Dbscan => "dbscan",
        }
    }

    /// Parse from a config or CLI string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "hierarchical_agglomerative" | "hierarchical" | "hac" => {
                Some(Self::HierarchicalAgglomerative)
            }
            "kmeans" | "k_means" => Some(Self::KMeans),
            "dbscan" => Some(Self::Dbscan),
            _ => None,
        }
    }
}

impl fmt::Display for ClusteringAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum AlgorithmParams {
    HierarchicalAgglomerative(HierarchicalParams),
    #[serde(rename = "kmeans")]
    KMeans(KMeansParams),
    Dbscan(DbscanParams),
}

impl Default for AlgorithmParams {
    fn default() -> Self {
        Self::HierarchicalAgglomerative(HierarchicalParams::default())
    }
}

impl AlgorithmParams {
    /// Which algorithm these parameters drive.
    pub fn kind(&self) -> ClusteringAlgorithm {
        match self {
            Self::HierarchicalAgglomerative(_) => ClusteringAlgorithm::HierarchicalAgglomerative,
            Self::KMeans(_) => ClusteringAlgorithm::KMeans,
            Self::Dbscan(_) => ClusteringAlgorithm::Dbscan,
        }
    }

    /// Check parameters against the metric the session will use.
    pub fn validate(&self, metric: DistanceMetric) -> Result<(), ConfigError> {
        match self {
            Self::HierarchicalAgglomerative(p) => p.validate(metric),
            Self::KMeans(p) => p.validate(),
            Self::Dbscan(p) => p.validate(),
        }
    }

    /// Build the partitioner for these parameters.
    pub fn partitioner(&self) -> Box<dyn Partitioner> {
        match self {
            Self::HierarchicalAgglomerative(p) => {
                Box::new(HierarchicalAgglomerative::new(p.clone()))
            }
            Self::KMeans(p) => Box::new(KMeans::new(p.clone())),
            Self::Dbscan(p) => Box::new(Dbscan::new(p.clone())),
        }
    }
}
