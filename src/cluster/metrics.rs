//! Partition quality metrics.

use serde::{Deserialize, Serialize};

use super::matrix::{DistanceMatrix, WorkingSet};
use super::Partition;

/// Quality metrics for a partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetrics {
    /// Mean silhouette over clustered points (-1 to 1, higher is better).
    /// Zero when there are fewer than two clusters.
    pub silhouette_score: f64,
    /// Number of clusters.
    pub num_clusters: usize,
    /// Number of unclustered fragments.
    pub num_unclustered: usize,
    /// Distribution of cluster sizes, in cluster order.
    pub cluster_size_distribution: Vec<usize>,
}

impl PartitionMetrics {
    /// Compute metrics from the matrix the partition was built on.
    pub fn compute(set: &WorkingSet, matrix: &DistanceMatrix, partition: &Partition) -> Self {
        let groups: Vec<Vec<usize>> = partition
            .clusters
            .iter()
            .map(|c| c.iter().filter_map(|id| set.position(*id)).collect())
            .collect();

        Self {
            silhouette_score: silhouette(matrix, &groups),
            num_clusters: partition.clusters.len(),
            num_unclustered: partition.unclustered.len(),
            cluster_size_distribution: partition.clusters.iter().map(Vec::len).collect(),
        }
    }
}

fn mean_distance(matrix: &DistanceMatrix, i: usize, group: &[usize]) -> Option<f64> {
    let (sum, count) = group
        .iter()
        .filter(|&&j| j != i)
        .fold((0.0, 0usize), |(s, c), &j| (s + matrix.get(i, j), c + 1));
    (count > 0).then(|| sum / count as f64)
}

fn silhouette(matrix: &DistanceMatrix, groups: &[Vec<usize>]) -> f64 {
    if groups.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut points = 0usize;
    for (g, group) in groups.iter().enumerate() {
        for &i in group {
            let a = mean_distance(matrix, i, group).unwrap_or(0.0);
            let b = groups
                .iter()
                .enumerate()
                .filter(|(h, _)| *h != g)
                .filter_map(|(_, other)| mean_distance(matrix, i, other))
                .fold(f64::INFINITY, f64::min);
            let b = if b.is_finite() { b } else { 0.0 };

            let denom = a.max(b);
            total += if denom > 0.0 { (b - a) / denom } else { 0.0 };
            points += 1;
        }
    }

    if points == 0 {
        0.0
    } else {
        total / points as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FragmentId;
    use crate::vector::DistanceMetric;

    #[test]
    fn test_well_separated_partition() {
        let set = WorkingSet::from_vectors(vec![
            (FragmentId(1), vec![0.0]),
            (FragmentId(2), vec![0.1]),
            (FragmentId(3), vec![10.0]),
            (FragmentId(4), vec![10.1]),
            (FragmentId(5), vec![50.0]),
        ])
        .unwrap();
        let matrix = DistanceMatrix::from_working_set(&set, DistanceMetric::Euclidean);
        let partition = Partition {
            clusters: vec![
                vec![FragmentId(1), FragmentId(2)],
                vec![FragmentId(3), FragmentId(4)],
            ],
            unclustered: vec![FragmentId(5)],
        };

        let metrics = PartitionMetrics::compute(&set, &matrix, &partition);
        assert!(metrics.silhouette_score > 0.9);
        assert_eq!(metrics.num_clusters, 2);
        assert_eq!(metrics.num_unclustered, 1);
        assert_eq!(metrics.cluster_size_distribution, vec![2, 2]);
    }

    #[test]
    fn test_single_cluster_scores_zero() {
        let set = WorkingSet::from_vectors(vec![
            (FragmentId(1), vec![0.0]),
            (FragmentId(2), vec![1.0]),
        ])
        .unwrap();
        let matrix = DistanceMatrix::from_working_set(&set, DistanceMetric::Euclidean);
        let partition = Partition {
            clusters: vec![vec![FragmentId(1), FragmentId(2)]],
            unclustered: vec![],
        };
        assert_eq!(PartitionMetrics::compute(&set, &matrix, &partition).silhouette_score, 0.0);
    }
}
