//! Merge-cost functions for agglomerative clustering.
//!
//! Each strategy scores the cost of merging two member sets using only the
//! precomputed [`DistanceMatrix`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::matrix::DistanceMatrix;
use crate::error::ConfigError;
use crate::vector::DistanceMetric;

/// Scores the cost of merging cluster `a` with cluster `b`.
pub trait LinkageStrategy: Send + Sync {
    /// Strategy name.
    fn name(&self) -> &'static str;

    /// Merge cost for two disjoint, non-empty member index sets.
    fn merge_cost(&self, matrix: &DistanceMatrix, a: &[usize], b: &[usize]) -> f64;

    /// Lance-Williams update: cost between `I ∪ J` and `K` from the costs
    /// `(I, K)`, `(J, K)` and `(I, J)` and the three cluster sizes.
    ///
    /// Must agree with [`merge_cost`](Self::merge_cost) on the merged sets.
    fn update(&self, ik: f64, jk: f64, ij: f64, sizes: MergeSizes) -> f64;

    /// Whether the cost is only meaningful under the Euclidean metric.
    fn requires_euclidean(&self) -> bool {
        false
    }
}

/// Cluster sizes involved in a Lance-Williams update.
#[derive(Debug, Clone, Copy)]
pub struct MergeSizes {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

/// Minimum pairwise distance.
pub struct SingleLinkage;

/// Maximum pairwise distance.
pub struct CompleteLinkage;

/// Mean pairwise distance (UPGMA).
pub struct AverageLinkage;

/// Increase in within-cluster sum of squares.
pub struct WardLinkage;

impl LinkageStrategy for SingleLinkage {
    fn name(&self) -> &'static str {
        "single"
    }

    fn merge_cost(&self, matrix: &DistanceMatrix, a: &[usize], b: &[usize]) -> f64 {
        a.iter()
            .flat_map(|&i| b.iter().map(move |&j| matrix.get(i, j)))
            .fold(f64::INFINITY, f64::min)
    }

    fn update(&self, ik: f64, jk: f64, _ij: f64, _sizes: MergeSizes) -> f64 {
        ik.min(jk)
    }
}

impl LinkageStrategy for CompleteLinkage {
    fn name(&self) -> &'static str {
        "complete"
    }

    fn merge_cost(&self, matrix: &DistanceMatrix, a: &[usize], b: &[usize]) -> f64 {
        a.iter()
            .flat_map(|&i| b.iter().map(move |&j| matrix.get(i, j)))
            .fold(0.0, f64::max)
    }

    fn update(&self, ik: f64, jk: f64, _ij: f64, _sizes: MergeSizes) -> f64 {
        ik.max(jk)
    }
}

impl LinkageStrategy for AverageLinkage {
    fn name(&self) -> &'static str {
        "average"
    }

    fn merge_cost(&self, matrix: &DistanceMatrix, a: &[usize], b: &[usize]) -> f64 {
        if a.is_empty() || b.is_empty() {
            return f64::INFINITY;
        }
        let total: f64 = a
            .iter()
            .flat_map(|&i| b.iter().map(move |&j| matrix.get(i, j)))
            .sum();
        total / (a.len() * b.len()) as f64
    }

    fn update(&self, ik: f64, jk: f64, _ij: f64, sizes: MergeSizes) -> f64 {
        let (ni, nj) = (sizes.i as f64, sizes.j as f64);
        (ni * ik + nj * jk) / (ni + nj)
    }
}

impl LinkageStrategy for WardLinkage {
    fn name(&self) -> &'static str {
        "ward"
    }

    /// `|A||B| / (|A| + |B|) * ||c_A - c_B||²`, with the centroid gap
    /// recovered from squared pairwise distances:
    /// `||c_A - c_B||² = S_AB / (|A||B|) - S_A / |A|² - S_B / |B|²`
    /// where `S_AB` sums cross pairs and `S_A`, `S_B` sum unordered inner pairs.
    fn merge_cost(&self, matrix: &DistanceMatrix, a: &[usize], b: &[usize]) -> f64 {
        if a.is_empty() || b.is_empty() {
            return f64::INFINITY;
        }
        let na = a.len() as f64;
        let nb = b.len() as f64;

        let cross: f64 = a
            .iter()
            .flat_map(|&i| b.iter().map(move |&j| matrix.get(i, j).powi(2)))
            .sum();
        let within_a = within_sum_squared(matrix, a);
        let within_b = within_sum_squared(matrix, b);

        let centroid_gap =
            (cross / (na * nb) - within_a / (na * na) - within_b / (nb * nb)).max(0.0);
        (na * nb / (na + nb)) * centroid_gap
    }

    fn update(&self, ik: f64, jk: f64, ij: f64, sizes: MergeSizes) -> f64 {
        let (ni, nj, nk) = (sizes.i as f64, sizes.j as f64, sizes.k as f64);
        (((ni + nk) * ik + (nj + nk) * jk - nk * ij) / (ni + nj + nk)).max(0.0)
    }

    fn requires_euclidean(&self) -> bool {
        true
    }
}

fn within_sum_squared(matrix: &DistanceMatrix, members: &[usize]) -> f64 {
    let mut sum = 0.0;
    for (k, &i) in members.iter().enumerate() {
        for &j in &members[k + 1..] {
            sum += matrix.get(i, j).powi(2);
        }
    }
    sum
}

/// Linkage selection for hierarchical clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Ward,
    Single,
    Complete,
    #[default]
    Average,
}

impl Linkage {
    /// The strategy implementing this linkage.
    pub fn strategy(&self) -> &'static dyn LinkageStrategy {
        match self {
            Self::Ward => &WardLinkage,
            Self::Single => &SingleLinkage,
            Self::Complete => &CompleteLinkage,
            Self::Average => &AverageLinkage,
        }
    }

    /// Reject linkage/metric combinations that have no meaning.
    pub fn validate_metric(&self, metric: DistanceMetric) -> Result<(), ConfigError> {
        if self.strategy().requires_euclidean() && metric != DistanceMetric::Euclidean {
            return Err(ConfigError::IncompatibleLinkage {
                linkage: self.to_string(),
                metric: metric.to_string(),
            });
        }
        Ok(())
    }

    /// Parse from a config or CLI string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ward" => Some(Self::Ward),
            "single" => Some(Self::Single),
            "complete" => Some(Self::Complete),
            "average" | "upgma" => Some(Self::Average),
            _ => None,
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.strategy().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::WorkingSet;
    use crate::model::FragmentId;

    // Points on a line: 0, 1, 3, 7
    fn line_matrix() -> DistanceMatrix {
        let set = WorkingSet::from_vectors(vec![
            (FragmentId(1), vec![0.0]),
            (FragmentId(2), vec![1.0]),
            (FragmentId(3), vec![3.0]),
            (FragmentId(4), vec![7.0]),
        ])
        .unwrap();
        DistanceMatrix::from_working_set(&set, DistanceMetric::Euclidean)
    }

    #[test]
    fn test_single_complete_average() {
        let m = line_matrix();
        let a = [0, 1];
        let b = [2, 3];
        // pairs: 3, 7, 2, 6
        assert_eq!(SingleLinkage.merge_cost(&m, &a, &b), 2.0);
        assert_eq!(CompleteLinkage.merge_cost(&m, &a, &b), 7.0);
        assert_eq!(AverageLinkage.merge_cost(&m, &a, &b), 4.5);
    }

    #[test]
    fn test_ward_matches_variance_increase() {
        let m = line_matrix();
        // singletons 0 and 1: SSE after merge = 2 * 0.5² = 0.5
        assert!((WardLinkage.merge_cost(&m, &[0], &[1]) - 0.5).abs() < 1e-12);

        // {0,1} (centroid 0.5) with {2,3} (centroid 5): 2*2/4 * 4.5² = 20.25
        assert!((WardLinkage.merge_cost(&m, &[0, 1], &[2, 3]) - 20.25).abs() < 1e-9);
    }

    #[test]
    fn test_update_agrees_with_direct_cost() {
        let m = line_matrix();
        let sizes = MergeSizes { i: 1, j: 1, k: 2 };
        let strategies: [&dyn LinkageStrategy; 4] =
            [&SingleLinkage, &CompleteLinkage, &AverageLinkage, &WardLinkage];

        for s in strategies {
            let ik = s.merge_cost(&m, &[0], &[2, 3]);
            let jk = s.merge_cost(&m, &[1], &[2, 3]);
            let ij = s.merge_cost(&m, &[0], &[1]);
            let direct = s.merge_cost(&m, &[0, 1], &[2, 3]);
            assert!(
                (s.update(ik, jk, ij, sizes) - direct).abs() < 1e-9,
                "{} update disagrees",
                s.name()
            );
        }
    }

    #[test]
    fn test_ward_rejects_cosine() {
        assert!(Linkage::Ward.validate_metric(DistanceMetric::Euclidean).is_ok());
        let err = Linkage::Ward.validate_metric(DistanceMetric::Cosine).unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleLinkage { .. }));

        for linkage in [Linkage::Single, Linkage::Complete, Linkage::Average] {
            assert!(linkage.validate_metric(DistanceMetric::Cosine).is_ok());
        }
    }

    #[test]
    fn test_linkage_parse_and_display() {
        assert_eq!(Linkage::parse("UPGMA"), Some(Linkage::Average));
        assert_eq!(Linkage::Ward.to_string(), "ward");
        assert_eq!(Linkage::parse("centroid"), None);
    }
}
