//! Hierarchical agglomerative clustering.

use serde::{Deserialize, Serialize};

use super::linkage::{Linkage, LinkageStrategy, MergeSizes};
use super::matrix::{DistanceMatrix, WorkingSet};
use super::{Partition, Partitioner};
use crate::error::{ClusterError, ConfigError};
use crate::vector::DistanceMetric;

/// Parameters for agglomerative clustering.
///
/// Merging stops at whichever limit is hit first. At least one must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchicalParams {
    /// Linkage used to score merges.
    pub linkage: Linkage,
    /// Stop once the cheapest merge costs more than this.
    pub distance_threshold: Option<f64>,
    /// Stop once this many clusters remain.
    pub target_clusters: Option<usize>,
}

impl Default for HierarchicalParams {
    fn default() -> Self {
        Self {
            linkage: Linkage::Average,
            distance_threshold: Some(0.3),
            target_clusters: None,
        }
    }
}

impl HierarchicalParams {
    pub fn validate(&self, metric: DistanceMetric) -> Result<(), ConfigError> {
        self.linkage.validate_metric(metric)?;
        match (self.distance_threshold, self.target_clusters) {
            (None, None) => Err(ConfigError::MissingField(
                "distance_threshold or target_clusters".to_string(),
            )),
            (Some(t), _) if !t.is_finite() || t < 0.0 => Err(ConfigError::Invalid(format!(
                "distance_threshold must be a non-negative number, got {}",
                t
            ))),
            (_, Some(0)) => Err(ConfigError::Invalid(
                "target_clusters must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Greedy bottom-up merging.
///
/// Ties on merge cost go to the pair whose lowest fragment ids come first.
pub struct HierarchicalAgglomerative {
    params: HierarchicalParams,
}

impl HierarchicalAgglomerative {
    pub fn new(params: HierarchicalParams) -> Self {
        Self { params }
    }
}

impl Partitioner for HierarchicalAgglomerative {
    fn name(&self) -> &'static str {
        "hierarchical_agglomerative"
    }

    fn partition(
        &self,
        set: &WorkingSet,
        matrix: &DistanceMatrix,
    ) -> Result<Partition, ClusterError> {
        let n = set.len();
        if n == 0 {
            return Ok(Partition::empty());
        }
        if matrix.len() != n {
            return Err(ClusterError::DimensionMismatch {
                expected: n,
                got: matrix.len(),
            });
        }
        if self.params.distance_threshold.is_none() && self.params.target_clusters.is_none() {
            return Err(ClusterError::InvalidParameter(
                "distance_threshold or target_clusters is required".to_string(),
            ));
        }

        let strategy = self.params.linkage.strategy();
        let threshold = self.params.distance_threshold.unwrap_or(f64::INFINITY);
        let target = self.params.target_clusters.unwrap_or(1).max(1);

        let mut state = MergeState::new(matrix, strategy);
        while state.active_count > target {
            let Some((cost, i, j)) = state.cheapest() else {
                break;
            };
            if cost > threshold {
                break;
            }
            state.merge(i, j, strategy);
        }

        let mut labels = vec![None; n];
        for (slot, members) in state.members.iter().enumerate() {
            if let Some(members) = members {
                for &m in members {
                    labels[m] = Some(slot);
                }
            }
        }
        Ok(Partition::from_labels(set, &labels))
    }
}

/// Active clusters, their pairwise costs and per-row best merges.
///
/// A cluster lives in the slot of its lowest member index. Merging `j` into
/// `i` with `i < j` keeps that property.
struct MergeState {
    n: usize,
    members: Vec<Option<Vec<usize>>>,
    costs: Vec<f64>,
    // best (cost, partner) over active partners with a higher slot
    best: Vec<Option<(f64, usize)>>,
    active_count: usize,
}

impl MergeState {
    fn new(matrix: &DistanceMatrix, strategy: &dyn LinkageStrategy) -> Self {
        let n = matrix.len();
        let mut costs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                costs.push(strategy.merge_cost(matrix, &[i], &[j]));
            }
        }

        let mut state = Self {
            n,
            members: (0..n).map(|i| Some(vec![i])).collect(),
            costs,
            best: vec![None; n],
            active_count: n,
        };
        for i in 0..n {
            state.refresh_row(i);
        }
        state
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        i * self.n - i * (i + 1) / 2 + (j - i - 1)
    }

    fn cost(&self, i: usize, j: usize) -> f64 {
        self.costs[self.offset(i, j)]
    }

    fn is_active(&self, i: usize) -> bool {
        self.members[i].is_some()
    }

    fn size(&self, i: usize) -> usize {
        self.members[i].as_ref().map_or(0, Vec::len)
    }

    fn refresh_row(&mut self, i: usize) {
        let mut best: Option<(f64, usize)> = None;
        if self.is_active(i) {
            for j in (i + 1)..self.n {
                if !self.is_active(j) {
                    continue;
                }
                let c = self.cost(i, j);
                // strict less keeps the lowest partner on ties
                if best.map_or(true, |(b, _)| c < b) {
                    best = Some((c, j));
                }
            }
        }
        self.best[i] = best;
    }

    /// Cheapest merge as `(cost, i, j)`, ordered by cost then slot.
    fn cheapest(&self) -> Option<(f64, usize, usize)> {
        let mut found: Option<(f64, usize, usize)> = None;
        for (i, best) in self.best.iter().enumerate() {
            if let Some((c, j)) = *best {
                if found.map_or(true, |(b, _, _)| c < b) {
                    found = Some((c, i, j));
                }
            }
        }
        found
    }

    fn merge(&mut self, i: usize, j: usize, strategy: &dyn LinkageStrategy) {
        debug_assert!(i < j);
        let ij = self.cost(i, j);
        let (ni, nj) = (self.size(i), self.size(j));

        for k in 0..self.n {
            if k == i || k == j || !self.is_active(k) {
                continue;
            }
            let updated = strategy.update(
                self.cost(i, k),
                self.cost(j, k),
                ij,
                MergeSizes {
                    i: ni,
                    j: nj,
                    k: self.size(k),
                },
            );
            let offset = self.offset(i, k);
            self.costs[offset] = updated;
        }

        let absorbed = self.members[j].take().unwrap_or_default();
        if let Some(members) = self.members[i].as_mut() {
            members.extend(absorbed);
        }
        self.best[j] = None;
        self.active_count -= 1;

        self.refresh_row(i);
        for k in 0..j {
            if k == i || !self.is_active(k) {
                continue;
            }
            match self.best[k] {
                Some((_, p)) if p == i || p == j => self.refresh_row(k),
                Some((c, p)) if k < i => {
                    let to_i = self.cost(k, i);
                    if to_i < c || (to_i == c && i < p) {
                        self.best[k] = Some((to_i, i));
                    }
                }
                None if k < i => self.refresh_row(k),
                _ => {}
            }
        }
    }
}
