//! Density-based clustering.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::matrix::{DistanceMatrix, WorkingSet};
use super::{Partition, Partitioner};
use crate::error::{ClusterError, ConfigError};

/// Parameters for DBSCAN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbscanParams {
    /// Maximum distance between neighbours.
    pub eps: f64,
    /// Neighbours (the point itself included) needed to be a core point.
    pub min_points: usize,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            eps: 0.3,
            min_points: 3,
        }
    }
}

impl DbscanParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.eps.is_finite() || self.eps < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "eps must be a non-negative number, got {}",
                self.eps
            )));
        }
        if self.min_points == 0 {
            return Err(ConfigError::Invalid(
                "min_points must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// DBSCAN over the distance matrix. Noise is returned as unclustered.
pub struct Dbscan {
    params: DbscanParams,
}

impl Dbscan {
    pub fn new(params: DbscanParams) -> Self {
        Self { params }
    }
}

impl Partitioner for Dbscan {
    fn name(&self) -> &'static str {
        "dbscan"
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
        self.params
            .validate()
            .map_err(|e| ClusterError::InvalidParameter(e.to_string()))?;

        let DbscanParams { eps, min_points } = self.params;
        let mut labels: Vec<Option<usize>> = vec![None; n];
        let mut visited = vec![false; n];
        let mut next_label = 0;

        for i in 0..n {
            if visited[i] {
                continue;
            }
            visited[i] = true;

            let neighbours = matrix.neighbors_within(i, eps);
            if neighbours.len() < min_points {
                // noise for now, may still be reached as a border point
                continue;
            }

            let label = next_label;
            next_label += 1;
            labels[i] = Some(label);

            let mut queue: VecDeque<usize> = neighbours.into_iter().collect();
            while let Some(q) = queue.pop_front() {
                if labels[q].is_none() {
                    labels[q] = Some(label);
                }
                if visited[q] {
                    continue;
                }
                visited[q] = true;

                let reach = matrix.neighbors_within(q, eps);
                if reach.len() >= min_points {
                    queue.extend(reach);
                }
            }
        }

        Ok(Partition::from_labels(set, &labels))
    }
}
