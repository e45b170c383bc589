//! K-Means with a spherical variant for the cosine metric.
//!
//! Under [`DistanceMetric::Cosine`] rows are L2-normalized, points are
//! assigned by cosine distance and each centroid is the re-normalized mean
//! direction of its members. Under Euclidean this is plain Lloyd iteration.
//! Seeding is farthest-first from the lowest fragment id, so runs are
//! reproducible without an RNG.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::matrix::{DistanceMatrix, WorkingSet};
use super::{Partition, Partitioner};
use crate::error::{ClusterError, ConfigError};
use crate::vector::{l2_normalize, DistanceMetric};

/// Parameters for K-Means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// Number of clusters; 0 picks `ceil(sqrt(n / 2))`.
    pub k: usize,
    /// Iteration cap. Hitting it is not an error.
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this.
    pub tolerance: f64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            k: 0,
            max_iterations: 100,
            tolerance: 1e-4,
        }
    }
}

impl KMeansParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    /// Cluster count for `n` points.
    pub fn resolve_k(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let k = if self.k == 0 {
            ((n as f64 / 2.0).sqrt().ceil() as usize).max(2)
        } else {
            self.k
        };
        k.min(n)
    }
}

pub struct KMeans {
    params: KMeansParams,
}

impl KMeans {
    pub fn new(params: KMeansParams) -> Self {
        Self { params }
    }
}

impl Partitioner for KMeans {
    fn name(&self) -> &'static str {
        "kmeans"
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
        if self.params.max_iterations == 0 {
            return Err(ClusterError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let metric = matrix.metric();
        let spherical = metric == DistanceMetric::Cosine;
        let k = self.params.resolve_k(n);

        let mut data = set.view()?.to_owned();
        if spherical {
            for mut row in data.axis_iter_mut(Axis(0)) {
                if let Some(slice) = row.as_slice_mut() {
                    l2_normalize(slice);
                }
            }
        }

        let seeds = farthest_first(matrix, k);
        let mut centroids = Array2::zeros((k, set.dimension()));
        for (c, &seed) in seeds.iter().enumerate() {
            centroids.row_mut(c).assign(&data.row(seed));
        }

        let mut labels = assign(&data, &centroids, metric);
        let mut best = (inertia(&data, &centroids, &labels, metric), labels.clone());
        let mut iterations = 0;

        for _ in 0..self.params.max_iterations {
            iterations += 1;
            let shift = update_centroids(&data, &mut centroids, &labels, spherical);
            let next = assign(&data, &centroids, metric);

            let score = inertia(&data, &centroids, &next, metric);
            if !score.is_finite() {
                return Err(ClusterError::Numerical(
                    "k-means inertia is not finite".to_string(),
                ));
            }
            if score < best.0 {
                best = (score, next.clone());
            }

            let stable = next == labels;
            labels = next;
            if stable || shift <= self.params.tolerance {
                break;
            }
        }

        debug!(
            "k-means finished: k={}, iterations={}, inertia={:.6}",
            k, iterations, best.0
        );

        let labels: Vec<Option<usize>> = best.1.into_iter().map(Some).collect();
        Ok(Partition::from_labels(set, &labels))
    }
}

/// Deterministic seeding: start at index 0, then repeatedly take the point
/// farthest from every chosen seed (lowest index on ties).
fn farthest_first(matrix: &DistanceMatrix, k: usize) -> Vec<usize> {
    let n = matrix.len();
    let mut seeds = Vec::with_capacity(k);
    if n == 0 || k == 0 {
        return seeds;
    }
    seeds.push(0);
    let mut nearest: Vec<f64> = (0..n).map(|i| matrix.get(0, i)).collect();

    while seeds.len() < k {
        let mut pick = None;
        let mut far = f64::NEG_INFINITY;
        for (i, &d) in nearest.iter().enumerate() {
            if seeds.contains(&i) {
                continue;
            }
            if d > far {
                far = d;
                pick = Some(i);
            }
        }
        let Some(pick) = pick else { break };
        seeds.push(pick);
        for (i, d) in nearest.iter_mut().enumerate() {
            *d = d.min(matrix.get(pick, i));
        }
    }
    seeds
}

fn point_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, metric: DistanceMetric) -> f64 {
    match (a.as_slice(), b.as_slice()) {
        (Some(a), Some(b)) => metric.distance(a, b),
        _ => {
            let a: Vec<f64> = a.iter().copied().collect();
            let b: Vec<f64> = b.iter().copied().collect();
            metric.distance(&a, &b)
        }
    }
}

/// Nearest centroid per point, lowest centroid index on ties.
fn assign(data: &Array2<f64>, centroids: &Array2<f64>, metric: DistanceMetric) -> Vec<usize> {
    (0..data.nrows())
        .into_par_iter()
        .map(|i| {
            let point = data.row(i);
            let mut label = 0;
            let mut closest = f64::INFINITY;
            for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
                let d = point_distance(point, centroid, metric);
                if d < closest {
                    closest = d;
                    label = c;
                }
            }
            label
        })
        .collect()
}

/// Recompute centroids in place, returning the largest centroid move.
///
/// Empty clusters keep their previous centroid.
fn update_centroids(
    data: &Array2<f64>,
    centroids: &mut Array2<f64>,
    labels: &[usize],
    spherical: bool,
) -> f64 {
    let k = centroids.nrows();
    let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        let mut row = sums.row_mut(label);
        row += &data.row(i);
        counts[label] += 1;
    }

    let mut shift: f64 = 0.0;
    for c in 0..k {
        if counts[c] == 0 {
            continue;
        }
        let mut mean: Array1<f64> = sums.row(c).mapv(|x| x / counts[c] as f64);
        if spherical {
            if let Some(slice) = mean.as_slice_mut() {
                // zero mean direction: keep the previous centroid
                if !l2_normalize(slice) {
                    continue;
                }
            }
        }
        let moved = point_distance(mean.view(), centroids.row(c), DistanceMetric::Euclidean);
        shift = shift.max(moved);
        centroids.row_mut(c).assign(&mean);
    }
    shift
}

/// Sum of squared point-to-centroid distances.
fn inertia(
    data: &Array2<f64>,
    centroids: &Array2<f64>,
    labels: &[usize],
    metric: DistanceMetric,
) -> f64 {
    labels
        .iter()
        .enumerate()
        .map(|(i, &c)| point_distance(data.row(i), centroids.row(c), metric).powi(2))
        .sum()
}
