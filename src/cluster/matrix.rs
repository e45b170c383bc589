//! Working sets and the pairwise distance matrix.
//!
//! The matrix is built once per session and shared by every linkage and
//! algorithm step. Rows are computed in parallel on the current rayon pool.

use std::collections::HashMap;

use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::error::ClusterError;
use crate::model::{Fragment, FragmentId};
use crate::vector::DistanceMetric;

/// Embedded fragments prepared for clustering, ordered by fragment id.
///
/// Index `i` everywhere in the clustering code refers to the `i`-th entry of
/// this set, so a lower index always means a lower fragment id.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    ids: Vec<FragmentId>,
    data: Vec<f64>,
    dimension: usize,
    positions: HashMap<FragmentId, usize>,
}

impl WorkingSet {
    /// Build a working set from fragments.
    ///
    /// Every fragment must carry an embedding of the same dimension.
    pub fn from_fragments(fragments: &[Fragment]) -> Result<Self, ClusterError> {
        let mut sorted: Vec<&Fragment> = fragments.iter().collect();
        sorted.sort_by_key(|f| f.id);
        sorted.dedup_by_key(|f| f.id);

        let first = sorted
            .first()
            .ok_or_else(|| ClusterError::EmptyInput("no fragments to cluster".to_string()))?;
        let dimension = first
            .embedding
            .as_ref()
            .map(|e| e.len())
            .ok_or_else(|| {
                ClusterError::InvalidParameter(format!("fragment {} has no embedding", first.id))
            })?;
        if dimension == 0 {
            return Err(ClusterError::InvalidParameter(
                "embeddings have zero dimension".to_string(),
            ));
        }

        let mut ids = Vec::with_capacity(sorted.len());
        let mut data = Vec::with_capacity(sorted.len() * dimension);
        for fragment in sorted {
            let embedding = fragment.embedding.as_ref().ok_or_else(|| {
                ClusterError::InvalidParameter(format!("fragment {} has no embedding", fragment.id))
            })?;
            if embedding.len() != dimension {
                return Err(ClusterError::DimensionMismatch {
                    expected: dimension,
                    got: embedding.len(),
                });
            }
            if embedding.iter().any(|x| !x.is_finite()) {
                return Err(ClusterError::Numerical(format!(
                    "fragment {} has a non-finite embedding component",
                    fragment.id
                )));
            }
            ids.push(fragment.id);
            data.extend(embedding.iter().map(|&x| x as f64));
        }

        let positions = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        Ok(Self {
            ids,
            data,
            dimension,
            positions,
        })
    }

    /// Separate fragments that can share a working set from those that cannot.
    ///
    /// The working dimension is the most common embedding length among
    /// finite, non-empty embeddings; on a tie the lowest fragment id decides.
    /// Returns the usable fragments and the ids of the rest.
    pub fn split_clusterable(fragments: Vec<Fragment>) -> (Vec<Fragment>, Vec<FragmentId>) {
        fn usable(fragment: &Fragment) -> Option<usize> {
            let embedding = fragment.embedding.as_ref()?;
            if embedding.is_empty() || embedding.iter().any(|x| !x.is_finite()) {
                return None;
            }
            Some(embedding.len())
        }

        let mut sorted = fragments;
        sorted.sort_by_key(|f| f.id);

        let mut counts: Vec<(usize, usize)> = Vec::new();
        for dimension in sorted.iter().filter_map(usable) {
            match counts.iter_mut().find(|(d, _)| *d == dimension) {
                Some((_, count)) => *count += 1,
                None => counts.push((dimension, 1)),
            }
        }
        let mut dimension = None;
        let mut best = 0;
        for (d, count) in counts {
            if count > best {
                best = count;
                dimension = Some(d);
            }
        }

        let (kept, dropped): (Vec<Fragment>, Vec<Fragment>) = sorted
            .into_iter()
            .partition(|f| dimension.is_some() && usable(f) == dimension);
        (kept, dropped.into_iter().map(|f| f.id).collect())
    }

    /// Build directly from `(id, vector)` pairs.
    pub fn from_vectors(vectors: Vec<(FragmentId, Vec<f32>)>) -> Result<Self, ClusterError> {
        let fragments: Vec<Fragment> = vectors
            .into_iter()
            .map(|(id, v)| Fragment::new(id.0, "", "").with_embedding(v))
            .collect();
        Self::from_fragments(&fragments)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Fragment ids, ascending.
    pub fn ids(&self) -> &[FragmentId] {
        &self.ids
    }

    /// Fragment id at index `i`.
    pub fn id(&self, i: usize) -> FragmentId {
        self.ids[i]
    }

    /// Index of a fragment id.
    pub fn position(&self, id: FragmentId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Vector at index `i`.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    /// All vectors as an `n x d` view.
    pub fn view(&self) -> Result<ArrayView2<'_, f64>, ClusterError> {
        ArrayView2::from_shape((self.len(), self.dimension), &self.data)
            .map_err(|e| ClusterError::Numerical(format!("working set shape: {}", e)))
    }
}

/// Symmetric pairwise distance table stored as a condensed upper triangle.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    metric: DistanceMetric,
    data: Vec<f64>,
}

impl DistanceMatrix {
    /// Build the matrix for a set of fragments.
    pub fn build(fragments: &[Fragment], metric: DistanceMetric) -> Result<Self, ClusterError> {
        let set = WorkingSet::from_fragments(fragments)?;
        Ok(Self::from_working_set(&set, metric))
    }

    /// Build the matrix for a prepared working set.
    pub fn from_working_set(set: &WorkingSet, metric: DistanceMetric) -> Self {
        let n = set.len();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let a = set.row(i);
                ((i + 1)..n).map(|j| metric.distance(a, set.row(j))).collect()
            })
            .collect();

        Self {
            n,
            metric,
            data: rows.into_iter().flatten().collect(),
        }
    }

    /// Build from a condensed upper triangle (row-major, `i < j`).
    pub fn from_condensed(
        n: usize,
        metric: DistanceMetric,
        data: Vec<f64>,
    ) -> Result<Self, ClusterError> {
        let expected = n * n.saturating_sub(1) / 2;
        if data.len() != expected {
            return Err(ClusterError::DimensionMismatch {
                expected,
                got: data.len(),
            });
        }
        if data.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(ClusterError::Numerical(
                "distances must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self { n, metric, data })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < self.n);
        i * self.n - i * (i + 1) / 2 + (j - i - 1)
    }

    /// Distance between points `i` and `j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.data[self.offset(i, j)],
            std::cmp::Ordering::Greater => self.data[self.offset(j, i)],
        }
    }

    /// Points within `eps` of `i`, including `i` itself, ascending.
    pub fn neighbors_within(&self, i: usize, eps: f64) -> Vec<usize> {
        (0..self.n).filter(|&j| self.get(i, j) <= eps).collect()
    }
}
