//! Brute-force cosine search over a candidate set.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::distance::{cosine_distance, max_distance_for_similarity, similarity_from_distance};
use super::filter::ScopeFilter;
use crate::model::{Fragment, FragmentId};

/// A search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Matching fragment.
    pub fragment_id: FragmentId,
    /// Cosine distance to the query, in `[0, 2]`.
    pub distance: f64,
}

impl Neighbor {
    /// Similarity in `[0, 1]`.
    pub fn similarity(&self) -> f64 {
        similarity_from_distance(self.distance)
    }
}

/// Parameters of a `find_similar` call.
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    /// Query vector.
    pub vector: Vec<f32>,
    /// Maximum results.
    pub limit: usize,
    /// Minimum similarity in `[0, 1]`.
    pub min_similarity: Option<f64>,
    /// Drop fragments that are committed to a unit or claimed by a session.
    pub exclude_owned: bool,
    /// Scope and predicates evaluated before any distance is computed.
    pub filter: ScopeFilter,
}

impl SimilarityQuery {
    /// Create a query with defaults (limit 10, no threshold, owned included).
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            limit: 10,
            min_similarity: None,
            exclude_owned: false,
            filter: ScopeFilter::all(),
        }
    }

    /// Set the result limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the minimum similarity.
    pub fn min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }

    /// Exclude owned and claimed fragments.
    pub fn exclude_owned(mut self, exclude: bool) -> Self {
        self.exclude_owned = exclude;
        self
    }

    /// Set the scope filter.
    pub fn filter(mut self, filter: impl Into<ScopeFilter>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Distance cutoff derived from `min_similarity`.
    pub fn max_distance(&self) -> Option<f64> {
        self.min_similarity
            .filter(|s| !s.is_nan())
            .map(|s| max_distance_for_similarity(s.clamp(0.0, 1.0)))
    }
}

/// Cosine nearest-neighbour search.
///
/// Ranking is ascending by distance with fragment id as the secondary key, so
/// `limit` always cuts at the same place for the same input.
pub struct VectorIndex;

impl VectorIndex {
    /// Rank `candidates` against the query. "No match" is an empty vector.
    pub fn find_similar<'a, I>(candidates: I, query: &SimilarityQuery) -> Vec<Neighbor>
    where
        I: IntoIterator<Item = &'a Fragment>,
    {
        if query.limit == 0 {
            return Vec::new();
        }

        let max_distance = query.max_distance();
        let dimension = query.vector.len();

        let mut hits: Vec<Neighbor> = candidates
            .into_iter()
            .filter(|f| !(query.exclude_owned && (f.is_owned() || f.is_claimed())))
            .filter(|f| query.filter.matches(f))
            .filter_map(|f| {
                let embedding = f.embedding.as_deref()?;
                if embedding.len() != dimension {
                    debug!(
                        "Skipping fragment {}: dimension {} != query {}",
                        f.id,
                        embedding.len(),
                        dimension
                    );
                    return None;
                }
                if embedding.iter().any(|x| !x.is_finite()) {
                    debug!("Skipping fragment {}: non-finite embedding", f.id);
                    return None;
                }
                let distance = cosine_distance(&query.vector, embedding);
                match max_distance {
                    Some(max) if distance > max => None,
                    _ => Some(Neighbor {
                        fragment_id: f.id,
                        distance,
                    }),
                }
            })
            .collect();

        hits.sort_by(rank_order);
        hits.truncate(query.limit);
        hits
    }
}

/// Ascending distance, then ascending fragment id.
pub fn rank_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.fragment_id.cmp(&b.fragment_id))
}
