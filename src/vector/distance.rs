//! Distance functions and similarity conversions.
//!
//! Cosine distance lives in `[0, 2]`; similarity is `1 - distance / 2`, so it
//! lives in `[0, 1]` with 1 meaning identical direction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Distance metric used for clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, range `[0, 2]`.
    #[default]
    Cosine,
    /// L2 distance.
    Euclidean,
}

impl DistanceMetric {
    /// Distance between two vectors under this metric.
    #[inline]
    pub fn distance<T: Copy + Into<f64>>(&self, a: &[T], b: &[T]) -> f64 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::Euclidean => euclidean_distance(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
        }
    }

    /// Parse from a config or CLI string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "euclidean" | "l2" => Some(Self::Euclidean),
            _ => None,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cosine distance, clamped to `[0, 2]`.
///
/// A vector compared with itself yields exactly 0. Zero vectors have no
/// direction and sit at distance 1 from everything.
#[inline]
pub fn cosine_distance<T: Copy + Into<f64>>(a: &[T], b: &[T]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x.into(), y.into());
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    // sqrt(n * n) == n exactly, so identical inputs give cos == 1.0
    let cos = (dot / (norm_a * norm_b).sqrt()).clamp(-1.0, 1.0);
    (1.0 - cos).clamp(0.0, 2.0)
}

/// Euclidean (L2) distance.
#[inline]
pub fn euclidean_distance<T: Copy + Into<f64>>(a: &[T], b: &[T]) -> f64 {
    euclidean_distance_squared(a, b).sqrt()
}

/// Squared Euclidean distance.
#[inline]
pub fn euclidean_distance_squared<T: Copy + Into<f64>>(a: &[T], b: &[T]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x.into() - y.into();
            d * d
        })
        .sum()
}

/// Convert a cosine distance into a similarity in `[0, 1]`.
#[inline]
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 - distance / 2.0
}

/// Largest cosine distance that still satisfies `min_similarity`.
#[inline]
pub fn max_distance_for_similarity(min_similarity: f64) -> f64 {
    (1.0 - min_similarity) * 2.0
}

/// Normalize a vector to unit length in place. Returns false for zero vectors.
pub fn l2_normalize(v: &mut [f64]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}
