//! Core data structures for the HNSW index
//!
//! Design goals:
//! - Index-based graph (dense u32 internal indices, never pointers)
//! - Metric captured in a compact tag, resolved once per operation;
//!   interior loops call a monomorphic kernel

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::simd;

/// Hard upper bound on node levels. Levels are drawn from an exponential
/// distribution and clamped here.
pub const MAX_LEVEL: u8 = 32;

/// HNSW construction parameters
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Max bidirectional links per node on upper layers (M)
    pub m: usize,

    /// Max links on layer 0, typically `2 * m`
    pub m_max0: usize,

    /// Beam width during construction. Must be >= m.
    pub ef_construction: usize,

    /// Default beam width during search; overridable per call
    pub ef_search: usize,

    /// Level-generation scale, `1 / ln(m)` unless tuned
    pub ml: f32,

    /// Seed for the per-index level RNG. Fix it for reproducible graphs.
    #[serde(default = "random_seed")]
    pub seed: u64,
}

fn random_seed() -> u64 {
    rand::random()
}

impl Default for HnswConfig {
    fn default() -> Self {
        let m = 16;
        Self {
            m,
            m_max0: m * 2,
            ef_construction: 200,
            ef_search: 50,
            ml: 1.0 / (m as f32).ln(),
            seed: random_seed(),
        }
    }
}

impl HnswConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.m < 2 {
            return Err("m must be at least 2".to_string());
        }
        if self.m_max0 < self.m {
            return Err("m_max0 must be >= m".to_string());
        }
        if self.ef_construction < self.m {
            return Err("ef_construction must be >= m".to_string());
        }
        if self.ef_search == 0 {
            return Err("ef_search must be greater than 0".to_string());
        }
        if self.ml <= 0.0 || !self.ml.is_finite() {
            return Err("ml must be a positive finite value".to_string());
        }
        Ok(())
    }
}

/// Distance metric for a collection
///
/// All reported distances are smaller-is-better: Euclidean is the plain
/// L2 distance, Cosine is `1 - cos_sim`, DotProduct is `-dot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    DotProduct,
}

impl DistanceMetric {
    /// Wire/snapshot code for this metric.
    pub fn code(&self) -> u32 {
        match self {
            Self::Cosine => 0,
            Self::Euclidean => 1,
            Self::DotProduct => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Cosine),
            1 => Some(Self::Euclidean),
            2 => Some(Self::DotProduct),
            _ => None,
        }
    }

    /// Distance used inside the graph. Euclidean stays squared here to
    /// avoid the square root on hot paths; ordering is unaffected.
    #[inline]
    pub fn raw_distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => 1.0 - simd::cosine_similarity(a, b),
            Self::Euclidean => simd::squared_euclidean(a, b),
            Self::DotProduct => -simd::dot_product(a, b),
        }
    }

    /// Maps a raw interior distance to the reported one.
    #[inline]
    pub fn finalize(&self, raw: f32) -> f32 {
        match self {
            Self::Euclidean => raw.max(0.0).sqrt(),
            _ => raw,
        }
    }
}

/// A stored vector: caller-visible id, payload values, and metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorData {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// An insert record as accepted by `batch_insert`: the id is optional
/// and minted by the index when absent.
#[derive(Clone, Debug, Deserialize)]
pub struct VectorRecord {
    pub id: Option<String>,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Graph node: per-layer neighbor lists indexed by layer 0..=level.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub level: u8,
    pub neighbors: Vec<Vec<u32>>,
}

impl Node {
    pub fn new(level: u8) -> Self {
        Self {
            level,
            neighbors: vec![Vec::new(); level as usize + 1],
        }
    }
}

/// Search candidate: ordered by distance first, then internal index, so
/// equal distances break ties deterministically (ascending index wins).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Candidate {
    pub distance: OrderedFloat<f32>,
    pub internal: u32,
}

impl Candidate {
    pub fn new(internal: u32, distance: f32) -> Self {
        Self {
            distance: OrderedFloat(distance),
            internal,
        }
    }
}

/// A single search hit. `distance` is metric-specific and
/// smaller-is-better.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HnswConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.m, 16);
        assert_eq!(config.m_max0, 32);
        assert_eq!(config.ef_construction, 200);
        assert_eq!(config.ef_search, 50);
        assert!((config.ml - 1.0 / 16f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_config_validation() {
        let mut config = HnswConfig::default();
        config.m = 1;
        assert!(config.validate().is_err());

        let mut config = HnswConfig::default();
        config.ef_construction = 4; // < m
        assert!(config.validate().is_err());

        let mut config = HnswConfig::default();
        config.m_max0 = 8; // < m
        assert!(config.validate().is_err());

        let mut config = HnswConfig::default();
        config.ml = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metric_codes_round_trip() {
        for metric in [
            DistanceMetric::Cosine,
            DistanceMetric::Euclidean,
            DistanceMetric::DotProduct,
        ] {
            assert_eq!(DistanceMetric::from_code(metric.code()), Some(metric));
        }
        assert_eq!(DistanceMetric::from_code(3), None);
    }

    #[test]
    fn test_metric_wire_names() {
        assert_eq!(
            serde_json::to_string(&DistanceMetric::DotProduct).unwrap(),
            "\"dot_product\""
        );
        assert_eq!(
            serde_json::from_str::<DistanceMetric>("\"cosine\"").unwrap(),
            DistanceMetric::Cosine
        );
        assert_eq!(
            serde_json::from_str::<DistanceMetric>("\"euclidean\"").unwrap(),
            DistanceMetric::Euclidean
        );
    }

    #[test]
    fn test_distances_are_smaller_is_better() {
        let a = vec![1.0, 0.0];
        let close = vec![0.9, 0.1];
        let far = vec![-1.0, 0.0];

        for metric in [
            DistanceMetric::Cosine,
            DistanceMetric::Euclidean,
            DistanceMetric::DotProduct,
        ] {
            let d_close = metric.raw_distance(&a, &close);
            let d_far = metric.raw_distance(&a, &far);
            assert!(
                d_close < d_far,
                "{:?}: {} should be < {}",
                metric,
                d_close,
                d_far
            );
        }
    }

    #[test]
    fn test_euclidean_finalize_takes_root() {
        let metric = DistanceMetric::Euclidean;
        let raw = metric.raw_distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((raw - 25.0).abs() < 1e-5);
        assert!((metric.finalize(raw) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_candidate_tie_break_by_internal_index() {
        let a = Candidate::new(7, 0.5);
        let b = Candidate::new(3, 0.5);
        let c = Candidate::new(1, 0.25);

        assert!(c < b);
        assert!(b < a); // equal distance, lower index sorts first
    }

    #[test]
    fn test_node_has_lists_for_all_layers() {
        let node = Node::new(3);
        assert_eq!(node.neighbors.len(), 4);
        assert!(node.neighbors.iter().all(|n| n.is_empty()));
    }
}
