//! HNSW (Hierarchical Navigable Small World) vector index
//!
//! Approximate nearest neighbor search over one collection's vectors:
//! arena-backed graph, string-id mapping, tombstone deletion, seedable
//! level RNG, and versioned binary snapshots.

mod index;
mod query_buffers;
mod snapshot;
mod types;

pub use index::HnswIndex;
pub use types::{
    DistanceMetric, HnswConfig, SearchResult, VectorData, VectorRecord, MAX_LEVEL,
};
