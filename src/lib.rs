//! Vesper — multi-collection vector index service
//!
//! A vector database core built around a custom HNSW implementation:
//!
//! - **SIMD kernels**: AVX-512 / AVX-2 / scalar distance and arithmetic
//!   kernels, selected at compile time behind one API
//! - **HNSW index**: arena-backed graph, string ids, tombstone deletion,
//!   seedable construction, versioned binary snapshots
//! - **Storage manager**: named collections, each with its own metric
//!   and index parameters, persisted one snapshot file per collection
//! - **RPC surface**: JSON-over-HTTP CRUD, single and batch search,
//!   stats, health
//!
//! ## Example
//!
//! ```rust
//! use vesper::storage::{CollectionConfig, VectorStorage};
//! use vesper::hnsw::{DistanceMetric, HnswConfig};
//! use std::collections::HashMap;
//!
//! let storage = VectorStorage::new();
//! storage.create_collection(CollectionConfig {
//!     name: "docs".to_string(),
//!     dimension: 3,
//!     metric: DistanceMetric::Cosine,
//!     hnsw: HnswConfig::default(),
//! });
//!
//! storage
//!     .insert("docs", vec![1.0, 0.0, 0.0], Some("a".to_string()), HashMap::new())
//!     .unwrap();
//! let hits = storage.search("docs", &[1.0, 0.0, 0.0], 1, None).unwrap();
//! assert_eq!(hits[0].id, "a");
//! ```

pub mod error;
pub mod hnsw;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod simd;
pub mod storage;

pub use error::{Error, Result};
pub use hnsw::{DistanceMetric, HnswConfig, HnswIndex, SearchResult, VectorData};
pub use storage::{CollectionConfig, CollectionStats, VectorStorage};
