//! Wire request/response shapes for the RPC surface
//!
//! JSON bodies over HTTP routes; one struct pair per method.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hnsw::{DistanceMetric, VectorData};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    #[serde(default)]
    pub index_config: Option<IndexConfigPatch>,
}

/// Optional overrides for the collection's index parameters; anything
/// absent keeps its default.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IndexConfigPatch {
    pub m: Option<usize>,
    pub ef_construction: Option<usize>,
    pub ef_search: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListCollectionsResponse {
    pub collections: Vec<CollectionInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub count: usize,
    pub metric: DistanceMetric,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsertRequest {
    pub id: Option<String>,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsertResponse {
    pub success: bool,
    pub id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchInsertRequest {
    pub vectors: Vec<InsertRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchInsertResponse {
    pub success: bool,
    pub inserted_count: usize,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetVectorResponse {
    pub found: bool,
    pub vector: Option<VectorData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Vec<f32>,
    pub top_k: usize,
    /// Per-call beam width; the collection's `ef_search` when absent
    pub ef: Option<usize>,
    /// Attach stored values and metadata to each hit
    #[serde(default)]
    pub include_data: bool,
}

/// One search hit. `score` carries the metric's distance unchanged:
/// smaller is better for every metric.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireResult {
    pub id: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<WireResult>,
    pub search_time_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchQuery {
    pub values: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSearchRequest {
    pub queries: Vec<BatchQuery>,
    pub top_k: usize,
    pub ef: Option<usize>,
    #[serde(default)]
    pub include_data: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSearchResponse {
    pub results: Vec<Vec<WireResult>>,
    pub total_time_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_vectors: usize,
    pub memory_usage_bytes: usize,
    pub index_size_bytes: usize,
    pub avg_search_time_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub uptime_seconds: u64,
    pub searches_total: u64,
    pub search_time_ms_total: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
