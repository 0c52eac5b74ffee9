//! RPC request handlers
//!
//! Stateless translation between wire messages and `VectorStorage`
//! calls. Domain outcomes (missing id, duplicate name) come back as
//! `success=false` / `found=false` bodies; contract violations map to
//! 4xx, everything unexpected to 500. A failed call never tears down
//! the connection.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use super::types::*;
use crate::error::Error;
use crate::hnsw::{HnswConfig, SearchResult, VectorRecord};
use crate::metrics;
use crate::storage::{CollectionConfig, VectorStorage};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<VectorStorage>,
}

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::DimensionMismatch { .. }
        | Error::InvalidVector
        | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        Error::UnknownCollection(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::CollectionExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error) -> Response {
    let status = error_status(err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: metrics::uptime_seconds(),
    })
}

pub async fn metrics_summary() -> Json<MetricsResponse> {
    Json(MetricsResponse {
        uptime_seconds: metrics::uptime_seconds(),
        searches_total: metrics::searches_total(),
        search_time_ms_total: metrics::search_time_ms_total(),
    })
}

pub async fn create_collection(
    State(state): State<AppState>,
    Json(request): Json<CreateCollectionRequest>,
) -> Response {
    let mut hnsw = HnswConfig::default();
    if let Some(patch) = &request.index_config {
        if let Some(m) = patch.m {
            hnsw.m = m;
            hnsw.m_max0 = m * 2;
            hnsw.ml = 1.0 / (m.max(2) as f32).ln();
        }
        if let Some(ef_construction) = patch.ef_construction {
            hnsw.ef_construction = ef_construction;
        }
        if let Some(ef_search) = patch.ef_search {
            hnsw.ef_search = ef_search;
        }
    }

    let config = CollectionConfig {
        name: request.name.clone(),
        dimension: request.dimension,
        metric: request.metric,
        hnsw,
    };
    if let Err(e) = config.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(StatusResponse {
                success: false,
                message: e.to_string(),
            }),
        )
            .into_response();
    }

    if state.storage.create_collection(config) {
        info!(name = %request.name, "collection created via rpc");
        Json(StatusResponse {
            success: true,
            message: format!("collection {} created", request.name),
        })
        .into_response()
    } else {
        Json(StatusResponse {
            success: false,
            message: format!("collection {} already exists", request.name),
        })
        .into_response()
    }
}

pub async fn delete_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<StatusResponse> {
    if state.storage.delete_collection(&name) {
        Json(StatusResponse {
            success: true,
            message: format!("collection {name} deleted"),
        })
    } else {
        Json(StatusResponse {
            success: false,
            message: format!("unknown collection: {name}"),
        })
    }
}

pub async fn list_collections(State(state): State<AppState>) -> Json<ListCollectionsResponse> {
    let collections = state
        .storage
        .list_stats()
        .into_iter()
        .map(|s| CollectionInfo {
            name: s.name,
            dimension: s.dimension,
            count: s.vector_count,
            metric: s.metric,
        })
        .collect();
    Json(ListCollectionsResponse { collections })
}

pub async fn stats(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.storage.get_stats(&name) {
        Some(stats) => Json(StatsResponse {
            total_vectors: stats.vector_count,
            memory_usage_bytes: stats.memory_usage_bytes,
            index_size_bytes: stats.index_size_bytes,
            avg_search_time_ms: metrics::avg_search_time_ms(),
        })
        .into_response(),
        None => error_response(&Error::UnknownCollection(name)),
    }
}

pub async fn insert(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<InsertRequest>,
) -> Response {
    match state
        .storage
        .insert(&name, request.values, request.id, request.metadata)
    {
        Ok(id) => Json(InsertResponse {
            success: true,
            id: Some(id),
            message: None,
        })
        .into_response(),
        Err(e) => (
            error_status(&e),
            Json(InsertResponse {
                success: false,
                id: None,
                message: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

pub async fn batch_insert(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<BatchInsertRequest>,
) -> Response {
    let records: Vec<VectorRecord> = request
        .vectors
        .into_iter()
        .map(|v| VectorRecord {
            id: v.id,
            values: v.values,
            metadata: v.metadata,
        })
        .collect();

    let storage = state.storage.clone();
    let joined =
        tokio::task::spawn_blocking(move || storage.batch_insert(&name, records)).await;
    let result = match joined {
        Ok(result) => result,
        Err(e) => return error_response(&Error::internal(format!("batch insert task: {e}"))),
    };

    match result {
        Ok(inserted_count) => Json(BatchInsertResponse {
            success: true,
            inserted_count,
            message: None,
        })
        .into_response(),
        Err(e) => (
            error_status(&e),
            Json(BatchInsertResponse {
                success: false,
                inserted_count: 0,
                message: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

pub async fn delete_vector(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Response {
    match state.storage.remove(&name, &id) {
        Ok(success) => Json(DeleteResponse { success }).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_vector(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Response {
    match state.storage.get(&name, &id) {
        Ok(Some(vector)) => Json(GetVectorResponse {
            found: true,
            vector: Some(vector),
        })
        .into_response(),
        Ok(None) => Json(GetVectorResponse {
            found: false,
            vector: None,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

fn to_wire(
    storage: &VectorStorage,
    name: &str,
    results: Vec<SearchResult>,
    include_data: bool,
) -> Vec<WireResult> {
    results
        .into_iter()
        .map(|r| {
            let mut wire = WireResult {
                id: r.id,
                score: r.distance,
                values: None,
                metadata: None,
            };
            if include_data {
                if let Ok(Some(data)) = storage.get(name, &wire.id) {
                    wire.values = Some(data.values);
                    wire.metadata = Some(data.metadata);
                }
            }
            wire
        })
        .collect()
}

pub async fn search(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SearchRequest>,
) -> Response {
    let started = Instant::now();
    match state
        .storage
        .search(&name, &request.query, request.top_k, request.ef)
    {
        Ok(results) => {
            let elapsed = started.elapsed();
            metrics::record_searches(1, elapsed);
            let results = to_wire(&state.storage, &name, results, request.include_data);
            Json(SearchResponse {
                results,
                search_time_ms: elapsed.as_secs_f64() * 1000.0,
            })
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn batch_search(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<BatchSearchRequest>,
) -> Response {
    let started = Instant::now();
    let queries: Vec<Vec<f32>> = request.queries.into_iter().map(|q| q.values).collect();
    let query_count = queries.len() as u64;

    let storage = state.storage.clone();
    let task_name = name.clone();
    let top_k = request.top_k;
    let ef = request.ef;
    let joined = tokio::task::spawn_blocking(move || {
        storage.batch_search(&task_name, &queries, top_k, ef)
    })
    .await;
    let result = match joined {
        Ok(result) => result,
        Err(e) => return error_response(&Error::internal(format!("batch search task: {e}"))),
    };

    match result {
        Ok(lists) => {
            let elapsed = started.elapsed();
            metrics::record_searches(query_count, elapsed);
            let results = lists
                .into_iter()
                .map(|list| to_wire(&state.storage, &name, list, request.include_data))
                .collect();
            Json(BatchSearchResponse {
                results,
                total_time_ms: elapsed.as_secs_f64() * 1000.0,
            })
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}
