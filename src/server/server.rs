//! RPC server: router assembly and the serve loop

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handlers::{self, AppState};
use crate::storage::VectorStorage;

/// Default cap on request/response payloads: large batch operations are
/// expected, so this is deliberately generous.
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Build the RPC router over the given storage.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_summary))
        .route(
            "/collections",
            get(handlers::list_collections).post(handlers::create_collection),
        )
        .route(
            "/collections/:name",
            axum::routing::delete(handlers::delete_collection),
        )
        .route("/collections/:name/stats", get(handlers::stats))
        .route("/collections/:name/vectors", post(handlers::insert))
        .route(
            "/collections/:name/vectors/batch",
            post(handlers::batch_insert),
        )
        .route(
            "/collections/:name/vectors/:id",
            get(handlers::get_vector).delete(handlers::delete_vector),
        )
        .route("/collections/:name/search", post(handlers::search))
        .route(
            "/collections/:name/search/batch",
            post(handlers::batch_search),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The RPC server for a `VectorStorage`.
pub struct RpcServer {
    addr: String,
    state: AppState,
    max_body_bytes: usize,
}

impl RpcServer {
    pub fn new(addr: impl Into<String>, storage: Arc<VectorStorage>) -> Self {
        Self {
            addr: addr.into(),
            state: AppState { storage },
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// The assembled router; integration tests drive this directly.
    pub fn router(&self) -> Router {
        router(self.state.clone(), self.max_body_bytes)
    }

    /// Bind and serve until SIGINT/SIGTERM. Returns once in-flight
    /// requests have drained.
    pub async fn serve(self) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!(addr = %self.addr, "rpc server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
