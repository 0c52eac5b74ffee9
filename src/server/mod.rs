//! RPC surface: JSON-over-HTTP routes wrapping `VectorStorage`

pub mod handlers;
mod server;
pub mod types;

pub use handlers::AppState;
pub use server::{router, RpcServer, DEFAULT_MAX_BODY_BYTES};
