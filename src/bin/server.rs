//! Vesper server binary
//!
//! Loads snapshots from the data directory, serves the RPC surface, and
//! writes all snapshots back on clean shutdown. Exits non-zero when the
//! bind fails or strict snapshot loading fails.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use vesper::logging::{init_logging, LogConfig};
use vesper::server::RpcServer;
use vesper::storage::VectorStorage;
use vesper::{metrics, simd};

#[derive(Parser, Debug)]
#[command(name = "vesper-server", version, about = "Vesper vector index service")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:50052")]
    listen: String,

    /// Directory holding collection snapshots and the manifest
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Log level or filter directive
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format: json or pretty
    #[arg(long, default_value = "json")]
    log_format: String,

    /// Skip loading snapshots on start
    #[arg(long)]
    skip_load: bool,

    /// Treat any corrupt snapshot as a startup failure
    #[arg(long)]
    strict_load: bool,

    /// Maximum request body size in MiB
    #[arg(long, default_value_t = 100)]
    max_body_mb: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(LogConfig {
        level: args.log_level.clone(),
        json_format: args.log_format == "json",
    })?;
    metrics::init_uptime();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        kernel = simd::kernel_variant(),
        data_dir = %args.data_dir.display(),
        "starting vesper"
    );

    let storage = Arc::new(VectorStorage::with_data_dir(&args.data_dir));
    if args.skip_load {
        info!("snapshot loading skipped");
    } else {
        storage
            .load_all(args.strict_load)
            .context("loading snapshots")?;
    }

    let server = RpcServer::new(args.listen.clone(), storage.clone())
        .with_max_body_bytes(args.max_body_mb * 1024 * 1024);
    server.serve().await.context("serving rpc")?;

    storage.save_all().context("saving snapshots on shutdown")?;
    info!("clean shutdown");
    Ok(())
}
