//! Fina API Server
//!
//! Run with: cargo run --bin fina-api
//!
//! # Configuration
//!
//! Loaded from `--config <path>` or the default search path
//! (`~/.config/fina/config.toml`, `/etc/fina/config.toml`, `./config.toml`).
//!
//! Environment variables override the file:
//! - `FINA_DATA_DIR`: Data directory
//! - `FINA_API_HOST`: Host to bind to (default: 0.0.0.0)
//! - `FINA_API_PORT`: Port to listen on (default: 8083)
//! - `FINA_LOG_LEVEL`: Log level (default: info)
//! - `FINA_LOG_FORMAT`: pretty or json
//! - `RUST_LOG`: Full filter directive, wins over `FINA_LOG_LEVEL`

use anyhow::Context;
use clap::Parser;
use fina::api::{serve, ApiConfig, AppState};
use fina::config::Config;
use fina::storage::Engine;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fina-api")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HTTP server for the fina time-series engine")]
struct Args {
    /// Config file (default: search standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    config.logging.init()?;

    tracing::info!("Starting Fina API server v{}", env!("CARGO_PKG_VERSION"));

    let storage_config = config.storage_config()?;
    let api_config = ApiConfig::from(&config.api);

    tracing::info!("Data directory: {:?}", storage_config.data_dir);
    tracing::info!("Flush interval: {}ms", storage_config.flush_interval_ms);

    // Initialize storage engine
    let engine = Arc::new(
        Engine::new(storage_config).context("Failed to initialize storage engine")?,
    );

    // Start background flush task
    let flush_handle = engine.start_background_flush();

    let state = AppState::new(Arc::clone(&engine), api_config.clone());

    // Run server
    serve(state, &api_config).await?;

    // Graceful shutdown
    tracing::info!("Shutting down storage engine...");
    let bytes = engine.shutdown()?;
    flush_handle.abort();

    tracing::info!(bytes, "Fina API server stopped");
    Ok(())
}
