//! Fina REST API
//!
//! HTTP API layer over the storage engine, built with Axum.
//!
//! # Endpoints
//!
//! ## Feeds
//! - `POST /api/v1/feeds/:id` - Create a feed (`{"interval": 10}`)
//! - `DELETE /api/v1/feeds/:id` - Delete a feed
//! - `GET /api/v1/feeds/:id/size` - Bytes on disk
//!
//! ## Writes
//! - `POST /api/v1/feeds/:id/post` - Write one sample
//! - `POST /api/v1/feeds/:id/update` - Overwrite one sample
//! - `POST /api/v1/feeds/:id/buffer` - Queue one sample for bulk save
//! - `POST /api/v1/flush` - Save all queued samples
//!
//! ## Reads
//! - `GET /api/v1/feeds/:id/lastvalue` - Last sample
//! - `GET /api/v1/feeds/:id/data` - Resampled range read
//!
//! ## Export
//! - `GET /api/v1/feeds/:id/export` - Raw sample stream
//! - `GET /api/v1/feeds/:id/csv` - Delimited text
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use fina::api::{serve, ApiConfig, AppState};
//! use fina::storage::{Engine, StorageConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(Engine::new(StorageConfig::default())?);
//!     let config = ApiConfig::default();
//!
//!     let state = AppState::new(engine, config.clone());
//!     serve(state, &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Feed routes
        .route(
            "/feeds/:id",
            post(routes::feeds::create_feed).delete(routes::feeds::delete_feed),
        )
        .route("/feeds/:id/size", get(routes::feeds::feed_size))
        // Write routes
        .route("/feeds/:id/post", post(routes::feeds::post_value))
        .route("/feeds/:id/update", post(routes::feeds::update_value))
        .route("/feeds/:id/buffer", post(routes::feeds::buffer_value))
        .route("/flush", post(routes::feeds::flush))
        // Read routes
        .route("/feeds/:id/lastvalue", get(routes::feeds::last_value))
        .route("/feeds/:id/data", get(routes::feeds::get_data))
        // Export routes
        .route("/feeds/:id/export", get(routes::export::export_raw))
        .route("/feeds/:id/csv", get(routes::export::export_csv));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Fina API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Fina API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
