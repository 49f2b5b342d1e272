//! # Fina
//!
//! Fixed-interval, non-averaging time-series storage. Each series is a flat
//! array of 32-bit float samples on disk; the array position of a sample is
//! derived from its timestamp, so every read and write is a single seek.
//!
//! ## Features
//!
//! - **O(1) access**: position = (aligned time - start time) / interval
//! - **Gap padding**: missing slots as NaN, carried forward, or interpolated
//! - **Bulk ingestion**: in-memory write buffer flushed with one append per series
//! - **Resumable export**: raw byte streams from a client-held offset, plus CSV
//!
//! ## Modules
//!
//! - [`storage`]: Storage engine (metadata, data files, write buffer)
//! - [`config`]: TOML and environment configuration
//! - [`api`]: REST API server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fina::storage::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(StorageConfig::default())?;
//!
//!     // 10 second feed
//!     engine.create(1, 10)?;
//!
//!     let now = chrono::Utc::now().timestamp();
//!     engine.post(1, now - 60, 20.5, PaddingMode::None)?;
//!     engine.post(1, now, 21.0, PaddingMode::Join)?;
//!
//!     if let Some(last) = engine.lastvalue(1)? {
//!         println!("{} at {}", last.value, last.time);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    BufferOutcome, DataPoint, DataQuery, Engine, LastValue, Metadata, PaddingMode, SeriesId,
    StorageConfig, StorageError, StorageResult, StorageStats,
};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{
    Config, ConfigError, LoggingConfig, StorageConfig as ConfigStorageConfig,
    ApiConfig as ConfigApiConfig,
};
