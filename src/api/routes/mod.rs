//! API Routes
//!
//! Route handlers organized by functionality.

pub mod export;
pub mod feeds;
pub mod health;

use crate::api::error::{ApiError, ApiResult};
use crate::storage::StorageResult;

/// Run a synchronous engine call on the blocking pool
pub(crate) async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Engine task failed: {}", e)))?
        .map_err(ApiError::from)
}
