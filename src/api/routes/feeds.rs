//! Feed Routes
//!
//! Endpoints for managing feeds and reading/writing samples.
//!
//! - POST /api/v1/feeds/:id - Create a feed
//! - DELETE /api/v1/feeds/:id - Delete a feed
//! - POST /api/v1/feeds/:id/post - Write one sample
//! - POST /api/v1/feeds/:id/update - Overwrite one sample
//! - POST /api/v1/feeds/:id/buffer - Queue one sample for bulk save
//! - POST /api/v1/flush - Save all queued samples
//! - GET /api/v1/feeds/:id/lastvalue - Last sample
//! - GET /api/v1/feeds/:id/size - Bytes on disk
//! - GET /api/v1/feeds/:id/data - Resampled range read

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::{
    to_pairs, BufferResponse, CreateFeedRequest, DataParams, DataResponse, FeedResponse,
    FlushResponse, PostRequest, PostResponse, SizeResponse, UpdateRequest,
};
use crate::api::error::ApiResult;
use crate::api::routes::run_blocking;
use crate::api::state::AppState;
use crate::storage::{DataQuery, LastValue, PaddingMode, SeriesId};

/// POST /api/v1/feeds/:id
///
/// Create a feed. Intervals below the minimum are raised to it; an existing
/// feed is returned unchanged.
pub async fn create_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
    Json(req): Json<CreateFeedRequest>,
) -> ApiResult<(StatusCode, Json<FeedResponse>)> {
    let engine = Arc::clone(&state.engine);
    let meta = run_blocking(move || engine.create(id, req.interval)).await?;

    Ok((StatusCode::CREATED, Json(FeedResponse::new(id, meta))))
}

/// DELETE /api/v1/feeds/:id
pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
) -> ApiResult<StatusCode> {
    let engine = Arc::clone(&state.engine);
    run_blocking(move || engine.delete(id)).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/feeds/:id/post
pub async fn post_value(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
    Json(req): Json<PostRequest>,
) -> ApiResult<Json<PostResponse>> {
    let mode = PaddingMode::from_arg(req.padding.as_deref());
    let engine = Arc::clone(&state.engine);
    let value = run_blocking(move || engine.post(id, req.time, req.value, mode)).await?;

    Ok(Json(PostResponse { value }))
}

/// POST /api/v1/feeds/:id/update
pub async fn update_value(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<Json<PostResponse>> {
    let engine = Arc::clone(&state.engine);
    let value = run_blocking(move || engine.update(id, req.time, req.value)).await?;

    Ok(Json(PostResponse { value }))
}

/// POST /api/v1/feeds/:id/buffer
///
/// Queue a sample for the next bulk save. Samples at or behind the tail are
/// reported as dropped rather than rejected.
pub async fn buffer_value(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
    Json(req): Json<PostRequest>,
) -> ApiResult<(StatusCode, Json<BufferResponse>)> {
    let mode = PaddingMode::from_arg(req.padding.as_deref());
    let engine = Arc::clone(&state.engine);
    let outcome =
        run_blocking(move || engine.post_bulk_prepare(id, req.time, req.value, mode)).await?;

    Ok((StatusCode::ACCEPTED, Json(outcome.into())))
}

/// POST /api/v1/flush
pub async fn flush(State(state): State<Arc<AppState>>) -> ApiResult<Json<FlushResponse>> {
    let engine = Arc::clone(&state.engine);
    let bytes = run_blocking(move || engine.post_bulk_save()).await?;

    tracing::info!(bytes, "Flushed write buffers");
    Ok(Json(FlushResponse { bytes }))
}

/// GET /api/v1/feeds/:id/lastvalue
///
/// `null` when the feed holds no samples yet.
pub async fn last_value(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
) -> ApiResult<Json<Option<LastValue>>> {
    let engine = Arc::clone(&state.engine);
    let last = run_blocking(move || engine.lastvalue(id)).await?;

    Ok(Json(last))
}

/// GET /api/v1/feeds/:id/size
pub async fn feed_size(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
) -> ApiResult<Json<SizeResponse>> {
    let engine = Arc::clone(&state.engine);
    let bytes = run_blocking(move || engine.feed_size(id)).await?;

    Ok(Json(SizeResponse { id, bytes }))
}

/// GET /api/v1/feeds/:id/data
///
/// Returns `[[time_ms, value|null], ...]`.
pub async fn get_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
    Query(params): Query<DataParams>,
) -> ApiResult<Json<DataResponse>> {
    let query = DataQuery::new(params.start, params.end, params.interval)
        .skip_missing(params.skipmissing)
        .limit_interval(params.limitinterval);

    let engine = Arc::clone(&state.engine);
    let points = run_blocking(move || Ok(to_pairs(engine.get_data(id, query)?))).await?;

    Ok(Json(points))
}
