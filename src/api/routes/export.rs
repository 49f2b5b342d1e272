//! Export Routes
//!
//! Bulk export endpoints for backup and analysis.
//!
//! - GET /api/v1/feeds/:id/export - Raw sample bytes from a byte offset
//! - GET /api/v1/feeds/:id/csv - Delimited text over a time range

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::api::dto::{CsvParams, ExportParams};
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::run_blocking;
use crate::api::state::AppState;
use crate::storage::SeriesId;

/// Chunks buffered between the file reader and the response body
const EXPORT_CHANNEL_DEPTH: usize = 4;

/// GET /api/v1/feeds/:id/export
///
/// Streams the data file from `start` (a byte offset the client already
/// holds), rewound by one sample so the client can check the overlap.
pub async fn export_raw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Response> {
    ensure_export_enabled(&state)?;

    let engine = Arc::clone(&state.engine);
    let reader = run_blocking(move || engine.export(id, params.start)).await?;
    let length = reader.remaining();

    let (tx, rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(EXPORT_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        for chunk in reader {
            if tx.blocking_send(chunk).is_err() {
                tracing::debug!(series = id, "Export client went away");
                break;
            }
        }
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.dat\"", id),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// GET /api/v1/feeds/:id/csv
///
/// One `timestamp,value` row per output step; missing samples produce no row.
pub async fn export_csv(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SeriesId>,
    Query(params): Query<CsvParams>,
) -> ApiResult<Response> {
    ensure_export_enabled(&state)?;

    let engine = Arc::clone(&state.engine);
    let body = run_blocking(move || {
        let mut out = Vec::new();
        let rows = engine.csv_export(id, params.start, params.end, params.interval, &mut out)?;
        tracing::debug!(series = id, rows, "CSV export");
        Ok(out)
    })
    .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.csv\"", id),
            ),
        ],
        Body::from(body),
    )
        .into_response())
}

fn ensure_export_enabled(state: &AppState) -> ApiResult<()> {
    if !state.config.enable_export {
        return Err(ApiError::Validation(
            "Export feature is disabled".to_string(),
        ));
    }
    Ok(())
}
