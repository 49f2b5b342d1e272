//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Deserializer, Serialize};

use crate::storage::{BufferOutcome, DataPoint, Metadata, SeriesId};

// ============================================
// FEED DTOs
// ============================================

/// Feed creation request
#[derive(Debug, Deserialize)]
pub struct CreateFeedRequest {
    /// Sampling interval in seconds
    pub interval: u32,
}

/// Feed metadata response
#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub id: SeriesId,
    pub interval: u32,
    /// 0 until the first sample is written
    pub start_time: u32,
}

impl FeedResponse {
    pub fn new(id: SeriesId, meta: Metadata) -> Self {
        Self {
            id,
            interval: meta.interval,
            start_time: meta.start_time,
        }
    }
}

/// Feed size response
#[derive(Debug, Serialize)]
pub struct SizeResponse {
    pub id: SeriesId,
    /// Metadata record plus data file, in bytes
    pub bytes: u64,
}

// ============================================
// WRITE DTOs
// ============================================

/// Single sample write
#[derive(Debug, Deserialize)]
pub struct PostRequest {
    /// Unix timestamp in seconds
    pub time: i64,
    pub value: f64,
    /// "join" interpolates, any other value carries the last sample
    #[serde(default)]
    pub padding: Option<String>,
}

/// In-place update
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    /// Unix timestamp in seconds
    pub time: i64,
    pub value: f64,
}

/// Accepted value
#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub value: f64,
}

/// Outcome of a buffered write
#[derive(Debug, Serialize)]
pub struct BufferResponse {
    /// "queued" or "dropped"
    pub status: String,
    pub position: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_position: Option<i64>,
}

impl From<BufferOutcome> for BufferResponse {
    fn from(outcome: BufferOutcome) -> Self {
        match outcome {
            BufferOutcome::Queued { position, padding } => Self {
                status: "queued".to_string(),
                position,
                padding: Some(padding),
                last_position: None,
            },
            BufferOutcome::Dropped {
                position,
                last_position,
            } => Self {
                status: "dropped".to_string(),
                position,
                padding: None,
                last_position: Some(last_position),
            },
        }
    }
}

/// Bulk save response
#[derive(Debug, Serialize)]
pub struct FlushResponse {
    /// Bytes appended to data files
    pub bytes: u64,
}

// ============================================
// READ DTOs
// ============================================

/// Range read query parameters
#[derive(Debug, Deserialize)]
pub struct DataParams {
    /// Start time, unix milliseconds
    pub start: i64,
    /// End time (inclusive), unix milliseconds
    pub end: i64,
    /// Output interval in seconds
    pub interval: i64,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub skipmissing: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub limitinterval: bool,
}

/// `[time_ms, value|null]` pairs
pub type DataResponse = Vec<(i64, Option<f32>)>;

pub fn to_pairs(points: impl IntoIterator<Item = DataPoint>) -> DataResponse {
    points.into_iter().map(|p| (p.time, p.value)).collect()
}

/// Accepts `1`/`0` as well as `true`/`false`
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected 0 or 1, got {}",
            other
        ))),
    }
}

// ============================================
// EXPORT DTOs
// ============================================

/// Raw export query parameters
#[derive(Debug, Deserialize)]
pub struct ExportParams {
    /// Byte offset the client already holds
    #[serde(default)]
    pub start: u64,
}

/// CSV export query parameters
#[derive(Debug, Deserialize)]
pub struct CsvParams {
    /// Start time, unix seconds
    pub start: i64,
    /// End time, unix seconds
    pub end: i64,
    /// Output interval in seconds
    pub interval: i64,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, unhealthy
    pub status: String,
    /// Storage status
    pub storage: String,
    /// Series with samples waiting for a bulk save
    pub buffered_series: usize,
    /// Bytes waiting for a bulk save
    pub buffered_bytes: u64,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
