//! Core data types for the fina storage engine
//!
//! - `Metadata`: the fixed 16-byte header record of a series
//! - `PaddingMode`: how gap positions are filled on write
//! - `DataPoint`: one resampled point returned by a range read
//! - `DataQuery`: parameters of a range read
//! - `LastValue` and `BufferOutcome`: results of engine operations

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Numeric identifier of a series
pub type SeriesId = u32;

/// Width of one encoded sample in bytes
pub const SAMPLE_SIZE: u64 = 4;

/// Size of the metadata record in bytes
pub const META_SIZE: usize = 16;

/// Encode a sample into its on-disk representation
pub fn encode_sample(value: f32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Decode an on-disk sample
pub fn decode_sample(bytes: [u8; 4]) -> f32 {
    f32::from_le_bytes(bytes)
}

/// Per-series header record
///
/// Layout (16 bytes, little-endian):
/// ```text
/// [0..4)   reserved = 0
/// [4..8)   reserved = 0
/// [8..12)  interval   (u32, seconds)
/// [12..16) start_time (u32, unix seconds, 0 = no data yet)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Sampling interval in seconds
    pub interval: u32,
    /// Aligned timestamp of position 0, or 0 before the first write
    pub start_time: u32,
}

impl Metadata {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            start_time: 0,
        }
    }

    /// Serialize the record
    pub fn to_bytes(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[8..12].copy_from_slice(&self.interval.to_le_bytes());
        buf[12..16].copy_from_slice(&self.start_time.to_le_bytes());
        buf
    }

    /// Parse the record, ignoring the reserved words
    pub fn from_bytes(buf: &[u8; META_SIZE]) -> StorageResult<Self> {
        let interval = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let start_time = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);

        if interval == 0 {
            return Err(StorageError::Corruption(
                "metadata record has zero interval".to_string(),
            ));
        }

        Ok(Self {
            interval,
            start_time,
        })
    }

    /// Whether the series has received its first write
    pub fn is_born(&self) -> bool {
        self.start_time != 0
    }
}

/// Gap filling policy applied when a write lands beyond the tail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    /// Fill gaps with NaN ("no data")
    #[default]
    None,
    /// Repeat the last value
    Flat,
    /// Linear ramp from the last value to the new one
    Join,
}

impl PaddingMode {
    /// Map a loosely-typed padding argument: absent means `None`,
    /// `"join"` interpolates, anything else carries the last value.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None => PaddingMode::None,
            Some(s) if s.eq_ignore_ascii_case("join") => PaddingMode::Join,
            Some(s) if s.is_empty() || s.eq_ignore_ascii_case("none") => PaddingMode::None,
            Some(_) => PaddingMode::Flat,
        }
    }
}

impl FromStr for PaddingMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(PaddingMode::None),
            "flat" => Ok(PaddingMode::Flat),
            "join" => Ok(PaddingMode::Join),
            other => Err(StorageError::Validation(format!(
                "unknown padding mode: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PaddingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaddingMode::None => write!(f, "none"),
            PaddingMode::Flat => write!(f, "flat"),
            PaddingMode::Join => write!(f, "join"),
        }
    }
}

/// One point of a range read
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DataPoint {
    /// Unix timestamp in milliseconds
    pub time: i64,
    /// Sample value, `None` when the slot holds no data
    pub value: Option<f32>,
}

/// Last sample of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LastValue {
    /// Unix timestamp in seconds of the last position
    pub time: i64,
    /// Stored value (NaN when the tail is a gap)
    pub value: f32,
}

/// Range read parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataQuery {
    /// Start of range, unix milliseconds
    pub start_ms: i64,
    /// End of range (inclusive), unix milliseconds
    pub end_ms: i64,
    /// Output interval in seconds
    pub interval: i64,
    /// Omit missing points instead of emitting them as null
    pub skip_missing: bool,
    /// Never step finer than the native interval
    pub limit_interval: bool,
}

impl DataQuery {
    pub fn new(start_ms: i64, end_ms: i64, interval: i64) -> Self {
        Self {
            start_ms,
            end_ms,
            interval,
            skip_missing: false,
            limit_interval: false,
        }
    }

    pub fn skip_missing(mut self, skip: bool) -> Self {
        self.skip_missing = skip;
        self
    }

    pub fn limit_interval(mut self, limit: bool) -> Self {
        self.limit_interval = limit;
        self
    }
}

/// Result of a buffered write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// Sample (and any padding) appended to the write buffer
    Queued { position: i64, padding: i64 },
    /// Sample arrived at or behind the tail and was dropped
    Dropped { position: i64, last_position: i64 },
}
