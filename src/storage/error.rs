//! Storage engine error types
//!
//! Every failure path in the storage layer surfaces as one of these variants.
//! Validation and capacity errors are returned to the caller and are never
//! fatal to the process.

use crate::storage::types::SeriesId;
use thiserror::Error;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// Series has no metadata record
    #[error("Series not found: {0}")]
    NotFound(SeriesId),

    /// Request parameters rejected (timestamp window, interval, time range)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Write precedes the series start time
    #[error("Timestamp {timestamp} is older than series start time {start_time}")]
    PastTimestamp { timestamp: i64, start_time: i64 },

    /// Padding needed to reach the write position exceeds the gap cap
    #[error("Gap of {gap} samples exceeds maximum padding of {max}")]
    GapTooLarge { gap: i64, max: i64 },

    /// Range query would produce more points than allowed
    #[error("Request datapoint limit reached ({max}), increase request interval or time range, requested datapoints = {requested}")]
    RequestTooLarge { requested: i64, max: i64 },

    /// Another writer holds the metadata file lock
    #[error("Metadata file for series {0} is locked by another process")]
    LockContention(SeriesId),

    /// Metadata record is malformed
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// In-process lock was poisoned
    #[error("Lock error: {0}")]
    Lock(String),
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StorageError::Lock(err.to_string())
    }
}

impl From<csv::Error> for StorageError {
    fn from(err: csv::Error) -> Self {
        StorageError::Io(err.into())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::NotFound(7);
        assert_eq!(err.to_string(), "Series not found: 7");

        let err = StorageError::RequestTooLarge {
            requested: 3601,
            max: 3000,
        };
        assert!(err.to_string().contains("requested datapoints = 3601"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }
}
