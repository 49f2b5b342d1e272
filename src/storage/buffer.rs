//! Write buffer for bulk ingestion
//!
//! Holds per-series runs of encoded samples (padding included) that have been
//! accepted but not yet appended to the data file, plus a cache of the last
//! known value per series so interpolated padding stays correct across
//! buffered calls without re-reading the file.
//!
//! Nothing here is durable: buffered samples are lost unless flushed before
//! the process exits.

use crate::storage::error::StorageResult;
use crate::storage::types::{decode_sample, SeriesId, SAMPLE_SIZE};
use std::collections::HashMap;
use std::sync::Mutex;

/// Pending encoded samples keyed by series
#[derive(Debug, Default)]
pub struct WriteBuffer {
    pending: Mutex<HashMap<SeriesId, Vec<u8>>>,
    last_values: Mutex<HashMap<SeriesId, f32>>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append encoded samples for a series
    pub fn push(&self, id: SeriesId, bytes: &[u8]) -> StorageResult<()> {
        self.pending
            .lock()?
            .entry(id)
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }

    /// Bytes waiting for a series
    pub fn buffered_bytes(&self, id: SeriesId) -> StorageResult<u64> {
        Ok(self
            .pending
            .lock()?
            .get(&id)
            .map(|b| b.len() as u64)
            .unwrap_or(0))
    }

    /// Whole samples waiting for a series
    pub fn buffered_samples(&self, id: SeriesId) -> StorageResult<u64> {
        Ok(self.buffered_bytes(id)? / SAMPLE_SIZE)
    }

    /// Whether a series has anything waiting
    pub fn has_pending(&self, id: SeriesId) -> StorageResult<bool> {
        Ok(self
            .pending
            .lock()?
            .get(&id)
            .map(|b| !b.is_empty())
            .unwrap_or(false))
    }

    /// Last buffered sample of a series
    pub fn last_buffered(&self, id: SeriesId) -> StorageResult<Option<f32>> {
        let pending = self.pending.lock()?;
        Ok(pending.get(&id).and_then(|b| {
            let n = b.len();
            if n < SAMPLE_SIZE as usize {
                return None;
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&b[n - 4..n]);
            Some(decode_sample(raw))
        }))
    }

    /// Take every pending run, ordered by series id
    pub fn take_all(&self) -> StorageResult<Vec<(SeriesId, Vec<u8>)>> {
        let mut drained: Vec<_> = self
            .pending
            .lock()?
            .drain()
            .filter(|(_, bytes)| !bytes.is_empty())
            .collect();
        drained.sort_by_key(|(id, _)| *id);
        Ok(drained)
    }

    /// Take the pending run of one series
    pub fn take(&self, id: SeriesId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.pending.lock()?.remove(&id).filter(|b| !b.is_empty()))
    }

    /// Put back runs that could not be flushed, ahead of anything queued since
    pub fn restore(&self, runs: Vec<(SeriesId, Vec<u8>)>) -> StorageResult<()> {
        let mut pending = self.pending.lock()?;
        for (id, mut bytes) in runs {
            if let Some(newer) = pending.remove(&id) {
                bytes.extend_from_slice(&newer);
            }
            pending.insert(id, bytes);
        }
        Ok(())
    }

    /// Cached last value of a series
    pub fn last_value(&self, id: SeriesId) -> StorageResult<Option<f32>> {
        Ok(self.last_values.lock()?.get(&id).copied())
    }

    pub fn set_last_value(&self, id: SeriesId, value: f32) -> StorageResult<()> {
        self.last_values.lock()?.insert(id, value);
        Ok(())
    }

    /// Drop all state held for a series
    pub fn forget(&self, id: SeriesId) -> StorageResult<()> {
        self.pending.lock()?.remove(&id);
        self.last_values.lock()?.remove(&id);
        Ok(())
    }

    /// (series with pending data, total pending bytes)
    pub fn totals(&self) -> StorageResult<(usize, u64)> {
        let pending = self.pending.lock()?;
        let series = pending.values().filter(|b| !b.is_empty()).count();
        let bytes = pending.values().map(|b| b.len() as u64).sum();
        Ok((series, bytes))
    }
}
