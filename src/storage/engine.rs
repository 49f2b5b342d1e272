//! Fina storage engine
//!
//! The engine composes the metadata store, data files and write buffer:
//! - Direct path: validate → resolve metadata → position → pad + write
//! - Buffered path: validate → position → pad into buffer → bulk append on save
//! - Read path: step a virtual clock across the range, one seek per point
//!
//! All operations are synchronous. Caches and buffers are owned by the engine
//! instance and keyed by series id. At most one writer process per series is
//! assumed. Within the process every mutation of a data file's tail runs
//! under the engine write lock, so positions computed from the tail cannot
//! go stale while a bulk save is in flight.

use crate::storage::buffer::WriteBuffer;
use crate::storage::datafile::{DataFile, ExportReader, SampleReader};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::meta::MetadataStore;
use crate::storage::position::{align, encode_run, nearest_position, padding, position};
use crate::storage::types::{
    BufferOutcome, DataPoint, DataQuery, LastValue, Metadata, PaddingMode, SeriesId, META_SIZE,
    SAMPLE_SIZE,
};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration};

/// Formatting of delimited-text exports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvFormat {
    /// Field separator byte
    pub field_separator: u8,
    /// Digits after the decimal point
    pub decimal_places: usize,
    /// Character used as the decimal point
    pub decimal_separator: char,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            field_separator: b',',
            decimal_places: 2,
            decimal_separator: '.',
        }
    }
}

impl CsvFormat {
    /// Render a sample with the configured precision and decimal point
    ///
    /// Ties round half away from zero.
    pub fn format_value(&self, value: f32) -> String {
        let value = value as f64;
        let scale = 10f64.powi(self.decimal_places.min(15) as i32);
        let rounded = (value * scale).round() / scale;
        let text = if rounded.is_finite() {
            format!("{:.*}", self.decimal_places, rounded)
        } else {
            format!("{:.*}", self.decimal_places, value)
        };
        if self.decimal_separator == '.' {
            text
        } else {
            text.replace('.', &self.decimal_separator.to_string())
        }
    }
}

/// Configuration for the storage engine
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding `<id>.meta` and `<id>.dat` files
    pub data_dir: PathBuf,
    /// Smallest accepted series interval in seconds; smaller requests are raised to it
    pub min_interval: u32,
    /// Largest number of padding samples a single write may create
    pub max_gap: i64,
    /// Largest number of points a range read may produce
    pub max_datapoints: i64,
    /// How far in the past a write may be, in seconds
    pub max_past_secs: i64,
    /// How far in the future a write may be, in seconds
    pub max_future_secs: i64,
    /// Period of the background bulk save in milliseconds
    pub flush_interval_ms: u64,
    /// Delimited-text export formatting
    pub csv: CsvFormat,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("fina_data"),
            min_interval: 5,
            max_gap: 1_000_000,       // ~4MB, 115 days at 10s
            max_datapoints: 3000,
            max_past_secs: 3600 * 24 * 365 * 5, // 5 years
            max_future_secs: 3600 * 48,         // 48 hours
            flush_interval_ms: 5000,
            csv: CsvFormat::default(),
        }
    }
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}

/// Where a write lands relative to the current tail
#[derive(Debug, Clone, Copy)]
struct Placement {
    meta: Metadata,
    position: i64,
    last_position: i64,
}

impl Placement {
    fn gap(&self) -> i64 {
        self.position - self.last_position - 1
    }
}

/// The fixed-interval storage engine
pub struct Engine {
    /// Configuration
    config: StorageConfig,
    /// Metadata records and their cache
    meta: MetadataStore,
    /// Sample arrays
    data: DataFile,
    /// Pending buffered samples and last-value cache
    buffer: WriteBuffer,
    /// Serializes tail placement against buffer drains
    writes: Mutex<()>,
    /// Shutdown signal for the background flush task
    shutdown: AtomicBool,
}

impl Engine {
    /// Create an engine rooted at `config.data_dir`
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            meta: MetadataStore::new(&config.data_dir),
            data: DataFile::new(&config.data_dir),
            buffer: WriteBuffer::new(),
            writes: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            config,
        })
    }

    /// Create a series. Intervals below the minimum are raised to it.
    ///
    /// An existing series is left untouched and its metadata returned.
    pub fn create(&self, id: SeriesId, interval: u32) -> StorageResult<Metadata> {
        if let Some(existing) = self.meta.read(id)? {
            tracing::debug!(series = id, "Series already exists");
            return Ok(existing);
        }

        let _writes = self.writes.lock()?;
        let interval = interval.max(self.config.min_interval);
        let meta = self.meta.create(id, interval)?;
        self.data.create(id)?;

        tracing::info!(series = id, interval, "Created series");
        Ok(meta)
    }

    /// Remove a series, its files and all cached state
    pub fn delete(&self, id: SeriesId) -> StorageResult<()> {
        if self.meta.read(id)?.is_none() {
            return Err(StorageError::NotFound(id));
        }

        let _writes = self.writes.lock()?;
        self.buffer.forget(id)?;
        self.meta.delete(id)?;
        self.data.delete(id)?;

        tracing::info!(series = id, "Deleted series");
        Ok(())
    }

    /// Metadata of a series
    pub fn metadata(&self, id: SeriesId) -> StorageResult<Metadata> {
        self.meta.read(id)?.ok_or(StorageError::NotFound(id))
    }

    /// Sample count: on-disk samples plus buffered samples
    pub fn npoints(&self, id: SeriesId) -> StorageResult<u64> {
        Ok(self.data.size_in_samples(id)? + self.buffer.buffered_samples(id)?)
    }

    /// Write one sample directly to the data file.
    ///
    /// Positions beyond the tail are reached by padding the gap according to
    /// `mode`; positions at or behind the tail are overwritten in place.
    pub fn post(
        &self,
        id: SeriesId,
        timestamp: i64,
        value: f64,
        mode: PaddingMode,
    ) -> StorageResult<f64> {
        tracing::debug!(series = id, timestamp, value, padding = %mode, "post");

        let _writes = self.writes.lock()?;
        if self.buffer.has_pending(id)? {
            self.flush_one(id)?;
        }
        self.write_direct(id, timestamp, value, mode)
    }

    /// Place and write one sample. Caller holds the write lock.
    fn write_direct(
        &self,
        id: SeriesId,
        timestamp: i64,
        value: f64,
        mode: PaddingMode,
    ) -> StorageResult<f64> {
        let placement = self.place(id, timestamp)?;
        let gap = placement.gap();
        self.check_gap(id, gap)?;

        let sample = value as f32;
        if gap > 0 {
            let last = if placement.last_position >= 0 && mode != PaddingMode::None {
                self.data.read_sample(id, placement.last_position as u64)?
            } else {
                None
            };
            let fillers = padding(mode, last, value, gap);
            self.data.write_padding_and_value(
                id,
                (placement.last_position + 1) as u64,
                &fillers,
                sample,
            )?;
        } else {
            self.data
                .write_sample(id, placement.position as u64, sample)?;
        }

        if placement.position >= placement.last_position {
            self.buffer.set_last_value(id, sample)?;
        }

        Ok(value)
    }

    /// Overwrite a sample. Pending buffers are flushed first so the position
    /// arithmetic sees everything accepted so far.
    pub fn update(&self, id: SeriesId, timestamp: i64, value: f64) -> StorageResult<f64> {
        tracing::debug!(series = id, timestamp, value, "update");

        let _writes = self.writes.lock()?;
        if self.buffer.has_pending(id)? {
            let flushed = self.save_all()?;
            tracing::info!(series = id, bytes = flushed, "Flushed buffers before update");
        }
        self.write_direct(id, timestamp, value, PaddingMode::None)
    }

    /// Queue a sample (and its padding) for the next bulk save.
    ///
    /// Arrival is assumed monotonic per series: a sample at or behind the
    /// current tail is dropped with a warning. Use `update` to back-fill.
    pub fn post_bulk_prepare(
        &self,
        id: SeriesId,
        timestamp: i64,
        value: f64,
        mode: PaddingMode,
    ) -> StorageResult<BufferOutcome> {
        tracing::debug!(series = id, timestamp, value, padding = %mode, "post_bulk_prepare");

        let _writes = self.writes.lock()?;
        let placement = self.place(id, timestamp)?;

        if placement.position <= placement.last_position {
            tracing::warn!(
                series = id,
                timestamp,
                position = placement.position,
                last_position = placement.last_position,
                interval = placement.meta.interval,
                "Buffered sample at or behind tail, nothing saved. Posting too fast?"
            );
            return Ok(BufferOutcome::Dropped {
                position: placement.position,
                last_position: placement.last_position,
            });
        }

        let gap = placement.gap();
        self.check_gap(id, gap)?;

        let sample = value as f32;
        let fillers = if gap > 0 {
            let last = match mode {
                PaddingMode::None => None,
                _ => self.cached_last_value(id)?,
            };
            padding(mode, last, value, gap)
        } else {
            Vec::new()
        };

        self.buffer.push(id, &encode_run(&fillers, sample))?;
        self.buffer.set_last_value(id, sample)?;

        Ok(BufferOutcome::Queued {
            position: placement.position,
            padding: gap.max(0),
        })
    }

    /// Append every buffered run to its data file. Returns bytes written.
    ///
    /// On failure the unwritten runs are put back and the error returned.
    pub fn post_bulk_save(&self) -> StorageResult<u64> {
        let _writes = self.writes.lock()?;
        self.save_all()
    }

    /// Append the buffered run of one series. Returns bytes written.
    pub fn flush_series(&self, id: SeriesId) -> StorageResult<u64> {
        let _writes = self.writes.lock()?;
        self.flush_one(id)
    }

    fn save_all(&self) -> StorageResult<u64> {
        let runs = self.buffer.take_all()?;
        if runs.is_empty() {
            return Ok(0);
        }

        let series = runs.len();
        let mut total = 0u64;
        let mut runs = runs.into_iter();

        while let Some((id, bytes)) = runs.next() {
            match self.data.append(id, &bytes) {
                Ok(report) => total += report.bytes,
                Err(e) => {
                    tracing::error!(series = id, error = %e, "Bulk save failed");
                    let mut unflushed = vec![(id, bytes)];
                    unflushed.extend(runs);
                    self.buffer.restore(unflushed)?;
                    return Err(e);
                }
            }
        }

        tracing::debug!(series, bytes = total, "Bulk save complete");
        Ok(total)
    }

    fn flush_one(&self, id: SeriesId) -> StorageResult<u64> {
        let Some(bytes) = self.buffer.take(id)? else {
            return Ok(0);
        };

        match self.data.append(id, &bytes) {
            Ok(report) => Ok(report.bytes),
            Err(e) => {
                self.buffer.restore(vec![(id, bytes)])?;
                Err(e)
            }
        }
    }

    /// Time and value of the last sample, buffered samples included
    pub fn lastvalue(&self, id: SeriesId) -> StorageResult<Option<LastValue>> {
        let meta = self.metadata(id)?;
        let on_disk = self.data.size_in_samples(id)?;
        let buffered = self.buffer.buffered_samples(id)?;
        let npoints = on_disk + buffered;
        if npoints == 0 {
            return Ok(None);
        }

        let value = if buffered > 0 {
            self.buffer.last_buffered(id)?
        } else {
            self.data.read_sample(id, on_disk - 1)?
        };

        Ok(value.map(|value| LastValue {
            time: meta.start_time as i64 + meta.interval as i64 * (npoints as i64 - 1),
            value,
        }))
    }

    /// Resample a time range at a fixed output interval.
    ///
    /// Returns a lazy, ordered sequence that stops once the virtual clock
    /// passes `end`. Fails with `RequestTooLarge` rather than truncating.
    pub fn get_data(&self, id: SeriesId, query: DataQuery) -> StorageResult<DataIter> {
        let start = query.start_ms / 1000;
        let end = query.end_ms / 1000;
        let mut interval = query.interval.max(1);

        let requested = point_count(start, end, interval);
        if requested > self.config.max_datapoints {
            return Err(StorageError::RequestTooLarge {
                requested,
                max: self.config.max_datapoints,
            });
        }

        let meta = self.metadata(id)?;
        let npoints = self.data.size_in_samples(id)?;

        if query.limit_interval && interval < meta.interval as i64 {
            interval = meta.interval as i64;
        }
        let remaining = point_count(start, end, interval);

        tracing::debug!(
            series = id,
            start,
            end,
            interval,
            skip_missing = query.skip_missing,
            npoints,
            start_time = meta.start_time,
            "get_data"
        );

        Ok(DataIter {
            series: id,
            reader: self.data.open_reader(id)?,
            end,
            interval,
            start_time: meta.start_time as i64,
            native_interval: meta.interval as i64,
            npoints: npoints as i64,
            skip_missing: query.skip_missing,
            next_time: Some(start),
            remaining,
        })
    }

    /// `get_data` collected into a vector
    pub fn get_data_points(&self, id: SeriesId, query: DataQuery) -> StorageResult<Vec<DataPoint>> {
        Ok(self.get_data(id, query)?.collect())
    }

    /// Stream the raw data file from a client-held byte offset.
    ///
    /// The offset is aligned down to a sample boundary and rewound by one
    /// sample, so a resuming client receives the last sample it already has
    /// again and can verify the overlap.
    pub fn export(&self, id: SeriesId, start_byte: u64) -> StorageResult<ExportReader> {
        self.metadata(id)?;

        let mut from = (start_byte / SAMPLE_SIZE) * SAMPLE_SIZE;
        if from >= SAMPLE_SIZE {
            from -= SAMPLE_SIZE;
        }

        self.data.raw_byte_range(id, from, u64::MAX)
    }

    /// Write `timestamp<sep>value` rows for `[start, end]` (unix seconds),
    /// striding over native positions to approximate one row per
    /// `out_interval`. Missing samples produce no row. Returns rows written.
    pub fn csv_export<W: Write>(
        &self,
        id: SeriesId,
        start: i64,
        end: i64,
        out_interval: i64,
        out: W,
    ) -> StorageResult<u64> {
        let meta = self.metadata(id)?;
        let native = meta.interval as i64;
        let start_time = meta.start_time as i64;
        let npoints = self.data.size_in_samples(id)? as i64;

        let out_interval = out_interval.max(native);
        let span = end.checked_sub(start).ok_or_else(out_of_range)?;
        let dp = ceil_div(span, out_interval);
        if dp < 1 {
            return Err(StorageError::Validation(
                "export range is empty, end must be after start".to_string(),
            ));
        }
        let end = dp
            .checked_mul(out_interval)
            .and_then(|len| start.checked_add(len))
            .ok_or_else(out_of_range)?;

        // Positions in range divided by rows wanted gives the stride
        let in_range = (end - start) as f64 / native as f64;
        let skip = ((in_range / dp as f64).round() as i64).max(1);

        let start_pos = if start > start_time {
            ceil_div(start - start_time, native)
        } else {
            let first = ceil_div(start_time, out_interval)
                .checked_mul(out_interval)
                .ok_or_else(out_of_range)?;
            ceil_div(first - start_time, native)
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.config.csv.field_separator)
            .has_headers(false)
            .from_writer(out);

        let mut rows = 0u64;
        let reader = if meta.is_born() {
            self.data.open_reader(id)?
        } else {
            None
        };

        if let Some(mut reader) = reader {
            let mut pos = start_pos;
            while pos < npoints {
                let time = start_time + pos * native;
                if time > end {
                    break;
                }

                match reader.read_at(pos as u64) {
                    Ok(Some(value)) if !value.is_nan() => {
                        writer.write_record([
                            time.to_string(),
                            self.config.csv.format_value(value),
                        ])?;
                        rows += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(series = id, position = pos, error = %e, "Skipping unreadable sample");
                    }
                }

                pos = pos.saturating_add(skip);
            }
        }

        writer.flush()?;
        tracing::debug!(series = id, rows, skip, "csv_export");
        Ok(rows)
    }

    /// Bytes occupied by a series: metadata record plus data file
    pub fn feed_size(&self, id: SeriesId) -> StorageResult<u64> {
        self.metadata(id)?;
        Ok(META_SIZE as u64 + self.data.byte_len(id)?)
    }

    /// Get engine statistics
    pub fn stats(&self) -> StorageResult<StorageStats> {
        let (buffered_series, buffered_bytes) = self.buffer.totals()?;
        Ok(StorageStats {
            buffered_series,
            buffered_bytes,
            cached_metadata: self.meta.cached(),
        })
    }

    /// Start background bulk-save task
    pub fn start_background_flush(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let flush_interval = Duration::from_millis(engine.config.flush_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = interval(flush_interval);

            loop {
                ticker.tick().await;

                if engine.shutdown.load(Ordering::SeqCst) {
                    break;
                }

                let pending = engine.buffer.totals().map(|(s, _)| s > 0).unwrap_or(false);
                if pending {
                    let worker = Arc::clone(&engine);
                    match tokio::task::spawn_blocking(move || worker.post_bulk_save()).await {
                        Ok(Ok(bytes)) => tracing::debug!(bytes, "Background flush"),
                        Ok(Err(e)) => tracing::error!("Background flush failed: {}", e),
                        Err(e) => tracing::error!("Background flush task panicked: {}", e),
                    }
                }
            }

            if let Err(e) = engine.post_bulk_save() {
                tracing::error!("Final flush failed: {}", e);
            }
        })
    }

    /// Stop background flushing and write out every buffer
    pub fn shutdown(&self) -> StorageResult<u64> {
        self.shutdown.store(true, Ordering::SeqCst);
        let bytes = self.post_bulk_save()?;
        tracing::info!(bytes, "Engine shut down");
        Ok(bytes)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Validate, resolve metadata, handle series birth and compute positions
    fn place(&self, id: SeriesId, timestamp: i64) -> StorageResult<Placement> {
        self.check_window(timestamp)?;

        let mut meta = self.metadata(id)?;
        let npoints = self.npoints(id)? as i64;
        let interval = meta.interval as i64;
        let aligned = align(timestamp, interval);

        if npoints == 0 && !meta.is_born() {
            let start_time = u32::try_from(aligned).map_err(|_| {
                StorageError::Validation(format!("timestamp {} does not fit a u32", aligned))
            })?;
            meta = self.meta.update_start_time(id, start_time)?;
            tracing::info!(series = id, start_time, "Series start time set");
        }

        let start_time = meta.start_time as i64;
        if aligned < start_time {
            tracing::warn!(series = id, timestamp = aligned, start_time, "Timestamp older than series start time");
            return Err(StorageError::PastTimestamp {
                timestamp: aligned,
                start_time,
            });
        }

        Ok(Placement {
            meta,
            position: position(aligned, start_time, interval),
            last_position: npoints - 1,
        })
    }

    fn check_window(&self, timestamp: i64) -> StorageResult<()> {
        let now = Utc::now().timestamp();
        let earliest = now - self.config.max_past_secs;
        let latest = now + self.config.max_future_secs;

        if timestamp < earliest || timestamp > latest {
            tracing::warn!(timestamp, earliest, latest, "Timestamp out of range");
            return Err(StorageError::Validation(format!(
                "timestamp {} outside accepted range [{}, {}]",
                timestamp, earliest, latest
            )));
        }
        Ok(())
    }

    fn check_gap(&self, id: SeriesId, gap: i64) -> StorageResult<()> {
        if gap > self.config.max_gap {
            tracing::warn!(series = id, gap, max = self.config.max_gap, "Padding max block size exceeded");
            return Err(StorageError::GapTooLarge {
                gap,
                max: self.config.max_gap,
            });
        }
        Ok(())
    }

    /// Last value for buffered padding, seeded from the tail on first use
    fn cached_last_value(&self, id: SeriesId) -> StorageResult<Option<f32>> {
        if let Some(value) = self.buffer.last_value(id)? {
            return Ok(Some(value));
        }

        let value = self.lastvalue(id)?.map(|last| last.value);
        if let Some(value) = value {
            self.buffer.set_last_value(id, value)?;
        }
        Ok(value)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.save_all() {
            tracing::error!("Flush on drop failed, buffered samples lost: {}", e);
        }
    }
}

/// Ceiling division for a positive divisor, any sign of dividend
fn ceil_div(a: i64, b: i64) -> i64 {
    let q = a.div_euclid(b);
    if a.rem_euclid(b) == 0 {
        q
    } else {
        q + 1
    }
}

/// Points a range read at `interval` visits in `[start, end]`
fn point_count(start: i64, end: i64, interval: i64) -> i64 {
    match end.checked_sub(start) {
        Some(span) if span >= 0 => span / interval + 1,
        Some(_) => 0,
        None => i64::MAX,
    }
}

fn out_of_range() -> StorageError {
    StorageError::Validation("export range out of bounds".to_string())
}

/// Lazy range read produced by [`Engine::get_data`]
pub struct DataIter {
    series: SeriesId,
    reader: Option<SampleReader>,
    end: i64,
    interval: i64,
    start_time: i64,
    native_interval: i64,
    npoints: i64,
    skip_missing: bool,
    next_time: Option<i64>,
    remaining: i64,
}

impl DataIter {
    fn sample_at(&mut self, time: i64) -> Option<f32> {
        let pos = nearest_position(time, self.start_time, self.native_interval);
        if pos < 0 || pos >= self.npoints {
            return None;
        }

        let reader = self.reader.as_mut()?;
        match reader.read_at(pos as u64) {
            Ok(Some(value)) if !value.is_nan() => Some(value),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(series = self.series, position = pos, error = %e, "Read failed, treating sample as missing");
                None
            }
        }
    }
}

impl Iterator for DataIter {
    type Item = DataPoint;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining <= 0 {
                return None;
            }
            let time = self.next_time?;
            if time > self.end {
                return None;
            }
            self.remaining -= 1;
            self.next_time = time.checked_add(self.interval);

            let value = self.sample_at(time);
            if value.is_none() && self.skip_missing {
                continue;
            }

            return Some(DataPoint {
                time: time * 1000,
                value,
            });
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub buffered_series: usize,
    pub buffered_bytes: u64,
    pub cached_metadata: usize,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Buffered series: {}, Buffered: {:.2} KB, Cached metadata: {}",
            self.buffered_series,
            self.buffered_bytes as f64 / 1024.0,
            self.cached_metadata
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let engine = Engine::new(StorageConfig::new(dir.path())).unwrap();
        (engine, dir)
    }

    /// An hour-aligned timestamp one day in the past
    fn base_time() -> i64 {
        let now = Utc::now().timestamp();
        now - now % 3600 - 86_400
    }

    fn samples(engine: &Engine, id: SeriesId) -> Vec<f32> {
        let bytes = std::fs::read(engine.data_dir().join(format!("{}.dat", id))).unwrap();
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_create_clamps_interval() {
        let (engine, _dir) = create_test_engine();
        let meta = engine.create(1, 2).unwrap();
        assert_eq!(meta.interval, 5);
        assert_eq!(meta.start_time, 0);
        assert_eq!(engine.feed_size(1).unwrap(), 16);
    }

    #[test]
    fn test_create_existing_keeps_interval() {
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        let meta = engine.create(1, 60).unwrap();
        assert_eq!(meta.interval, 10);
    }

    #[test]
    fn test_post_unknown_series() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        let result = engine.post(9, t0, 1.0, PaddingMode::None);
        assert!(matches!(result, Err(StorageError::NotFound(9))));
    }

    #[test]
    fn test_post_outside_window() {
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        let now = Utc::now().timestamp();
        let too_old = now - 6 * 365 * 24 * 3600;
        let too_new = now + 72 * 3600;

        assert!(matches!(
            engine.post(1, too_old, 1.0, PaddingMode::None),
            Err(StorageError::Validation(_))
        ));
        assert!(matches!(
            engine.post(1, too_new, 1.0, PaddingMode::None),
            Err(StorageError::Validation(_))
        ));
        assert_eq!(engine.metadata(1).unwrap().start_time, 0);
    }

    #[test]
    fn test_first_post_sets_aligned_start_time() {
        let t0 = base_time();
        let (engine, dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0 + 7, 1.0, PaddingMode::None).unwrap();

        assert_eq!(engine.metadata(1).unwrap().start_time as i64, t0);

        // Persisted, not just cached
        let reopened = Engine::new(StorageConfig::new(dir.path())).unwrap();
        assert_eq!(reopened.metadata(1).unwrap().start_time as i64, t0);
    }

    #[test]
    fn test_flat_padding_scenario() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 35, 2.0, PaddingMode::Flat).unwrap();

        assert_eq!(samples(&engine, 1), vec![1.0, 1.0, 1.0, 2.0]);
    }

    #[test]
    fn test_join_padding_ramps() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        engine.post(1, t0, 0.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 40, 4.0, PaddingMode::Join).unwrap();

        assert_eq!(samples(&engine, 1), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_no_padding_fills_nan() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 30, 2.0, PaddingMode::None).unwrap();

        let values = samples(&engine, 1);
        assert_eq!(values.len(), 4);
        assert!(values[1].is_nan() && values[2].is_nan());
        assert_eq!(values[3], 2.0);
    }

    #[test]
    fn test_past_timestamp_rejected() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();

        let result = engine.post(1, t0 - 10, 2.0, PaddingMode::None);
        assert!(matches!(result, Err(StorageError::PastTimestamp { .. })));
        assert_eq!(samples(&engine, 1), vec![1.0]);
    }

    #[test]
    fn test_update_in_place_keeps_length() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        for i in 0..4 {
            engine.post(1, t0 + i * 10, i as f64, PaddingMode::None).unwrap();
        }

        engine.update(1, t0 + 12, 7.5).unwrap();
        assert_eq!(samples(&engine, 1), vec![0.0, 7.5, 2.0, 3.0]);

        let before = std::fs::read(engine.data_dir().join("1.dat")).unwrap();
        engine.post(1, t0 + 10, 7.5, PaddingMode::None).unwrap();
        let after = std::fs::read(engine.data_dir().join("1.dat")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_gap_too_large() {
        let t0 = base_time();
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            max_gap: 10,
            ..StorageConfig::new(dir.path())
        };
        let engine = Engine::new(config).unwrap();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();

        let result = engine.post(1, t0 + 12 * 10, 2.0, PaddingMode::None);
        assert!(matches!(
            result,
            Err(StorageError::GapTooLarge { gap: 11, max: 10 })
        ));
        assert_eq!(engine.npoints(1).unwrap(), 1);

        // Exactly at the cap is fine
        engine.post(1, t0 + 11 * 10, 2.0, PaddingMode::None).unwrap();
        assert_eq!(engine.npoints(1).unwrap(), 12);
    }

    #[test]
    fn test_get_data_round_trip() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.25, PaddingMode::None).unwrap();
        engine.post(1, t0 + 13, 2.5, PaddingMode::None).unwrap();

        let query = DataQuery::new((t0 + 10) * 1000, (t0 + 10) * 1000, 10);
        let points = engine.get_data_points(1, query).unwrap();
        assert_eq!(
            points,
            vec![DataPoint {
                time: (t0 + 10) * 1000,
                value: Some(2.5)
            }]
        );
    }

    #[test]
    fn test_get_data_skip_missing_omits_gap() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 20, 3.0, PaddingMode::None).unwrap();

        let query = DataQuery::new(t0 * 1000, (t0 + 20) * 1000, 10);

        let all = engine.get_data_points(1, query).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].value, None);

        let present = engine.get_data_points(1, query.skip_missing(true)).unwrap();
        assert_eq!(present.len(), 2);
        assert_eq!(present[0].value, Some(1.0));
        assert_eq!(present[1].time, (t0 + 20) * 1000);
    }

    #[test]
    fn test_get_data_rejects_large_requests() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        let at_cap = DataQuery::new(t0 * 1000, (t0 + 29_990) * 1000, 10);
        assert_eq!(engine.get_data(1, at_cap).unwrap().count(), 3000);

        let over = DataQuery::new(t0 * 1000, (t0 + 30_000) * 1000, 10);
        assert!(matches!(
            engine.get_data(1, over),
            Err(StorageError::RequestTooLarge { requested: 3001, max: 3000 })
        ));
    }

    #[test]
    fn test_get_data_limit_interval() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        for i in 0..6 {
            engine.post(1, t0 + i * 10, i as f64, PaddingMode::None).unwrap();
        }

        let query = DataQuery::new(t0 * 1000, (t0 + 50) * 1000, 1);
        assert_eq!(engine.get_data(1, query).unwrap().count(), 51);

        let limited = engine.get_data_points(1, query.limit_interval(true)).unwrap();
        assert_eq!(limited.len(), 6);
        assert_eq!(limited[5].value, Some(5.0));
    }

    #[test]
    fn test_get_data_unknown_series() {
        let (engine, _dir) = create_test_engine();
        let query = DataQuery::new(0, 10_000, 10);
        assert!(matches!(
            engine.get_data(3, query),
            Err(StorageError::NotFound(3))
        ));
    }

    #[test]
    fn test_get_data_huge_interval_stops() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();

        let query = DataQuery::new(t0 * 1000, (t0 + 10) * 1000, i64::MAX);
        let points: Vec<_> = engine.get_data(1, query).unwrap().take(10).collect();
        assert_eq!(
            points,
            vec![DataPoint {
                time: t0 * 1000,
                value: Some(1.0),
            }]
        );

        let widest = DataQuery::new(i64::MIN, i64::MAX, i64::MAX);
        assert_eq!(engine.get_data(1, widest).unwrap().take(10).count(), 1);
    }

    #[test]
    fn test_buffered_matches_direct() {
        let t0 = base_time();
        let (direct, _d1) = create_test_engine();
        let (buffered, _d2) = create_test_engine();
        direct.create(1, 10).unwrap();
        buffered.create(1, 10).unwrap();

        let writes = [
            (t0, 1.0, PaddingMode::None),
            (t0 + 10, 2.0, PaddingMode::None),
            (t0 + 50, 6.0, PaddingMode::Join),
            (t0 + 80, 9.0, PaddingMode::Flat),
            (t0 + 120, 1.0, PaddingMode::None),
            (t0 + 150, 4.0, PaddingMode::Join),
        ];

        for (ts, value, mode) in writes {
            direct.post(1, ts, value, mode).unwrap();
            let outcome = buffered.post_bulk_prepare(1, ts, value, mode).unwrap();
            assert!(matches!(outcome, BufferOutcome::Queued { .. }));
        }

        assert_eq!(buffered.npoints(1).unwrap(), 16);
        let written = buffered.post_bulk_save().unwrap();
        assert_eq!(written, 16 * 4);

        let a = std::fs::read(direct.data_dir().join("1.dat")).unwrap();
        let b = std::fs::read(buffered.data_dir().join("1.dat")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_buffered_join_after_flush_uses_cached_tail() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        engine.post_bulk_prepare(1, t0, 0.0, PaddingMode::None).unwrap();
        engine.post_bulk_save().unwrap();
        engine
            .post_bulk_prepare(1, t0 + 30, 3.0, PaddingMode::Join)
            .unwrap();
        engine.post_bulk_save().unwrap();

        assert_eq!(samples(&engine, 1), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_buffered_late_sample_dropped() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        engine.post_bulk_prepare(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post_bulk_prepare(1, t0 + 10, 2.0, PaddingMode::None).unwrap();
        let outcome = engine
            .post_bulk_prepare(1, t0 + 14, 3.0, PaddingMode::None)
            .unwrap();

        assert_eq!(
            outcome,
            BufferOutcome::Dropped {
                position: 1,
                last_position: 1
            }
        );
        engine.post_bulk_save().unwrap();
        assert_eq!(samples(&engine, 1), vec![1.0, 2.0]);
    }

    #[test]
    fn test_concurrent_flush_keeps_positions() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        let engine = Arc::new(engine);
        let stop = Arc::new(AtomicBool::new(false));
        let flusher = {
            let engine = Arc::clone(&engine);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    engine.post_bulk_save().unwrap();
                }
            })
        };

        for i in 0..5000i64 {
            let outcome = engine
                .post_bulk_prepare(1, t0 + i * 10, i as f64, PaddingMode::None)
                .unwrap();
            assert_eq!(
                outcome,
                BufferOutcome::Queued {
                    position: i,
                    padding: 0,
                }
            );
        }

        stop.store(true, Ordering::SeqCst);
        flusher.join().unwrap();
        engine.post_bulk_save().unwrap();

        let stored = samples(&engine, 1);
        assert_eq!(stored.len(), 5000);
        for (i, value) in stored.iter().enumerate() {
            assert_eq!(*value, i as f32);
        }
    }

    #[test]
    fn test_npoints_and_lastvalue_include_buffer() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        assert_eq!(engine.lastvalue(1).unwrap(), None);

        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post_bulk_prepare(1, t0 + 20, 5.0, PaddingMode::None).unwrap();

        assert_eq!(engine.npoints(1).unwrap(), 3);
        assert_eq!(engine.feed_size(1).unwrap(), 16 + 4);
        assert_eq!(
            engine.lastvalue(1).unwrap(),
            Some(LastValue {
                time: t0 + 20,
                value: 5.0
            })
        );
    }

    #[test]
    fn test_update_flushes_buffer_first() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();

        engine.post_bulk_prepare(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post_bulk_prepare(1, t0 + 10, 2.0, PaddingMode::None).unwrap();
        engine.update(1, t0, 9.0).unwrap();

        assert_eq!(engine.stats().unwrap().buffered_bytes, 0);
        assert_eq!(samples(&engine, 1), vec![9.0, 2.0]);
    }

    #[test]
    fn test_bulk_save_repairs_partial_tail() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();

        let path = engine.data_dir().join("1.dat");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0x01, 0x02]);
        std::fs::write(&path, bytes).unwrap();

        engine.post_bulk_prepare(1, t0 + 10, 2.0, PaddingMode::None).unwrap();
        assert_eq!(engine.post_bulk_save().unwrap(), 4);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);
        assert_eq!(samples(&engine, 1), vec![1.0, 2.0]);
    }

    #[test]
    fn test_export_rewinds_one_sample() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        for i in 0..3 {
            engine.post(1, t0 + i * 10, i as f64, PaddingMode::None).unwrap();
        }

        let mut out = Vec::new();
        engine.export(1, 0).unwrap().copy_to(&mut out).unwrap();
        assert_eq!(out.len(), 12);

        let mut out = Vec::new();
        engine.export(1, 8).unwrap().copy_to(&mut out).unwrap();
        assert_eq!(out, [1.0f32.to_le_bytes(), 2.0f32.to_le_bytes()].concat());

        let mut out = Vec::new();
        engine.export(1, 6).unwrap().copy_to(&mut out).unwrap();
        assert_eq!(out.len(), 12);

        assert!(engine.export(1, 100).unwrap().next().is_none());
    }

    #[test]
    fn test_csv_export_omits_missing() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 10, 2.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 30, 4.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 40, 5.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 50, 6.0, PaddingMode::None).unwrap();

        let mut out = Vec::new();
        let rows = engine.csv_export(1, t0, t0 + 50, 10, &mut out).unwrap();
        assert_eq!(rows, 5);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("{},1.00", t0));
        assert_eq!(lines[2], format!("{},4.00", t0 + 30));
        assert!(!text.contains("NaN"));
    }

    #[test]
    fn test_csv_export_strides() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 10, 2.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 30, 4.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 40, 5.0, PaddingMode::None).unwrap();
        engine.post(1, t0 + 50, 6.0, PaddingMode::None).unwrap();

        let mut out = Vec::new();
        let rows = engine.csv_export(1, t0, t0 + 50, 20, &mut out).unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, format!("{},1.00\n{},5.00\n", t0, t0 + 40));
    }

    #[test]
    fn test_csv_export_custom_format() {
        let t0 = base_time();
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            csv: CsvFormat {
                field_separator: b';',
                decimal_places: 3,
                decimal_separator: ',',
            },
            ..StorageConfig::new(dir.path())
        };
        let engine = Engine::new(config).unwrap();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 2.5, PaddingMode::None).unwrap();

        let mut out = Vec::new();
        engine.csv_export(1, t0, t0 + 10, 10, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("{};2,500\n", t0));
    }

    #[test]
    fn test_csv_export_empty_range() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        let result = engine.csv_export(1, t0, t0, 10, Vec::new());
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_csv_export_extreme_bounds_rejected() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();

        let result = engine.csv_export(1, i64::MIN, i64::MAX, 10, Vec::new());
        assert!(matches!(result, Err(StorageError::Validation(_))));

        let result = engine.csv_export(1, t0, i64::MAX, i64::MAX, Vec::new());
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_csv_value_rounds_half_away_from_zero() {
        let format = CsvFormat::default();
        assert_eq!(format.format_value(0.125), "0.13");
        assert_eq!(format.format_value(-0.125), "-0.13");
        assert_eq!(format.format_value(2.5), "2.50");

        let whole = CsvFormat {
            decimal_places: 0,
            ..CsvFormat::default()
        };
        assert_eq!(whole.format_value(0.5), "1");
        assert_eq!(whole.format_value(2.5), "3");
    }

    #[test]
    fn test_delete_removes_everything() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post(1, t0, 1.0, PaddingMode::None).unwrap();
        engine.post_bulk_prepare(1, t0 + 10, 2.0, PaddingMode::None).unwrap();

        engine.delete(1).unwrap();

        assert!(!engine.data_dir().join("1.meta").exists());
        assert!(!engine.data_dir().join("1.dat").exists());
        assert_eq!(engine.stats().unwrap().buffered_bytes, 0);
        assert!(matches!(engine.delete(1), Err(StorageError::NotFound(1))));
        assert!(matches!(
            engine.post(1, t0, 1.0, PaddingMode::None),
            Err(StorageError::NotFound(1))
        ));

        // Recreated series starts fresh
        engine.create(1, 30).unwrap();
        assert_eq!(engine.metadata(1).unwrap(), Metadata::new(30));
    }

    #[test]
    fn test_shutdown_flushes() {
        let t0 = base_time();
        let (engine, _dir) = create_test_engine();
        engine.create(1, 10).unwrap();
        engine.post_bulk_prepare(1, t0, 1.0, PaddingMode::None).unwrap();

        assert_eq!(engine.shutdown().unwrap(), 4);
        assert_eq!(samples(&engine, 1), vec![1.0]);
    }

    #[test]
    fn test_drop_flushes() {
        let t0 = base_time();
        let dir = tempdir().unwrap();
        {
            let engine = Engine::new(StorageConfig::new(dir.path())).unwrap();
            engine.create(1, 10).unwrap();
            engine.post_bulk_prepare(1, t0, 1.0, PaddingMode::None).unwrap();
        }
        let engine = Engine::new(StorageConfig::new(dir.path())).unwrap();
        assert_eq!(engine.npoints(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_background_flush() {
        let t0 = base_time();
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            flush_interval_ms: 10,
            ..StorageConfig::new(dir.path())
        };
        let engine = Arc::new(Engine::new(config).unwrap());
        engine.create(1, 10).unwrap();
        engine.post_bulk_prepare(1, t0, 1.0, PaddingMode::None).unwrap();

        let handle = engine.start_background_flush();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.stats().unwrap().buffered_bytes, 0);
        assert_eq!(engine.data.size_in_samples(1).unwrap(), 1);

        engine.shutdown().unwrap();
        handle.await.unwrap();
    }
}
