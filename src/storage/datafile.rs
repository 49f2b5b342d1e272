//! Data file format for fina storage
//!
//! Each series owns one flat array of fixed-width samples (`<id>.dat`):
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬─────┬──────────────┐
//! │ sample 0 │ sample 1 │ sample 2 │ ... │ sample N-1   │
//! │ f32 LE   │ f32 LE   │ f32 LE   │     │ f32 LE       │
//! └──────────┴──────────┴──────────┴─────┴──────────────┘
//! ```
//!
//! No header, no delimiters: sample `p` lives at byte `p * 4`. Slots without
//! data hold NaN. The byte length is expected to be a multiple of 4; a
//! trailing partial sample is repaired by the next append.

use crate::storage::error::StorageResult;
use crate::storage::position::encode_run;
use crate::storage::types::{decode_sample, encode_sample, SeriesId, SAMPLE_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Chunk size for raw exports
pub const EXPORT_CHUNK_SIZE: usize = 8192;

/// Outcome of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    /// Bytes appended
    pub bytes: u64,
    /// Whether a trailing partial sample was cut off first
    pub repaired: bool,
}

/// Sample array files of all series under one directory
#[derive(Debug, Clone)]
pub struct DataFile {
    dir: PathBuf,
}

impl DataFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the sample array for a series
    pub fn path(&self, id: SeriesId) -> PathBuf {
        self.dir.join(format!("{}.dat", id))
    }

    /// Create an empty data file if none exists
    pub fn create(&self, id: SeriesId) -> StorageResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path(id))?;
        Ok(())
    }

    /// On-disk byte length, 0 when the file does not exist
    pub fn byte_len(&self, id: SeriesId) -> StorageResult<u64> {
        match std::fs::metadata(self.path(id)) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of whole samples on disk
    pub fn size_in_samples(&self, id: SeriesId) -> StorageResult<u64> {
        Ok(self.byte_len(id)? / SAMPLE_SIZE)
    }

    /// Decode the sample at `position`; `None` past the end of the file.
    /// NaN is returned as-is.
    pub fn read_sample(&self, id: SeriesId, position: u64) -> StorageResult<Option<f32>> {
        match self.open_reader(id)? {
            Some(mut reader) => Ok(reader.read_at(position)?),
            None => Ok(None),
        }
    }

    /// Open a reusable positional reader, `None` if the file does not exist
    pub fn open_reader(&self, id: SeriesId) -> StorageResult<Option<SampleReader>> {
        match File::open(self.path(id)) {
            Ok(file) => Ok(Some(SampleReader { file })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite (or extend to) a single slot
    pub fn write_sample(&self, id: SeriesId, position: u64, value: f32) -> StorageResult<()> {
        self.write_at(id, position, &encode_sample(value))
    }

    /// Write fillers plus the new sample as one contiguous run from `from`
    pub fn write_padding_and_value(
        &self,
        id: SeriesId,
        from: u64,
        fillers: &[f32],
        value: f32,
    ) -> StorageResult<()> {
        self.write_at(id, from, &encode_run(fillers, value))
    }

    /// Append encoded samples at the end of the file.
    ///
    /// A trailing partial sample left by an interrupted write is truncated
    /// away first so the appended run starts on a sample boundary.
    pub fn append(&self, id: SeriesId, bytes: &[u8]) -> StorageResult<AppendReport> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path(id))?;

        let len = file.metadata()?.len();
        let whole = (len / SAMPLE_SIZE) * SAMPLE_SIZE;
        let repaired = whole != len;
        if repaired {
            tracing::warn!(
                series = id,
                length = len,
                truncated_to = whole,
                "Fixed data file with incorrect length"
            );
            file.set_len(whole)?;
        }

        file.seek(SeekFrom::Start(whole))?;
        file.write_all(bytes)?;
        file.flush()?;

        Ok(AppendReport {
            bytes: bytes.len() as u64,
            repaired,
        })
    }

    /// Stream `[start_byte, end_byte)` in bounded chunks.
    /// `end_byte` is clamped to the file length.
    pub fn raw_byte_range(
        &self,
        id: SeriesId,
        start_byte: u64,
        end_byte: u64,
    ) -> StorageResult<ExportReader> {
        let mut file = File::open(self.path(id))?;
        let len = file.metadata()?.len();
        let end = end_byte.min(len);
        let start = start_byte.min(end);
        file.seek(SeekFrom::Start(start))?;

        Ok(ExportReader {
            file,
            remaining: end - start,
            chunk_size: EXPORT_CHUNK_SIZE,
        })
    }

    /// Remove the data file. Returns false if there was none.
    pub fn delete(&self, id: SeriesId) -> StorageResult<bool> {
        match std::fs::remove_file(self.path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn write_at(&self, id: SeriesId, position: u64, bytes: &[u8]) -> StorageResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.path(id))?;

        file.seek(SeekFrom::Start(position * SAMPLE_SIZE))?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }
}

/// Positional sample reader over one open data file
#[derive(Debug)]
pub struct SampleReader {
    file: File,
}

impl SampleReader {
    /// Decode the sample at `position`, `None` past end of file
    pub fn read_at(&mut self, position: u64) -> std::io::Result<Option<f32>> {
        self.file.seek(SeekFrom::Start(position * SAMPLE_SIZE))?;
        let mut buf = [0u8; 4];
        match self.file.read_exact(&mut buf) {
            Ok(()) => Ok(Some(decode_sample(buf))),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Bounded-chunk sequential reader used by raw exports
#[derive(Debug)]
pub struct ExportReader {
    file: File,
    remaining: u64,
    chunk_size: usize,
}

impl ExportReader {
    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Copy everything left into `out`, chunk by chunk
    pub fn copy_to<W: Write>(self, out: &mut W) -> std::io::Result<u64> {
        let mut total = 0u64;
        for chunk in self {
            let chunk = chunk?;
            out.write_all(&chunk)?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }
}

impl Iterator for ExportReader {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let size = (self.chunk_size as u64).min(self.remaining) as usize;
        let mut buf = vec![0u8; size];
        match self.file.read_exact(&mut buf) {
            Ok(()) => {
                self.remaining -= size as u64;
                Some(Ok(buf))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
