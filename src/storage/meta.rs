//! Metadata store
//!
//! One 16-byte record per series (`<id>.meta`) holding the sampling interval
//! and start time. Parsed records are cached for the lifetime of the store
//! and evicted on delete.
//!
//! Record writes take an exclusive advisory lock on the file; a concurrent
//! writer fails fast with `LockContention` instead of blocking.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Metadata, SeriesId, META_SIZE};
use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Reads, writes and caches series metadata records
#[derive(Debug)]
pub struct MetadataStore {
    dir: PathBuf,
    cache: RwLock<HashMap<SeriesId, Metadata>>,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Path of the metadata record for a series
    pub fn path(&self, id: SeriesId) -> PathBuf {
        self.dir.join(format!("{}.meta", id))
    }

    pub fn exists(&self, id: SeriesId) -> bool {
        self.path(id).exists()
    }

    /// Write a fresh record with `start_time = 0`.
    ///
    /// An existing record is left untouched and returned as-is.
    pub fn create(&self, id: SeriesId, interval: u32) -> StorageResult<Metadata> {
        if let Some(existing) = self.read(id)? {
            return Ok(existing);
        }

        let meta = Metadata::new(interval);
        self.write_record(id, &meta)?;
        self.cache.write()?.insert(id, meta);
        Ok(meta)
    }

    /// Load a record, serving repeated reads from the cache
    pub fn read(&self, id: SeriesId) -> StorageResult<Option<Metadata>> {
        let path = self.path(id);
        if !path.exists() {
            self.cache.write()?.remove(&id);
            return Ok(None);
        }

        if let Some(meta) = self.cache.read()?.get(&id) {
            return Ok(Some(*meta));
        }

        let meta = read_record(&path)?;
        self.cache.write()?.insert(id, meta);
        Ok(Some(meta))
    }

    /// Persist the start time set by the first accepted write
    pub fn update_start_time(&self, id: SeriesId, start_time: u32) -> StorageResult<Metadata> {
        let mut meta = self.read(id)?.ok_or(StorageError::NotFound(id))?;
        meta.start_time = start_time;
        self.write_record(id, &meta)?;
        self.cache.write()?.insert(id, meta);
        Ok(meta)
    }

    /// Remove the record and its cache entry. Returns false if there was none.
    pub fn delete(&self, id: SeriesId) -> StorageResult<bool> {
        self.cache.write()?.remove(&id);
        match std::fs::remove_file(self.path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of cached records
    pub fn cached(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    fn write_record(&self, id: SeriesId, meta: &Metadata) -> StorageResult<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path(id))?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            tracing::error!(series = id, error = %e, "Metadata file is locked");
            return Err(if e.kind() == ErrorKind::WouldBlock {
                StorageError::LockContention(id)
            } else {
                StorageError::Io(e)
            });
        }

        let written = write_locked(&mut file, meta);
        FileExt::unlock(&file)?;
        written
    }
}

fn write_locked(file: &mut File, meta: &Metadata) -> StorageResult<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&meta.to_bytes())?;
    file.set_len(META_SIZE as u64)?;
    file.flush()?;
    Ok(())
}

fn read_record(path: &Path) -> StorageResult<Metadata> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; META_SIZE];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            StorageError::Corruption(format!("metadata record {:?} is truncated", path))
        }
        _ => StorageError::Io(e),
    })?;
    Metadata::from_bytes(&buf)
}
