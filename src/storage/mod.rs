//! Fina Storage Engine
//!
//! This module provides fixed-interval time-series storage:
//!
//! - **types**: Core data structures (Metadata, PaddingMode, DataPoint, DataQuery)
//! - **position**: Timestamp to array position arithmetic and gap padding
//! - **meta**: 16-byte per-series metadata records with a cache
//! - **datafile**: Flat sample arrays, one per series
//! - **buffer**: In-memory write buffer for bulk ingestion
//! - **engine**: Engine facade orchestrating all components
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Direct write:
//!   (time, value) → Validate → Metadata → Position → Pad + Write
//!
//! Buffered write:
//!   (time, value) → Validate → Position → Pad into Buffer → Bulk Append
//!
//! Read Path:
//!   Range → Step virtual clock → Nearest position → Seek + Decode
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use fina::storage::{DataQuery, Engine, PaddingMode, StorageConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(StorageConfig::new("./data"))?;
//!
//!     engine.create(1, 10)?;
//!     engine.post(1, 1_700_000_000, 21.5, PaddingMode::None)?;
//!     engine.post(1, 1_700_000_040, 22.5, PaddingMode::Join)?;
//!
//!     let query = DataQuery::new(1_700_000_000_000, 1_700_000_060_000, 10);
//!     for point in engine.get_data(1, query)? {
//!         println!("{} {:?}", point.time, point.value);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod datafile;
pub mod engine;
pub mod error;
pub mod meta;
pub mod position;
pub mod types;

// Re-export commonly used types
pub use buffer::WriteBuffer;
pub use datafile::{AppendReport, DataFile, ExportReader, SampleReader, EXPORT_CHUNK_SIZE};
pub use engine::{CsvFormat, DataIter, Engine, StorageConfig, StorageStats};
pub use error::{StorageError, StorageResult};
pub use meta::MetadataStore;
pub use types::{
    BufferOutcome, DataPoint, DataQuery, LastValue, Metadata, PaddingMode, SeriesId, META_SIZE,
    SAMPLE_SIZE,
};
