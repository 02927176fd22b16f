//! Burrow - Alopex profile sample chunk storage
//!
//! This crate provides the storage core for continuous profiling data:
//! per-time-bucket sample counts encoded into compact append-only chunks and
//! read back as dense, range selected sequences.
//!
//! # Components
//!
//! - [`Chunk`]: XOR and delta chunk encodings with exclusive appenders
//! - [`MultiChunkIterator`]: several chunks read as one zero-filled sequence
//! - [`TimestampChunks`]: time range to chunk resolution
//! - [`MemSeries`]: `(timestamp, value)` series over rolling chunks
//! - [`metastore`]: stacktrace metadata store boundary
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_burrow::chunkenc::{Chunk, Encoding, SampleIterator};
//! use alopex_burrow::storage::TimestampChunks;
//!
//! let chunk = Chunk::new(Encoding::Xor);
//! let mut app = chunk.appender()?;
//! app.append_at(3, 17)?;
//!
//! let directory = TimestampChunks::new();
//! directory.append(chunk, 1_000, 1_030);
//!
//! let mut it = directory.iterator(1_000, 2_000);
//! while it.next() {
//!     let count = it.at();
//! }
//! ```

#![deny(missing_docs)]

pub mod chunkenc;
pub mod error;
pub mod metastore;
pub mod storage;

pub use chunkenc::{Appender, Chunk, ChunkIterator, Encoding, SampleIterator, CAPACITY};
pub use error::{Result, StorageError};
pub use storage::{MemSeries, MultiChunkIterator, SeriesConfig, TimestampChunk, TimestampChunks};
