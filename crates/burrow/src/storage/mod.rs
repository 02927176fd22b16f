//! Chunk composition and time indexing.
//!
//! - [`MultiChunkIterator`]: reads a list of chunks as one dense sequence
//! - [`TimestampChunks`]: resolves a time range to the chunks overlapping it
//! - [`MemSeries`]: writes `(timestamp, value)` samples into rolling chunk
//!   pairs and reads time ranges back
//!
//! The query path resolves chunks on the directory and feeds them to a
//! multi-chunk iterator:
//!
//! ```text
//! TimestampChunks::index_range → chunks → MultiChunkIterator → dense values
//! ```

pub mod multi;
pub mod series;
pub mod timestamps;

pub use multi::MultiChunkIterator;
pub use series::{MemSeries, SeriesConfig, SeriesIterator};
pub use timestamps::{TimestampChunk, TimestampChunks};
