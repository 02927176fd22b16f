//! In-memory sample series built from timestamp and value chunks.
//!
//! A [`MemSeries`] keeps two parallel chunk lists: delta encoded timestamp
//! chunks, indexed by a [`TimestampChunks`] directory, and value chunks. The
//! n-th timestamp chunk and the n-th value chunk always cover the same
//! samples, so a time range resolved on the directory selects the value
//! chunks by index.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_burrow::storage::{MemSeries, SeriesConfig};
//!
//! let mut series = MemSeries::new(SeriesConfig::default())?;
//! series.append(1_000, 3)?;
//! series.append(2_000, 5)?;
//!
//! for sample in series.iterator(0, 1_500) {
//!     let (ts, value) = sample?;
//! }
//! ```

use std::ops::Range;

use tracing::debug;

use crate::chunkenc::{Appender, Chunk, Encoding, SampleIterator, CAPACITY};
use crate::error::{Result, StorageError};
use crate::storage::{MultiChunkIterator, TimestampChunk, TimestampChunks};

/// Default number of samples written to a chunk pair before rolling over.
pub const DEFAULT_SAMPLES_PER_CHUNK: usize = CAPACITY;

/// Default encoding of value chunks.
pub const DEFAULT_VALUE_ENCODING: Encoding = Encoding::Xor;

/// Configuration for a [`MemSeries`].
#[derive(Debug, Clone)]
pub struct SeriesConfig {
    /// Encoding used for value chunks.
    ///
    /// Timestamp chunks are always delta encoded. Default: XOR.
    pub value_encoding: Encoding,

    /// Number of samples per chunk before a new chunk pair is cut.
    ///
    /// Must be between 1 and [`CAPACITY`]. Default: [`CAPACITY`].
    pub samples_per_chunk: usize,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            value_encoding: DEFAULT_VALUE_ENCODING,
            samples_per_chunk: DEFAULT_SAMPLES_PER_CHUNK,
        }
    }
}

impl SeriesConfig {
    /// Creates a new configuration with a custom value encoding.
    pub fn with_value_encoding(mut self, encoding: Encoding) -> Self {
        self.value_encoding = encoding;
        self
    }

    /// Creates a new configuration with a custom rollover threshold.
    pub fn with_samples_per_chunk(mut self, samples: usize) -> Self {
        self.samples_per_chunk = samples;
        self
    }

    /// Checks that the configuration values are in range.
    pub fn validate(&self) -> Result<()> {
        if self.samples_per_chunk == 0 || self.samples_per_chunk > CAPACITY {
            return Err(StorageError::InvalidConfig(format!(
                "samples_per_chunk must be in 1..={}, got {}",
                CAPACITY, self.samples_per_chunk
            )));
        }
        Ok(())
    }
}

/// Appenders of the chunk pair currently receiving writes.
#[derive(Debug)]
struct HeadChunk {
    timestamps: Appender,
    values: Appender,
    samples: usize,
}

/// A single series of `(timestamp, value)` samples held in memory.
#[derive(Debug)]
pub struct MemSeries {
    config: SeriesConfig,
    timestamps: TimestampChunks,
    values: Vec<Chunk>,
    head: Option<HeadChunk>,
    last_timestamp: Option<i64>,
    num_samples: usize,
}

impl MemSeries {
    /// Creates an empty series.
    pub fn new(config: SeriesConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            timestamps: TimestampChunks::new(),
            values: Vec::new(),
            head: None,
            last_timestamp: None,
            num_samples: 0,
        })
    }

    /// Returns the series configuration.
    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    /// Returns a copy of the timestamp chunk directory entries.
    pub fn timestamp_chunks(&self) -> Vec<TimestampChunk> {
        self.timestamps.entries_snapshot()
    }

    /// Returns the index bounds of the chunk pairs overlapping `[mint, maxt]`.
    pub fn index_range(&self, mint: i64, maxt: i64) -> Range<usize> {
        self.timestamps.index_range(mint, maxt)
    }

    /// Returns the value chunks, parallel to
    /// [`timestamp_chunks`](Self::timestamp_chunks).
    pub fn value_chunks(&self) -> &[Chunk] {
        &self.values
    }

    /// Returns the total number of samples.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Appends a sample. Timestamps must be strictly increasing.
    pub fn append(&mut self, timestamp: i64, value: i64) -> Result<()> {
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                return Err(StorageError::TimestampOutOfOrder { timestamp, last });
            }
        }

        let mut head = match self.head.take() {
            Some(head) if head.samples < self.config.samples_per_chunk => head,
            _ => self.cut_chunk(timestamp)?,
        };
        // The value goes first so a visible timestamp always has its value.
        let appended = head
            .values
            .append(value)
            .and_then(|_| head.timestamps.append(timestamp));
        if appended.is_ok() {
            head.samples += 1;
        }
        self.head = Some(head);
        appended?;

        self.timestamps.set_head_max_time(timestamp);
        self.last_timestamp = Some(timestamp);
        self.num_samples += 1;
        Ok(())
    }

    fn cut_chunk(&mut self, min_time: i64) -> Result<HeadChunk> {
        let timestamps = Chunk::new(Encoding::Delta);
        let values = Chunk::new(self.config.value_encoding);
        let head = HeadChunk {
            timestamps: timestamps.appender()?,
            values: values.appender()?,
            samples: 0,
        };

        self.timestamps.append(timestamps, min_time, min_time);
        self.values.push(values);
        debug!(
            "Cut chunk {} of series at timestamp {}",
            self.values.len(),
            min_time
        );
        Ok(head)
    }

    /// Returns the samples with timestamps in `[mint, maxt]`.
    pub fn iterator(&self, mint: i64, maxt: i64) -> SeriesIterator {
        let (range, mut selected) = self.timestamps.select(mint, maxt);
        // Only pairs with a value chunk are readable.
        let end = range.end.min(self.values.len());
        let start = range.start.min(end);
        selected.truncate(end - start);
        let values = self.values[start..end].to_vec();

        SeriesIterator {
            // Written counts are taken before any chunk is read, so they never
            // exceed what the lazily created chunk iterators observe.
            written: selected.iter().map(|e| e.chunk.num_samples()).collect(),
            timestamps: MultiChunkIterator::new(
                selected.into_iter().map(|e| e.chunk).collect(),
            ),
            values: MultiChunkIterator::new(values),
            position: 0,
            mint,
            maxt,
            done: false,
        }
    }
}

/// Iterator over the `(timestamp, value)` samples of a [`MemSeries`] range.
///
/// Yields `Err` once if a chunk fails to decode, then ends.
#[derive(Debug)]
pub struct SeriesIterator {
    timestamps: MultiChunkIterator,
    values: MultiChunkIterator,
    written: Vec<usize>,
    /// Global position the next step reads.
    position: usize,
    mint: i64,
    maxt: i64,
    done: bool,
}

impl SeriesIterator {
    fn fail(&mut self) -> Option<Result<(i64, i64)>> {
        self.done = true;
        self.timestamps
            .err()
            .or_else(|| self.values.err())
            .cloned()
            .map(Err)
    }
}

impl Iterator for SeriesIterator {
    type Item = Result<(i64, i64)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let chunk = self.position / CAPACITY;
            let Some(&written) = self.written.get(chunk) else {
                self.done = true;
                break;
            };
            if self.position % CAPACITY >= written {
                // Rest of this chunk is unwritten; park on its last position
                // so the next step reads the following chunk.
                self.position = (chunk + 1) * CAPACITY;
                if !self.timestamps.seek(self.position - 1)
                    || !self.values.seek(self.position - 1)
                {
                    return self.fail();
                }
                continue;
            }

            if !self.timestamps.next() || !self.values.next() {
                return self.fail();
            }
            self.position += 1;

            let timestamp = self.timestamps.at();
            if timestamp < self.mint {
                continue;
            }
            if timestamp > self.maxt {
                self.done = true;
                break;
            }
            return Some(Ok((timestamp, self.values.at())));
        }
        None
    }
}
