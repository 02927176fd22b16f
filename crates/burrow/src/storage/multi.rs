//! Iteration over a list of chunks as one dense sequence.

use tracing::warn;

use crate::chunkenc::{Chunk, ChunkIterator, SampleIterator, CAPACITY};
use crate::error::StorageError;

/// Forward-only iterator over several chunks laid end to end.
///
/// Every chunk counts as exactly [`CAPACITY`] positions wide, whether or not
/// it was filled, so global position `p` lives in chunk `p / CAPACITY` at
/// offset `p % CAPACITY`. Unwritten positions read as `0`.
///
/// Traversal stops at the first child error; [`err`](SampleIterator::err)
/// then reports it and [`next`](SampleIterator::next) keeps returning false.
#[derive(Debug, Clone)]
pub struct MultiChunkIterator {
    chunks: Vec<Chunk>,
    /// Index of the active chunk.
    index: usize,
    /// Iterator of the active chunk, created on first use.
    current: Option<ChunkIterator>,
    err: Option<StorageError>,
}

impl MultiChunkIterator {
    /// Creates an iterator over `chunks` in the given order.
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            index: 0,
            current: None,
            err: None,
        }
    }

    /// Returns the number of positions covered by all chunks.
    pub fn len(&self) -> usize {
        self.chunks.len() * CAPACITY
    }

    /// Returns true if there are no chunks to iterate.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn halt(&mut self, err: StorageError) -> bool {
        warn!(
            "Stopping multi-chunk iteration at chunk {} of {}: {}",
            self.index,
            self.chunks.len(),
            err
        );
        self.err = Some(err);
        false
    }
}

impl SampleIterator for MultiChunkIterator {
    fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        while self.index < self.chunks.len() {
            let it = self
                .current
                .get_or_insert_with(|| self.chunks[self.index].iterator());
            if it.next() {
                return true;
            }
            if let Some(err) = it.err().cloned() {
                return self.halt(err);
            }
            self.index += 1;
            self.current = None;
        }
        false
    }

    fn seek(&mut self, index: usize) -> bool {
        if self.err.is_some() || self.index >= self.chunks.len() {
            return false;
        }
        let target = index / CAPACITY;
        if target >= self.chunks.len() {
            self.index = self.chunks.len();
            self.current = None;
            return false;
        }
        if target < self.index {
            return true;
        }
        if target > self.index {
            self.index = target;
            self.current = None;
        }

        let it = self
            .current
            .get_or_insert_with(|| self.chunks[self.index].iterator());
        if it.seek(index % CAPACITY) {
            return true;
        }
        let err = it.err().cloned();
        match err {
            Some(err) => self.halt(err),
            None => false,
        }
    }

    fn at(&self) -> i64 {
        self.current.as_ref().map_or(0, |it| it.at())
    }

    fn err(&self) -> Option<&StorageError> {
        self.err.as_ref()
    }
}
