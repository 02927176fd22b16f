//! Time indexed chunk directory.

use std::ops::Range;
use std::sync::{RwLock, RwLockReadGuard};

use crate::chunkenc::Chunk;
use crate::storage::MultiChunkIterator;

/// A chunk together with the timestamps of its first and last written sample.
#[derive(Debug, Clone)]
pub struct TimestampChunk {
    /// The chunk handle.
    pub chunk: Chunk,
    /// Timestamp of the first written sample.
    pub min_time: i64,
    /// Timestamp of the last written sample.
    pub max_time: i64,
}

/// Append-only list of chunks ordered by `min_time`.
///
/// Callers must append entries with non-decreasing `min_time` and
/// non-overlapping ranges; [`index_range`](Self::index_range) relies on it.
/// Entries are guarded by a lock, so concurrent readers see each append
/// either fully or not at all.
#[derive(Debug, Default)]
pub struct TimestampChunks {
    entries: RwLock<Vec<TimestampChunk>>,
}

impl TimestampChunks {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> RwLockReadGuard<'_, Vec<TimestampChunk>> {
        self.entries.read().unwrap_or_else(|err| err.into_inner())
    }

    /// Adds a trailing entry.
    pub fn append(&self, chunk: Chunk, min_time: i64, max_time: i64) {
        debug_assert!(max_time >= min_time);
        let mut entries = self.entries.write().unwrap_or_else(|err| err.into_inner());
        entries.push(TimestampChunk {
            chunk,
            min_time,
            max_time,
        });
    }

    /// Raises the last entry's `max_time` as its chunk receives writes.
    ///
    /// Returns false if the directory is empty.
    pub fn set_head_max_time(&self, max_time: i64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|err| err.into_inner());
        match entries.last_mut() {
            Some(head) => {
                head.max_time = head.max_time.max(max_time);
                true
            }
            None => false,
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if no chunk was appended yet.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Returns a copy of the entry at `index`.
    pub fn get(&self, index: usize) -> Option<TimestampChunk> {
        self.entries().get(index).cloned()
    }

    /// Returns the index bounds of the entries overlapping `[mint, maxt]`.
    ///
    /// `start` is the first entry with `max_time >= mint`, `end` the first
    /// entry with `min_time > maxt`. A query entirely before or after the
    /// directory yields an empty range at `0` or `len`. An inverted query
    /// (`mint > maxt`) yields an empty range at `start`.
    pub fn index_range(&self, mint: i64, maxt: i64) -> Range<usize> {
        Self::search(&self.entries(), mint, maxt)
    }

    fn search(entries: &[TimestampChunk], mint: i64, maxt: i64) -> Range<usize> {
        let start = entries.partition_point(|e| e.max_time < mint);
        let end = entries.partition_point(|e| e.min_time <= maxt);
        start..end.max(start)
    }

    /// Returns the entries overlapping `[mint, maxt]`.
    pub fn range(&self, mint: i64, maxt: i64) -> Vec<TimestampChunk> {
        self.select(mint, maxt).1
    }

    /// Returns the index bounds and the entries they cover, read under one
    /// lock so both agree.
    pub(crate) fn select(&self, mint: i64, maxt: i64) -> (Range<usize>, Vec<TimestampChunk>) {
        let entries = self.entries();
        let range = Self::search(&entries, mint, maxt);
        let selected = entries[range.clone()].to_vec();
        (range, selected)
    }

    /// Returns a copy of every entry.
    pub fn entries_snapshot(&self) -> Vec<TimestampChunk> {
        self.entries().clone()
    }

    /// Returns the chunks overlapping `[mint, maxt]`.
    pub fn chunks_in_range(&self, mint: i64, maxt: i64) -> Vec<Chunk> {
        let entries = self.entries();
        entries[Self::search(&entries, mint, maxt)]
            .iter()
            .map(|e| e.chunk.clone())
            .collect()
    }

    /// Returns an iterator over the chunks overlapping `[mint, maxt]`.
    pub fn iterator(&self, mint: i64, maxt: i64) -> MultiChunkIterator {
        MultiChunkIterator::new(self.chunks_in_range(mint, maxt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunkenc::{DeltaChunk, Encoding, SampleIterator, CAPACITY};

    fn directory(ranges: &[(i64, i64)]) -> TimestampChunks {
        let tcs = TimestampChunks::new();
        for &(min, max) in ranges {
            tcs.append(DeltaChunk::new().into(), min, max);
        }
        tcs
    }

    #[test]
    fn test_index_range_single_entry() {
        let tcs = directory(&[(0, 20)]);

        assert_eq!(tcs.index_range(5, 15), 0..1);
        assert_eq!(tcs.index_range(-5, 25), 0..1);
        assert_eq!(tcs.index_range(-15, -5), 0..0);
        assert_eq!(tcs.index_range(25, 30), 1..1);
    }

    #[test]
    fn test_index_range_boundaries_are_inclusive() {
        let tcs = directory(&[(0, 20)]);

        assert_eq!(tcs.index_range(20, 30), 0..1);
        assert_eq!(tcs.index_range(-10, 0), 0..1);
        assert_eq!(tcs.index_range(21, 30), 1..1);
        assert_eq!(tcs.index_range(-10, -1), 0..0);
    }

    #[test]
    fn test_index_range_many_entries() {
        let tcs = directory(&[(0, 20)]);
        for i in 20..1_000 {
            if i % 20 == 0 {
                tcs.append(DeltaChunk::new().into(), i, i);
            }
            tcs.set_head_max_time(i);
        }
        assert_eq!(tcs.len(), 50);

        assert_eq!(tcs.index_range(123, 256), 6..13);
        assert_eq!(tcs.index_range(120, 139), 6..7);
        assert_eq!(tcs.index_range(2_000, 3_000), 50..50);
        assert_eq!(tcs.index_range(i64::MIN, i64::MAX), 0..50);
    }

    #[test]
    fn test_index_range_empty_directory() {
        let tcs = TimestampChunks::new();
        assert!(tcs.is_empty());
        assert_eq!(tcs.index_range(0, 100), 0..0);
        assert!(!tcs.set_head_max_time(5));
    }

    #[test]
    fn test_inverted_query_is_empty() {
        let tcs = directory(&[(0, 10), (12, 14), (20, 30)]);
        let range = tcs.index_range(25, 11);
        assert!(range.is_empty());
        assert_eq!(range.start, 2);
        assert!(tcs.range(25, 11).is_empty());
    }

    #[test]
    fn test_set_head_max_time_only_grows() {
        let tcs = directory(&[(0, 10)]);
        assert!(tcs.set_head_max_time(5));
        assert_eq!(tcs.get(0).unwrap().max_time, 10);
        assert!(tcs.set_head_max_time(15));
        assert_eq!(tcs.get(0).unwrap().max_time, 15);
        assert!(tcs.get(1).is_none());
    }

    #[test]
    fn test_iterator_over_selected_chunks() {
        let tcs = TimestampChunks::new();
        for (i, base) in [0_i64, 100, 200].iter().enumerate() {
            let chunk = Chunk::new(Encoding::Delta);
            let mut app = chunk.appender().unwrap();
            app.append(i as i64 + 1).unwrap();
            tcs.append(chunk, *base, base + 50);
        }

        let selected = tcs.range(120, 260);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].min_time, 100);

        let mut it = tcs.iterator(120, 260);
        assert!(it.next());
        assert_eq!(it.at(), 2);
        assert!(it.seek(CAPACITY));
        assert!(it.next());
        assert_eq!(it.at(), 3);
    }
}
