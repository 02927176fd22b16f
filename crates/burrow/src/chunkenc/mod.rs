//! Chunk encodings for profile sample values.
//!
//! A chunk holds up to [`CAPACITY`] `i64` values at logical positions
//! `0..CAPACITY`. Two encodings exist:
//!
//! - [`XorChunk`]: values are XOR'd with their predecessor and bit-packed.
//!   Writes may skip positions with [`Appender::append_at`]; skipped
//!   positions cost no bits and read back as `0`.
//! - [`DeltaChunk`]: values are written strictly sequentially from position
//!   0 and stored as zigzag varint deltas.
//!
//! # Serialized form
//!
//! ```text
//! 0x00  2  sample count (u16 BE)
//! 0x02  N  encoding specific payload
//! ```
//!
//! # Concurrency
//!
//! Chunks are shared handles. Only one [`Appender`] can be open per chunk;
//! it is released when dropped. Each append runs under a short write lock
//! and iterators snapshot the encoded state under the read lock, so a reader
//! never observes a half-written value.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_burrow::chunkenc::{Chunk, Encoding, SampleIterator};
//!
//! let chunk = Chunk::new(Encoding::Xor);
//! let mut app = chunk.appender()?;
//! app.append(3)?;
//! app.append_at(10, 7)?;
//!
//! let mut it = chunk.iterator();
//! while it.next() {
//!     println!("{}", it.at());
//! }
//! ```

mod bstream;
mod delta;
mod xor;

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, StorageError};

pub use delta::{DeltaAppender, DeltaChunk, DeltaIterator};
pub use xor::{XorAppender, XorChunk, XorIterator};

/// Number of logical positions in every chunk.
pub const CAPACITY: usize = 120;

/// Size of the serialized chunk header.
const HEADER_SIZE: usize = 2;

/// Chunk encoding tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Encoding {
    /// Gap tolerant XOR encoding.
    Xor = 1,
    /// Sequential delta encoding.
    Delta = 2,
}

impl Encoding {
    /// Parses an encoding tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Xor),
            2 => Some(Self::Delta),
            _ => None,
        }
    }

    /// Returns the encoding tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xor => f.write_str("XOR"),
            Self::Delta => f.write_str("delta"),
        }
    }
}

/// Read cursor over a dense sequence of sample values.
///
/// Implemented by single chunk iterators and by
/// [`MultiChunkIterator`](crate::storage::MultiChunkIterator).
pub trait SampleIterator {
    /// Advances to the next position.
    ///
    /// Returns false once the sequence is exhausted or an error occurred;
    /// after an error it never returns true again.
    fn next(&mut self) -> bool;

    /// Moves forward so that [`at`](Self::at) returns the value at `index`.
    ///
    /// `seek(0)` is a no-op: the iterator stays before the first position and
    /// the next call to [`next`](Self::next) yields index 0. Seeking to a
    /// position at or behind the current one leaves the iterator in place.
    /// Returns false if the target lies past the end or an error occurred.
    fn seek(&mut self, index: usize) -> bool;

    /// Returns the value at the current position, `0` if it was never written.
    fn at(&self) -> i64;

    /// Returns the first error encountered, if any.
    fn err(&self) -> Option<&StorageError>;
}

/// An encoded chunk of sample values.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// XOR encoded chunk.
    Xor(XorChunk),
    /// Delta encoded chunk.
    Delta(DeltaChunk),
}

impl Chunk {
    /// Creates an empty chunk with the given encoding.
    pub fn new(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Xor => Self::Xor(XorChunk::new()),
            Encoding::Delta => Self::Delta(DeltaChunk::new()),
        }
    }

    /// Rebuilds a chunk from the output of [`Chunk::bytes`].
    ///
    /// Only the header is validated here; payload corruption is reported by
    /// the iterator or when an appender is opened.
    pub fn from_bytes(encoding: Encoding, data: &[u8]) -> Result<Self> {
        match encoding {
            Encoding::Xor => XorChunk::from_bytes(data).map(Self::Xor),
            Encoding::Delta => DeltaChunk::from_bytes(data).map(Self::Delta),
        }
    }

    /// Returns the chunk encoding.
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Xor(_) => Encoding::Xor,
            Self::Delta(_) => Encoding::Delta,
        }
    }

    /// Opens the exclusive appender for this chunk.
    pub fn appender(&self) -> Result<Appender> {
        match self {
            Self::Xor(c) => c.appender().map(Appender::Xor),
            Self::Delta(c) => c.appender().map(Appender::Delta),
        }
    }

    /// Returns an iterator positioned before index 0.
    pub fn iterator(&self) -> ChunkIterator {
        match self {
            Self::Xor(c) => ChunkIterator::Xor(c.iterator()),
            Self::Delta(c) => ChunkIterator::Delta(c.iterator()),
        }
    }

    /// Returns the number of explicitly written values.
    pub fn num_samples(&self) -> usize {
        match self {
            Self::Xor(c) => c.num_samples(),
            Self::Delta(c) => c.num_samples(),
        }
    }

    /// Returns the serialized chunk.
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Xor(c) => c.bytes(),
            Self::Delta(c) => c.bytes(),
        }
    }
}

impl From<XorChunk> for Chunk {
    fn from(chunk: XorChunk) -> Self {
        Self::Xor(chunk)
    }
}

impl From<DeltaChunk> for Chunk {
    fn from(chunk: DeltaChunk) -> Self {
        Self::Delta(chunk)
    }
}

/// Exclusive write handle for a [`Chunk`].
#[derive(Debug)]
pub enum Appender {
    /// Appender of an XOR chunk.
    Xor(XorAppender),
    /// Appender of a delta chunk.
    Delta(DeltaAppender),
}

impl Appender {
    /// Writes `value` at the cursor and advances it.
    pub fn append(&mut self, value: i64) -> Result<()> {
        match self {
            Self::Xor(a) => a.append(value),
            Self::Delta(a) => a.append(value),
        }
    }

    /// Writes `value` at `position` and moves the cursor past it.
    ///
    /// Fails with [`StorageError::UnsupportedOperation`] on delta chunks.
    pub fn append_at(&mut self, position: usize, value: i64) -> Result<()> {
        match self {
            Self::Xor(a) => a.append_at(position, value),
            Self::Delta(a) => a.append_at(position, value),
        }
    }

    /// Returns the next writable position.
    pub fn cursor(&self) -> usize {
        match self {
            Self::Xor(a) => a.cursor(),
            Self::Delta(a) => a.cursor(),
        }
    }
}

/// Iterator over a single [`Chunk`].
#[derive(Debug, Clone)]
pub enum ChunkIterator {
    /// Iterator of an XOR chunk.
    Xor(XorIterator),
    /// Iterator of a delta chunk.
    Delta(DeltaIterator),
}

impl SampleIterator for ChunkIterator {
    fn next(&mut self) -> bool {
        match self {
            Self::Xor(it) => it.next(),
            Self::Delta(it) => it.next(),
        }
    }

    fn seek(&mut self, index: usize) -> bool {
        match self {
            Self::Xor(it) => it.seek(index),
            Self::Delta(it) => it.seek(index),
        }
    }

    fn at(&self) -> i64 {
        match self {
            Self::Xor(it) => it.at(),
            Self::Delta(it) => it.at(),
        }
    }

    fn err(&self) -> Option<&StorageError> {
        match self {
            Self::Xor(it) => it.err(),
            Self::Delta(it) => it.err(),
        }
    }
}

/// Encoded state plus the single-writer flag, shared by a chunk's handles.
#[derive(Debug)]
pub(crate) struct Shared<S> {
    state: RwLock<S>,
    writer_open: AtomicBool,
}

impl<S> Shared<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            state: RwLock::new(state),
            writer_open: AtomicBool::new(false),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, S> {
        self.state.read().unwrap_or_else(|err| err.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.state.write().unwrap_or_else(|err| err.into_inner())
    }

    /// Claims the writer slot, failing if an appender is already open.
    pub(crate) fn claim(self: &Arc<Self>) -> Result<WriteLease<S>> {
        self.writer_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StorageError::AppenderInUse)?;
        Ok(WriteLease {
            shared: Arc::clone(self),
        })
    }
}

/// Held by an appender; releases the writer slot on drop.
#[derive(Debug)]
pub(crate) struct WriteLease<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Deref for WriteLease<S> {
    type Target = Shared<S>;

    fn deref(&self) -> &Self::Target {
        &self.shared
    }
}

impl<S> Drop for WriteLease<S> {
    fn drop(&mut self) {
        self.shared.writer_open.store(false, Ordering::Release);
    }
}

/// Prepends the sample count header to an encoded payload.
fn encode_header(num_samples: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&num_samples.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Splits serialized chunk bytes into sample count and payload.
fn decode_header(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < HEADER_SIZE {
        return Err(StorageError::DecodeError(format!(
            "chunk too short: {} bytes, header needs {}",
            data.len(),
            HEADER_SIZE
        )));
    }
    let num_samples = u16::from_be_bytes([data[0], data[1]]);
    if num_samples as usize > CAPACITY {
        return Err(StorageError::DecodeError(format!(
            "chunk claims {} samples, capacity is {}",
            num_samples, CAPACITY
        )));
    }
    Ok((num_samples, &data[HEADER_SIZE..]))
}

/// Read cursor bookkeeping shared by both iterator kinds.
#[derive(Debug, Clone, Default)]
struct Cursor {
    /// Position the next call to `next` produces.
    next_index: usize,
    value: i64,
    done: bool,
    err: Option<StorageError>,
}

impl Cursor {
    /// Claims the next position, or returns `None` when the iterator cannot
    /// advance.
    fn advance(&mut self) -> Option<usize> {
        if self.err.is_some() || self.done {
            return None;
        }
        if self.next_index >= CAPACITY {
            self.done = true;
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(index)
    }

    fn fail(&mut self, err: StorageError) -> bool {
        self.err = Some(err);
        false
    }

    /// Drives `next` forward until `index` is the current position.
    fn seek_with<F>(&mut self, index: usize, mut next: F) -> bool
    where
        F: FnMut(&mut Self) -> bool,
    {
        if self.err.is_some() || self.done {
            return false;
        }
        if index == 0 {
            return true;
        }
        if index >= CAPACITY {
            self.done = true;
            return false;
        }
        while self.next_index <= index {
            if !next(self) {
                return false;
            }
        }
        true
    }
}
