//! Delta chunk encoding.
//!
//! Values are written strictly in sequence starting at position 0:
//! - First value: zigzag LEB128 varint
//! - Subsequent values: zigzag varint of the wrapping difference to the
//!   previous value
//!
//! Positions past the last written value read back as `0`.

use std::sync::Arc;

use super::{decode_header, encode_header, Cursor, SampleIterator, Shared, WriteLease, CAPACITY};
use crate::error::{Result, StorageError};

/// Longest LEB128 encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Default)]
struct DeltaState {
    data: Vec<u8>,
    num_samples: u16,
}

/// Sequential delta encoded chunk.
///
/// Cloning yields another handle to the same chunk.
#[derive(Debug, Clone)]
pub struct DeltaChunk {
    shared: Arc<Shared<DeltaState>>,
}

impl Default for DeltaChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaChunk {
    /// Creates an empty chunk.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new(DeltaState::default())),
        }
    }

    pub(crate) fn from_bytes(data: &[u8]) -> Result<Self> {
        let (num_samples, payload) = decode_header(data)?;
        let state = DeltaState {
            data: payload.to_vec(),
            num_samples,
        };
        Ok(Self {
            shared: Arc::new(Shared::new(state)),
        })
    }

    /// Opens the exclusive appender.
    pub fn appender(&self) -> Result<DeltaAppender> {
        let lease = self.shared.claim()?;
        let last_value = {
            let mut state = lease.write();
            let mut decoder = DeltaDecoder::new(state.data.clone(), state.num_samples);
            while decoder.next_value()?.is_some() {}
            state.data.truncate(decoder.offset);
            decoder.value
        };
        let cursor = lease.read().num_samples as usize;
        if cursor >= CAPACITY {
            return Err(StorageError::CapacityExceeded { position: cursor });
        }
        Ok(DeltaAppender {
            lease,
            last_value,
            cursor,
        })
    }

    /// Returns an iterator over a snapshot of the chunk.
    pub fn iterator(&self) -> DeltaIterator {
        let state = self.shared.read();
        DeltaIterator {
            decoder: DeltaDecoder::new(state.data.clone(), state.num_samples),
            cursor: Cursor::default(),
        }
    }

    /// Returns the number of written values.
    pub fn num_samples(&self) -> usize {
        self.shared.read().num_samples as usize
    }

    /// Returns the serialized chunk.
    pub fn bytes(&self) -> Vec<u8> {
        let state = self.shared.read();
        encode_header(state.num_samples, &state.data)
    }
}

/// Exclusive appender of a [`DeltaChunk`].
#[derive(Debug)]
pub struct DeltaAppender {
    lease: WriteLease<DeltaState>,
    last_value: i64,
    cursor: usize,
}

impl DeltaAppender {
    /// Writes `value` at the cursor.
    pub fn append(&mut self, value: i64) -> Result<()> {
        if self.cursor >= CAPACITY {
            return Err(StorageError::CapacityExceeded {
                position: self.cursor,
            });
        }

        let mut state = self.lease.write();
        let delta = if state.num_samples == 0 {
            value
        } else {
            value.wrapping_sub(self.last_value)
        };
        put_varint(&mut state.data, delta);
        state.num_samples += 1;

        self.last_value = value;
        self.cursor += 1;
        Ok(())
    }

    /// Always fails: delta chunks cannot hold gaps.
    pub fn append_at(&mut self, _position: usize, _value: i64) -> Result<()> {
        Err(StorageError::UnsupportedOperation(
            "append_at on a delta chunk; values must be sequential",
        ))
    }

    /// Returns the next writable position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

fn put_varint(out: &mut Vec<u8>, value: i64) {
    let mut zz = ((value << 1) ^ (value >> 63)) as u64;
    while zz >= 0x80 {
        out.push((zz as u8) | 0x80);
        zz >>= 7;
    }
    out.push(zz as u8);
}

#[derive(Debug, Clone)]
struct DeltaDecoder {
    data: Vec<u8>,
    offset: usize,
    num_samples: u16,
    read: u16,
    value: i64,
}

impl DeltaDecoder {
    fn new(data: Vec<u8>, num_samples: u16) -> Self {
        Self {
            data,
            offset: 0,
            num_samples,
            read: 0,
            value: 0,
        }
    }

    fn next_value(&mut self) -> Result<Option<i64>> {
        if self.read >= self.num_samples {
            return Ok(None);
        }
        let delta = self.read_varint()?;
        self.value = if self.read == 0 {
            delta
        } else {
            self.value.wrapping_add(delta)
        };
        self.read += 1;
        Ok(Some(self.value))
    }

    fn read_varint(&mut self) -> Result<i64> {
        let mut zz: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let Some(&byte) = self.data.get(self.offset + i) else {
                return Err(StorageError::DecodeError(format!(
                    "truncated varint for sample {} at byte {}",
                    self.read,
                    self.offset + i
                )));
            };
            zz |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                self.offset += i + 1;
                return Ok(((zz >> 1) as i64) ^ -((zz & 1) as i64));
            }
        }
        Err(StorageError::DecodeError(format!(
            "varint for sample {} longer than {} bytes",
            self.read, MAX_VARINT_LEN
        )))
    }
}

/// Iterator over a [`DeltaChunk`] snapshot.
#[derive(Debug, Clone)]
pub struct DeltaIterator {
    decoder: DeltaDecoder,
    cursor: Cursor,
}

impl DeltaIterator {
    fn step(cursor: &mut Cursor, decoder: &mut DeltaDecoder) -> bool {
        if cursor.advance().is_none() {
            return false;
        }
        match decoder.next_value() {
            Ok(value) => {
                cursor.value = value.unwrap_or(0);
                true
            }
            Err(err) => cursor.fail(err),
        }
    }
}

impl SampleIterator for DeltaIterator {
    fn next(&mut self) -> bool {
        Self::step(&mut self.cursor, &mut self.decoder)
    }

    fn seek(&mut self, index: usize) -> bool {
        let decoder = &mut self.decoder;
        self.cursor
            .seek_with(index, |cursor| Self::step(cursor, decoder))
    }

    fn at(&self) -> i64 {
        self.cursor.value
    }

    fn err(&self) -> Option<&StorageError> {
        self.cursor.err.as_ref()
    }
}
