//! XOR chunk encoding.
//!
//! Each written sample is stored as a position gap code followed by the value
//! XOR'd with the previously stored value.
//!
//! ## Gap Encoding
//!
//! - `'0'`: sample sits at the write cursor
//! - `'1'` + 7 bits: sample sits `gap` positions past the cursor
//!
//! Skipped positions take no further space and read back as `0`.
//!
//! ## Value Encoding
//!
//! - First value: 64 bits raw
//! - Subsequent values, XOR with the previous value:
//!   - XOR = 0: `'0'` (1 bit)
//!   - Same window: `'10'` + meaningful bits
//!   - New window: `'11'` + 5 bits leading + 6 bits (length - 1) + meaningful bits

use std::sync::Arc;

use super::bstream::{write_bits, BitReader, Bits};
use super::{decode_header, encode_header, Cursor, SampleIterator, Shared, WriteLease, CAPACITY};
use crate::error::{Result, StorageError};

/// Width of an explicit position gap.
const GAP_BITS: u32 = 7;

/// Leading zero counts are capped so they fit into 5 bits.
const MAX_LEADING: u8 = 31;

/// Marks that no XOR window has been established yet.
const NO_WINDOW: u8 = u8::MAX;

#[derive(Debug, Clone, Default)]
struct XorState {
    bits: Bits,
    num_samples: u16,
}

/// Gap tolerant XOR encoded chunk.
///
/// Cloning yields another handle to the same chunk.
#[derive(Debug, Clone)]
pub struct XorChunk {
    shared: Arc<Shared<XorState>>,
}

impl Default for XorChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl XorChunk {
    /// Creates an empty chunk.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new(XorState::default())),
        }
    }

    pub(crate) fn from_bytes(data: &[u8]) -> Result<Self> {
        let (num_samples, payload) = decode_header(data)?;
        let state = XorState {
            bits: Bits::from_slice(payload),
            num_samples,
        };
        Ok(Self {
            shared: Arc::new(Shared::new(state)),
        })
    }

    /// Opens the exclusive appender.
    ///
    /// The encoder state is recovered by replaying the stored samples, so a
    /// chunk can be reopened after an earlier appender was dropped.
    pub fn appender(&self) -> Result<XorAppender> {
        let lease = self.shared.claim()?;
        let encoder = {
            let mut state = lease.write();
            let mut decoder = XorDecoder::new(state.bits.clone(), state.num_samples);
            while decoder.next_sample()?.is_some() {}
            // Drop byte padding left over from `from_bytes`.
            let used = decoder.bit_position();
            state.bits.truncate(used);
            decoder.into_encoder()
        };
        if encoder.cursor >= CAPACITY {
            return Err(StorageError::CapacityExceeded {
                position: encoder.cursor,
            });
        }
        Ok(XorAppender { lease, encoder })
    }

    /// Returns an iterator over a snapshot of the chunk.
    pub fn iterator(&self) -> XorIterator {
        let state = self.shared.read();
        XorIterator {
            decoder: XorDecoder::new(state.bits.clone(), state.num_samples),
            pending: None,
            cursor: Cursor::default(),
        }
    }

    /// Returns the number of explicitly written values.
    pub fn num_samples(&self) -> usize {
        self.shared.read().num_samples as usize
    }

    /// Returns the serialized chunk.
    pub fn bytes(&self) -> Vec<u8> {
        let state = self.shared.read();
        encode_header(state.num_samples, state.bits.as_raw_slice())
    }
}

/// Encoder registers carried between appends.
#[derive(Debug, Clone, Copy)]
struct XorEncoder {
    cursor: usize,
    last_value: i64,
    leading: u8,
    trailing: u8,
}

/// Exclusive appender of an [`XorChunk`].
#[derive(Debug)]
pub struct XorAppender {
    lease: WriteLease<XorState>,
    encoder: XorEncoder,
}

impl XorAppender {
    /// Writes `value` at the cursor.
    pub fn append(&mut self, value: i64) -> Result<()> {
        self.append_at(self.encoder.cursor, value)
    }

    /// Writes `value` at `position`, leaving the positions between the cursor
    /// and `position` unwritten.
    pub fn append_at(&mut self, position: usize, value: i64) -> Result<()> {
        let enc = &mut self.encoder;
        if position < enc.cursor {
            return Err(StorageError::OutOfOrder {
                position,
                cursor: enc.cursor,
            });
        }
        if position >= CAPACITY {
            return Err(StorageError::CapacityExceeded { position });
        }

        let mut state = self.lease.write();
        let XorState { bits, num_samples } = &mut *state;

        let gap = position - enc.cursor;
        if gap == 0 {
            bits.push(false);
        } else {
            bits.push(true);
            write_bits(bits, gap as u64, GAP_BITS);
        }

        if *num_samples == 0 {
            write_bits(bits, value as u64, 64);
        } else {
            enc.write_value(value, bits);
        }

        *num_samples += 1;
        enc.last_value = value;
        enc.cursor = position + 1;
        Ok(())
    }

    /// Returns the next writable position.
    pub fn cursor(&self) -> usize {
        self.encoder.cursor
    }
}

impl XorEncoder {
    fn write_value(&mut self, value: i64, output: &mut Bits) {
        let xor = (value as u64) ^ (self.last_value as u64);

        if xor == 0 {
            output.push(false);
            return;
        }
        output.push(true);

        let leading = (xor.leading_zeros() as u8).min(MAX_LEADING);
        let trailing = xor.trailing_zeros() as u8;

        if self.leading != NO_WINDOW && leading >= self.leading && trailing >= self.trailing {
            output.push(false);
            let meaningful = 64 - self.leading - self.trailing;
            write_bits(output, xor >> self.trailing, meaningful as u32);
        } else {
            output.push(true);
            let meaningful = 64 - leading - trailing;
            write_bits(output, leading as u64, 5);
            write_bits(output, (meaningful - 1) as u64, 6);
            write_bits(output, xor >> trailing, meaningful as u32);
            self.leading = leading;
            self.trailing = trailing;
        }
    }
}

/// Sequential decoder of stored samples as `(position, value)` pairs.
#[derive(Debug, Clone)]
struct XorDecoder {
    reader: BitReader,
    num_samples: u16,
    read: u16,
    cursor: usize,
    value: i64,
    leading: u8,
    trailing: u8,
    bit_position: usize,
}

impl XorDecoder {
    fn new(bits: Bits, num_samples: u16) -> Self {
        Self {
            reader: BitReader::new(bits),
            num_samples,
            read: 0,
            cursor: 0,
            value: 0,
            leading: NO_WINDOW,
            trailing: 0,
            bit_position: 0,
        }
    }

    fn next_sample(&mut self) -> Result<Option<(usize, i64)>> {
        if self.read >= self.num_samples {
            return Ok(None);
        }

        let gap = if self.reader.read_bit()? {
            self.reader.read_bits(GAP_BITS)? as usize
        } else {
            0
        };
        let position = self.cursor + gap;
        if position >= CAPACITY {
            return Err(StorageError::DecodeError(format!(
                "sample {} at position {} exceeds capacity {}",
                self.read, position, CAPACITY
            )));
        }

        self.value = if self.read == 0 {
            self.reader.read_bits(64)? as i64
        } else {
            self.read_value()?
        };

        self.read += 1;
        self.cursor = position + 1;
        self.bit_position = self.reader.position();
        Ok(Some((position, self.value)))
    }

    fn read_value(&mut self) -> Result<i64> {
        if !self.reader.read_bit()? {
            return Ok(self.value);
        }

        let xor = if !self.reader.read_bit()? {
            if self.leading == NO_WINDOW {
                return Err(StorageError::DecodeError(format!(
                    "sample {} reuses a window before one was set",
                    self.read
                )));
            }
            let meaningful = 64 - self.leading - self.trailing;
            self.reader.read_bits(meaningful as u32)? << self.trailing
        } else {
            let leading = self.reader.read_bits(5)? as u8;
            let meaningful = self.reader.read_bits(6)? as u8 + 1;
            if leading + meaningful > 64 {
                return Err(StorageError::DecodeError(format!(
                    "sample {} has invalid window: {} leading, {} meaningful bits",
                    self.read, leading, meaningful
                )));
            }
            let trailing = 64 - leading - meaningful;
            self.leading = leading;
            self.trailing = trailing;
            self.reader.read_bits(meaningful as u32)? << trailing
        };

        Ok(((self.value as u64) ^ xor) as i64)
    }

    /// Number of bits consumed by fully decoded samples.
    fn bit_position(&self) -> usize {
        self.bit_position
    }

    fn into_encoder(self) -> XorEncoder {
        XorEncoder {
            cursor: self.cursor,
            last_value: self.value,
            leading: self.leading,
            trailing: self.trailing,
        }
    }
}

/// Iterator over an [`XorChunk`] snapshot.
#[derive(Debug, Clone)]
pub struct XorIterator {
    decoder: XorDecoder,
    /// Next stored sample, decoded ahead of the read position.
    pending: Option<(usize, i64)>,
    cursor: Cursor,
}

impl XorIterator {
    fn step(
        cursor: &mut Cursor,
        decoder: &mut XorDecoder,
        pending: &mut Option<(usize, i64)>,
    ) -> bool {
        let Some(index) = cursor.advance() else {
            return false;
        };
        if pending.is_none() {
            match decoder.next_sample() {
                Ok(sample) => *pending = sample,
                Err(err) => return cursor.fail(err),
            }
        }
        match *pending {
            Some((position, value)) if position == index => {
                cursor.value = value;
                *pending = None;
            }
            _ => cursor.value = 0,
        }
        true
    }
}

impl SampleIterator for XorIterator {
    fn next(&mut self) -> bool {
        Self::step(&mut self.cursor, &mut self.decoder, &mut self.pending)
    }

    fn seek(&mut self, index: usize) -> bool {
        let decoder = &mut self.decoder;
        let pending = &mut self.pending;
        self.cursor
            .seek_with(index, |cursor| Self::step(cursor, decoder, pending))
    }

    fn at(&self) -> i64 {
        self.cursor.value
    }

    fn err(&self) -> Option<&StorageError> {
        self.cursor.err.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(chunk: &XorChunk) -> Vec<i64> {
        let mut it = chunk.iterator();
        let mut out = Vec::new();
        while it.next() {
            out.push(it.at());
        }
        assert!(it.err().is_none(), "unexpected error: {:?}", it.err());
        out
    }

    #[test]
    fn test_append_at_leaves_sparse_zeros() {
        let chunk = XorChunk::new();
        let mut app = chunk.appender().unwrap();
        app.append_at(50, 2).unwrap();
        app.append(3).unwrap();
        app.append_at(119, -4).unwrap();

        let values = values(&chunk);
        for (i, v) in values.iter().enumerate() {
            let expected = match i {
                50 => 2,
                51 => 3,
                119 => -4,
                _ => 0,
            };
            assert_eq!(*v, expected, "position {}", i);
        }
        assert_eq!(chunk.num_samples(), 3);
    }

    #[test]
    fn test_append_at_rejects_out_of_order() {
        let chunk = XorChunk::new();
        let mut app = chunk.appender().unwrap();
        app.append_at(10, 1).unwrap();

        assert_eq!(
            app.append_at(10, 2).unwrap_err(),
            StorageError::OutOfOrder {
                position: 10,
                cursor: 11
            }
        );
        assert_eq!(
            app.append_at(3, 2).unwrap_err(),
            StorageError::OutOfOrder {
                position: 3,
                cursor: 11
            }
        );
        assert_eq!(
            app.append_at(CAPACITY, 2).unwrap_err(),
            StorageError::CapacityExceeded { position: CAPACITY }
        );
        // Failed appends leave the chunk untouched.
        assert_eq!(app.cursor(), 11);
        assert_eq!(chunk.num_samples(), 1);
    }

    #[test]
    fn test_identical_values_cost_two_bits() {
        let chunk = XorChunk::new();
        let mut app = chunk.appender().unwrap();
        for _ in 0..CAPACITY {
            app.append(1234).unwrap();
        }

        // First: 1 gap bit + 64 value bits. Rest: 1 gap bit + 1 value bit.
        let expected_bits = 65 + (CAPACITY - 1) * 2;
        assert_eq!(chunk.bytes().len(), 2 + expected_bits.div_ceil(8));
        assert_eq!(values(&chunk), vec![1234; CAPACITY]);
    }

    #[test]
    fn test_window_reuse_and_extremes() {
        let input = [
            0_i64,
            1,
            3,
            2,
            i64::MAX,
            i64::MIN,
            -1,
            -1,
            1 << 62,
            (1 << 62) + 1,
            42,
        ];
        let chunk = XorChunk::new();
        let mut app = chunk.appender().unwrap();
        for &v in &input {
            app.append(v).unwrap();
        }

        assert_eq!(&values(&chunk)[..input.len()], &input);
    }

    #[test]
    fn test_small_counts_compress() {
        let chunk = XorChunk::new();
        let mut app = chunk.appender().unwrap();
        for i in 0..CAPACITY as i64 {
            app.append(100 + (i % 4)).unwrap();
        }

        let raw = CAPACITY * std::mem::size_of::<i64>();
        assert!(
            chunk.bytes().len() * 4 < raw,
            "expected at least 4:1, got {} bytes",
            chunk.bytes().len()
        );
    }

    #[test]
    fn test_reopen_after_from_bytes_drops_padding() {
        let chunk = XorChunk::new();
        let mut app = chunk.appender().unwrap();
        app.append(1).unwrap();
        app.append_at(5, 9).unwrap();
        drop(app);

        let restored = XorChunk::from_bytes(&chunk.bytes()).unwrap();
        let mut app = restored.appender().unwrap();
        assert_eq!(app.cursor(), 6);
        app.append(9).unwrap();
        app.append(10).unwrap();
        drop(app);

        let values = values(&restored);
        assert_eq!(&values[..9], &[1, 0, 0, 0, 0, 9, 9, 10, 0]);
    }

    #[test]
    fn test_gap_beyond_capacity_is_decode_error() {
        // One sample whose gap code points to position 127.
        let mut bits = Bits::new();
        bits.push(true);
        write_bits(&mut bits, 127, GAP_BITS);
        write_bits(&mut bits, 5, 64);

        let mut data = 1u16.to_be_bytes().to_vec();
        data.extend_from_slice(bits.as_raw_slice());
        let chunk = XorChunk::from_bytes(&data).unwrap();

        let mut it = chunk.iterator();
        assert!(!it.next());
        assert!(matches!(it.err(), Some(StorageError::DecodeError(_))));
        assert!(!it.next());
    }

    #[test]
    fn test_window_reuse_without_window_is_decode_error() {
        let mut bits = Bits::new();
        bits.push(false);
        write_bits(&mut bits, 5, 64);
        // Second sample: no gap, non-zero XOR, reuse window.
        bits.push(false);
        bits.push(true);
        bits.push(false);
        write_bits(&mut bits, 0, 16);

        let mut data = 2u16.to_be_bytes().to_vec();
        data.extend_from_slice(bits.as_raw_slice());
        let chunk = XorChunk::from_bytes(&data).unwrap();

        let mut it = chunk.iterator();
        assert!(it.next());
        assert_eq!(it.at(), 5);
        assert!(!it.next());
        assert!(matches!(it.err(), Some(StorageError::DecodeError(_))));
    }

    #[test]
    fn test_seek_through_sparse_positions() {
        let chunk = XorChunk::new();
        let mut app = chunk.appender().unwrap();
        app.append_at(30, 7).unwrap();
        app.append_at(60, 8).unwrap();

        let mut it = chunk.iterator();
        assert!(it.seek(30));
        assert_eq!(it.at(), 7);
        assert!(it.seek(45));
        assert_eq!(it.at(), 0);
        assert!(it.next());
        assert_eq!(it.at(), 0);
        assert!(it.seek(60));
        assert_eq!(it.at(), 8);
    }
}
