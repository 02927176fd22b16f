//! Error and Result types for Burrow chunk storage.

use thiserror::Error;

/// A convenience `Result` type for Burrow operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// The error type for chunk encoding, iteration and indexing.
///
/// Errors are cheap to clone so composed iterators can keep the first
/// error reported by a child.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Append targeted a position at or beyond the chunk capacity.
    #[error("Chunk capacity exceeded: position {position} is out of range")]
    CapacityExceeded {
        /// Position the append targeted.
        position: usize,
    },

    /// Append targeted a position behind the write cursor.
    #[error("Out of order append: position {position} is before cursor {cursor}")]
    OutOfOrder {
        /// Position the append targeted.
        position: usize,
        /// Next writable position.
        cursor: usize,
    },

    /// Series sample timestamp is not after the previous one.
    #[error("Out of order sample: timestamp {timestamp} is not after {last}")]
    TimestampOutOfOrder {
        /// Timestamp of the rejected sample.
        timestamp: i64,
        /// Timestamp of the last accepted sample.
        last: i64,
    },

    /// The encoding does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// Encoded bytes are malformed or truncated.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Another appender is still open on the chunk.
    #[error("Chunk already has an open appender")]
    AppenderInUse,

    /// Configuration values are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
