//! Error types for the concord core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in concord core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Read outside the journal's retained range.
    #[error("index {index} out of bounds: journal covers [{first}, {last}]")]
    OutOfBounds {
        /// The requested index.
        index: u64,
        /// The oldest retained index.
        first: u64,
        /// The highest appended index.
        last: u64,
    },

    /// Attempted to truncate at or below the commit index.
    #[error("cannot truncate committed index {index}: commit index is {commit_index}")]
    CannotTruncateCommitted {
        /// The requested truncation index.
        index: u64,
        /// The current commit index.
        commit_index: u64,
    },

    /// The active segment cannot fit the entry. Internal; the journal
    /// handles this by rolling to a new segment.
    #[error("segment full")]
    SegmentFull,

    /// An entry record failed validation inside a segment.
    #[error("segment {segment_id} corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Creation ordinal of the segment.
        segment_id: u64,
        /// Byte offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// The segment collection is inconsistent (gap, bad header, bad name).
    #[error("corrupted log: {message}")]
    CorruptedLog {
        /// Description of the inconsistency.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A reader's position was truncated out from under it.
    #[error("reader invalidated: position {index} was truncated")]
    ReaderInvalidated {
        /// The reader's next position at the time of invalidation.
        index: u64,
    },

    /// The log degraded to read-only after a failed write.
    #[error("log is read-only after a write failure")]
    ReadOnly,

    /// Another process holds the log directory lock.
    #[error("log directory locked: another process has exclusive access")]
    LogLocked,

    /// A committed payload could not be decoded.
    #[error("cannot decode committed entry {index}: {message}")]
    Decode {
        /// Index of the undecodable entry.
        index: u64,
        /// Description of the decode failure.
        message: String,
    },

    /// The state-machine runtime halted on a fatal error.
    #[error("state-machine runtime halted")]
    Halted,
}

impl CoreError {
    /// Creates an out-of-bounds error.
    pub fn out_of_bounds(index: u64, first: u64, last: u64) -> Self {
        Self::OutOfBounds { index, first, last }
    }

    /// Creates a segment corruption error.
    pub fn corrupted(segment_id: u64, offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            segment_id,
            offset,
            message: message.into(),
        }
    }

    /// Creates a corrupted-log error.
    pub fn corrupted_log(message: impl Into<String>) -> Self {
        Self::CorruptedLog {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(index: u64, message: impl Into<String>) -> Self {
        Self::Decode {
            index,
            message: message.into(),
        }
    }
}
