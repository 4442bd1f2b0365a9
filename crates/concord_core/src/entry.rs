//! Entry records and on-disk framing.
//!
//! Segment files are a 14-byte header followed by length-prefixed entry
//! records, each closed by a CRC32 trailer:
//!
//! ```text
//! header:  magic u32 | version u16 | first_index u64
//! record:  length u32 | index u64 | term u64 | timestamp i64 | payload | crc32 u32
//! ```
//!
//! `length` counts the fixed fields plus the payload but not the CRC, so a
//! record occupies `length + 4` bytes on disk. All integers little-endian.
//! End-of-segment is the first record whose length word is zero or whose
//! CRC fails; residual bytes after it are discarded.

use crate::error::{CoreError, CoreResult};

/// Magic word at the start of every segment file.
pub const SEGMENT_MAGIC: u32 = 0x5452_414C;

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// Segment header size: magic (4) + version (2) + first_index (8).
pub const SEGMENT_HEADER_SIZE: usize = 14;

/// Fixed portion of a record counted by its length word:
/// length (4) + index (8) + term (8) + timestamp (8).
pub const ENTRY_FIXED_SIZE: usize = 28;

/// CRC trailer size.
pub const CRC_SIZE: usize = 4;

/// An immutable log entry.
///
/// Entries are created only by appending and never modified. `index` is
/// the strictly monotonic position assigned at append, `term` the election
/// epoch passed through from the leader, and `timestamp` the leader's
/// wall clock in milliseconds at append time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Position in the log, starting at 1.
    pub index: u64,
    /// Election epoch of the appending leader.
    pub term: u64,
    /// Leader wall clock at append, in milliseconds.
    pub timestamp: i64,
    /// Opaque serialized operation.
    pub payload: Vec<u8>,
}

impl Entry {
    /// Creates an entry.
    #[must_use]
    pub fn new(index: u64, term: u64, timestamp: i64, payload: Vec<u8>) -> Self {
        Self {
            index,
            term,
            timestamp,
            payload,
        }
    }

    /// Returns the on-disk size of this entry's record, CRC included.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        ENTRY_FIXED_SIZE + self.payload.len() + CRC_SIZE
    }

    /// Encodes the entry as a framed record.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let length = (ENTRY_FIXED_SIZE + self.payload.len()) as u32;
        let mut buf = Vec::with_capacity(self.encoded_size());

        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.term.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.payload);

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decodes an entry from a full record slice (length word through CRC).
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` when the CRC trailer does not match and
    /// `CorruptedLog` when the slice is too short or the length word is
    /// inconsistent.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < ENTRY_FIXED_SIZE + CRC_SIZE {
            return Err(CoreError::corrupted_log("entry record too short"));
        }

        let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if length < ENTRY_FIXED_SIZE || data.len() < length + CRC_SIZE {
            return Err(CoreError::corrupted_log("entry length word inconsistent"));
        }

        let stored_crc = u32::from_le_bytes([
            data[length],
            data[length + 1],
            data[length + 2],
            data[length + 3],
        ]);
        let computed_crc = compute_crc32(&data[..length]);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let index = u64::from_le_bytes([
            data[4], data[5], data[6], data[7], data[8], data[9], data[10], data[11],
        ]);
        let term = u64::from_le_bytes([
            data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
        ]);
        let timestamp = i64::from_le_bytes([
            data[20], data[21], data[22], data[23], data[24], data[25], data[26], data[27],
        ]);
        let payload = data[ENTRY_FIXED_SIZE..length].to_vec();

        Ok(Self {
            index,
            term,
            timestamp,
            payload,
        })
    }
}

/// Encodes a segment file header.
#[must_use]
pub fn encode_segment_header(first_index: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SEGMENT_HEADER_SIZE);
    buf.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
    buf.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
    buf.extend_from_slice(&first_index.to_le_bytes());
    buf
}

/// Decodes a segment file header, returning the segment's first index.
///
/// # Errors
///
/// Returns `CorruptedLog` on a short header, wrong magic, or a format
/// version newer than this build understands.
pub fn decode_segment_header(data: &[u8]) -> CoreResult<u64> {
    if data.len() < SEGMENT_HEADER_SIZE {
        return Err(CoreError::corrupted_log("segment header too short"));
    }

    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if magic != SEGMENT_MAGIC {
        return Err(CoreError::corrupted_log(format!(
            "bad segment magic {magic:#010x}"
        )));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > SEGMENT_VERSION {
        return Err(CoreError::corrupted_log(format!(
            "unsupported segment version {version}"
        )));
    }

    Ok(u64::from_le_bytes([
        data[6], data[7], data[8], data[9], data[10], data[11], data[12], data[13],
    ]))
}

/// Computes a CRC32 checksum (IEEE polynomial) for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
