//! A single append-only segment file.
//!
//! A segment persists a contiguous slice of the log as one file: the
//! header described in [`crate::entry`], then length-prefixed entry
//! records. The segment talks to the file directly - reads and appends
//! are record-granular, never raw byte ranges - and keeps an in-memory
//! index-to-offset map so positional reads stay O(log n) even after
//! compaction punches holes in the index sequence.
//!
//! ## I/O discipline
//!
//! - `size` is the segment's own append cursor, advanced record by
//!   record; it is authoritative, not the OS file length (recovery
//!   truncates the file back to it when they disagree).
//! - The one durability point is `sync()` (`fsync`); the journal invokes
//!   it when sealing a segment, on explicit flush, and on the commit path.
//! - Reads seek on a shared file handle, so they serialize on a cursor
//!   mutex; appends and truncation go through `&mut self` and reuse the
//!   same handle without locking.

use crate::entry::{
    decode_segment_header, encode_segment_header, Entry, CRC_SIZE, ENTRY_FIXED_SIZE,
    SEGMENT_HEADER_SIZE,
};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Outcome of scanning a segment's records at open time.
///
/// A dirty stop means the scan hit a short record, a nonsense length word,
/// or a CRC failure. Whether that is a tolerated torn tail write or fatal
/// corruption is the journal's call: only the tail segment may be dirty.
#[derive(Debug, Clone, Copy)]
pub struct ScanOutcome {
    /// Whether the scan ended at end-of-file or a zero length word.
    pub clean: bool,
    /// Offset of the first byte past the last valid record.
    pub valid_size: u64,
    /// Bytes past `valid_size` that would be discarded by recovery.
    pub trailing: u64,
}

/// One segment of the journal.
#[derive(Debug)]
pub struct Segment {
    /// Creation ordinal, unique within a journal's lifetime.
    id: u64,
    /// First index this segment was created to hold (header value).
    first_index: u64,
    /// Size cap from configuration.
    size_cap: u64,
    /// Reads seek on this handle, so they hold the cursor mutex.
    file: Mutex<File>,
    /// Present entries: index -> record offset.
    index: BTreeMap<u64, u64>,
    /// Append cursor: header plus every record written so far.
    size: u64,
}

impl Segment {
    /// Creates a fresh segment file, writing its header.
    ///
    /// # Errors
    ///
    /// Fails if the file already exists: a stale file is never silently
    /// extended.
    pub fn create(path: &Path, id: u64, first_index: u64, size_cap: u64) -> CoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&encode_segment_header(first_index))?;

        Ok(Self {
            id,
            first_index,
            size_cap,
            file: Mutex::new(file),
            index: BTreeMap::new(),
            size: SEGMENT_HEADER_SIZE as u64,
        })
    }

    /// Opens an existing segment file, scanning its records.
    ///
    /// The scan validates each record's CRC and stops at the first invalid
    /// one; the returned [`ScanOutcome`] reports where and why. The caller
    /// decides whether a dirty stop is recoverable.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedLog` if the header itself is missing or invalid.
    pub fn open(path: &Path, id: u64, size_cap: u64) -> CoreResult<(Self, ScanOutcome)> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < SEGMENT_HEADER_SIZE as u64 {
            return Err(CoreError::corrupted_log("segment file shorter than header"));
        }

        let mut header = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header)?;
        let first_index = decode_segment_header(&header)?;

        let (index, outcome) = Self::scan(&mut file, file_size, first_index)?;

        Ok((
            Self {
                id,
                first_index,
                size_cap,
                file: Mutex::new(file),
                index,
                size: file_size,
            },
            outcome,
        ))
    }

    /// Walks the records after the header, building the offset map. The
    /// file cursor is already positioned past the header.
    fn scan(
        file: &mut File,
        file_size: u64,
        first_index: u64,
    ) -> CoreResult<(BTreeMap<u64, u64>, ScanOutcome)> {
        let mut index = BTreeMap::new();
        let mut offset = SEGMENT_HEADER_SIZE as u64;
        let mut previous_index = 0u64;

        let clean = loop {
            let remaining = file_size - offset;
            if remaining == 0 {
                break true;
            }
            if remaining < 4 {
                break false;
            }

            let mut len_bytes = [0u8; 4];
            file.read_exact(&mut len_bytes)?;
            let length = u64::from(u32::from_le_bytes(len_bytes));
            if length == 0 {
                // Zero padding reads as end-of-data.
                break true;
            }
            if length < ENTRY_FIXED_SIZE as u64 || length + CRC_SIZE as u64 > remaining {
                break false;
            }

            let record_len = length as usize + CRC_SIZE;
            let mut record = vec![0u8; record_len];
            record[..4].copy_from_slice(&len_bytes);
            file.read_exact(&mut record[4..])?;

            let entry = match Entry::decode(&record) {
                Ok(entry) => entry,
                Err(_) => break false,
            };
            if entry.index < first_index || entry.index <= previous_index {
                break false;
            }

            previous_index = entry.index;
            index.insert(entry.index, offset);
            offset += record_len as u64;
        };

        Ok((
            index,
            ScanOutcome {
                clean,
                valid_size: offset,
                trailing: file_size - offset,
            },
        ))
    }

    /// Discards everything past the last valid record.
    ///
    /// Used by tail recovery after a dirty scan, and to drop padding so
    /// the append cursor lands at the true end of data.
    pub fn truncate_to(&mut self, valid_size: u64) -> CoreResult<()> {
        let file = self.file.get_mut();
        file.set_len(valid_size)?;
        file.sync_all()?;
        self.size = valid_size;
        Ok(())
    }

    /// Appends an entry, returning its record offset.
    ///
    /// The record is written at the segment's own append cursor, not the
    /// OS end-of-file.
    ///
    /// # Errors
    ///
    /// Returns `SegmentFull` when the record would push the segment past
    /// its size cap. A single oversized entry is admitted into an empty
    /// segment so the journal cannot livelock on rolling.
    pub fn append(&mut self, entry: &Entry) -> CoreResult<u64> {
        let record = entry.encode();

        if !self.index.is_empty() && self.size + record.len() as u64 > self.size_cap {
            return Err(CoreError::SegmentFull);
        }

        let offset = self.size;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&record)?;

        self.index.insert(entry.index, offset);
        self.size += record.len() as u64;
        Ok(offset)
    }

    /// Reads the entry at `index`.
    ///
    /// Returns `Ok(None)` when the index falls in this segment's range but
    /// was removed by compaction.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` when the record fails CRC validation; the log
    /// layer decides whether that is fatal.
    pub fn read(&self, index: u64) -> CoreResult<Option<Entry>> {
        let Some(&offset) = self.index.get(&index) else {
            return Ok(None);
        };

        let file = self.file.lock();
        let mut reader: &File = &file;
        reader.seek(SeekFrom::Start(offset))?;

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let length = u32::from_le_bytes(len_bytes) as usize;
        if length < ENTRY_FIXED_SIZE || offset + (length + CRC_SIZE) as u64 > self.size {
            return Err(CoreError::corrupted(
                self.id,
                offset,
                "record length out of range",
            ));
        }

        let mut record = vec![0u8; length + CRC_SIZE];
        record[..4].copy_from_slice(&len_bytes);
        reader.read_exact(&mut record[4..])?;

        match Entry::decode(&record) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => Err(CoreError::corrupted(self.id, offset, err.to_string())),
        }
    }

    /// Reads every present entry in index order.
    pub fn entries(&self) -> CoreResult<Vec<Entry>> {
        let mut entries = Vec::with_capacity(self.index.len());
        for &index in self.index.keys() {
            if let Some(entry) = self.read(index)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Removes all entries with index greater than `index`, truncating the
    /// file at the first removed record.
    pub fn truncate(&mut self, index: u64) -> CoreResult<()> {
        let Some(&first_removed_offset) = self.index.range(index + 1..).map(|(_, o)| o).next()
        else {
            return Ok(());
        };

        let file = self.file.get_mut();
        file.set_len(first_removed_offset)?;
        file.sync_all()?;
        self.size = first_removed_offset;
        self.index.retain(|&i, _| i <= index);
        Ok(())
    }

    /// Fsyncs the segment file. The single durability point: data is
    /// crash-safe only up to the last successful call.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.file.get_mut().sync_all()?;
        Ok(())
    }

    /// Creation ordinal of this segment.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// First index this segment was created to hold.
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Smallest present entry index, if any.
    #[must_use]
    pub fn first_entry(&self) -> Option<u64> {
        self.index.keys().next().copied()
    }

    /// Largest present entry index, if any.
    #[must_use]
    pub fn last_entry(&self) -> Option<u64> {
        self.index.keys().next_back().copied()
    }

    /// Number of present entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the segment holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Current size in bytes (header plus records).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether `index` is present in this segment.
    #[must_use]
    pub fn contains(&self, index: u64) -> bool {
        self.index.contains_key(&index)
    }
}
