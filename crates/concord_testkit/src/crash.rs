//! Crash-recovery harness.
//!
//! Utilities for simulating crashes by mangling segment files between a
//! close and a reopen: truncating at a chosen byte (a torn write) or
//! flipping a byte (bit rot). Recovery policy under test: torn tail
//! writes are discarded silently, corruption below the tail is fatal.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Path of the segment file starting at `first_index` inside a log dir.
#[must_use]
pub fn segment_file(log_dir: &Path, first_index: u64) -> PathBuf {
    log_dir.join(format!("{first_index}.log"))
}

/// Truncates a file to `keep_len` bytes, simulating a torn write.
pub fn truncate_file(path: &Path, keep_len: u64) {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("open file for truncation");
    file.set_len(keep_len).expect("truncate file");
}

/// Chops `drop_bytes` off the end of a file.
pub fn chop_file(path: &Path, drop_bytes: u64) {
    let len = std::fs::metadata(path).expect("stat file").len();
    truncate_file(path, len.saturating_sub(drop_bytes));
}

/// Flips one byte at `offset`, simulating bit rot.
pub fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("open file for corruption");

    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.read_exact(&mut byte).expect("read byte");
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).expect("seek back");
    file.write_all(&byte).expect("write byte");
}
