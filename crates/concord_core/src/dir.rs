//! Log directory management.
//!
//! This module handles the file system layout for a concord log:
//!
//! ```text
//! <storage_dir>/
//! ├─ LOCK             # Advisory lock for single-process access
//! ├─ 1.log            # Segment starting at index 1
//! ├─ 4097.log         # Segment starting at index 4097
//! └─ 4097.log.tmp     # In-flight compaction rewrite (deleted on open)
//! ```
//!
//! Segment files are named by their first index. A compaction rewrite is
//! written to `<firstIndex>.log.tmp` and renamed over the final name; the
//! rename is the commit point, so a `.tmp` file found at open time is an
//! abandoned pass and is removed.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const SEGMENT_EXT: &str = "log";
const TMP_EXT: &str = "tmp";

/// Manages the log directory structure and file locking.
///
/// # Thread Safety
///
/// The `LogDir` holds an exclusive advisory lock on the directory. Only
/// one `LogDir` instance can exist per directory at a time, across
/// processes.
#[derive(Debug)]
pub struct LogDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl LogDir {
    /// Opens or creates a log directory and acquires its lock.
    ///
    /// # Errors
    ///
    /// Returns `LogLocked` if another process holds the lock, and I/O
    /// errors for directory or lock file failures.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(CoreError::corrupted_log(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::LogLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the segment file starting at `first_index`.
    #[must_use]
    pub fn segment_path(&self, first_index: u64) -> PathBuf {
        self.path.join(format!("{first_index}.{SEGMENT_EXT}"))
    }

    /// Returns the temporary path used while rewriting the segment
    /// starting at `first_index`.
    #[must_use]
    pub fn tmp_segment_path(&self, first_index: u64) -> PathBuf {
        self.path
            .join(format!("{first_index}.{SEGMENT_EXT}.{TMP_EXT}"))
    }

    /// Lists segment first-indices present in the directory, sorted.
    ///
    /// Files that do not match `<number>.log` are ignored.
    pub fn list_segments(&self) -> CoreResult<Vec<u64>> {
        let mut first_indices = Vec::new();

        for dirent in fs::read_dir(&self.path)? {
            let name = dirent?.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".log") else {
                continue;
            };
            if let Ok(first_index) = stem.parse::<u64>() {
                first_indices.push(first_index);
            }
        }

        first_indices.sort_unstable();
        Ok(first_indices)
    }

    /// Deletes abandoned `*.log.tmp` files left by a crashed compaction.
    ///
    /// Returns how many were removed.
    pub fn remove_stale_tmp_files(&self) -> CoreResult<usize> {
        let mut removed = 0;

        for dirent in fs::read_dir(&self.path)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".log.tmp") {
                fs::remove_file(dirent.path())?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "removed abandoned compaction tmp files");
            self.sync_dir()?;
        }
        Ok(removed)
    }

    /// Promotes a finished rewrite: renames `<firstIndex>.log.tmp` over
    /// `<firstIndex>.log` and fsyncs the directory.
    ///
    /// The rename is the compaction commit point.
    pub fn promote_tmp_segment(&self, first_index: u64) -> CoreResult<()> {
        fs::rename(
            self.tmp_segment_path(first_index),
            self.segment_path(first_index),
        )?;
        self.sync_dir()
    }

    /// Removes the segment file starting at `first_index` and fsyncs the
    /// directory.
    pub fn remove_segment(&self, first_index: u64) -> CoreResult<()> {
        fs::remove_file(self.segment_path(first_index))?;
        self.sync_dir()
    }

    /// Fsyncs the directory itself so renames and deletions are durable.
    pub fn sync_dir(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }
}
