//! The raft log: a journal specialized with commit semantics.
//!
//! The log adds the `commit_index` cursor and its invariants to the
//! journal: the cursor only advances, never past `last_index`, and with
//! `flush_on_commit` the fsync happens before the cursor moves so a failed
//! fsync leaves the cursor at its last durable value. Committed entries
//! are immutable; truncation below the cursor is refused.
//!
//! Concurrency follows a single-writer discipline: one appender drives a
//! [`LogWriter`], any number of [`LogReader`] cursors scan concurrently,
//! and commit advancement is published through the [`CommitNotifier`] that
//! wakes the apply thread.

use crate::clock::{Clock, SystemClock};
use crate::config::LogConfig;
use crate::dir::LogDir;
use crate::entry::Entry;
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use std::time::Duration;

/// Shared log state behind the log-level lock.
///
/// Write mode: appender, truncator, compactor swap. Read mode: everything
/// else.
#[derive(Debug)]
pub(crate) struct LogState {
    pub(crate) journal: Journal,
    pub(crate) commit_index: u64,
    pub(crate) read_only: bool,
    /// Truncation points, in order, for reader invalidation.
    pub(crate) truncations: Vec<u64>,
}

/// Publishes commit advancement to waiting threads.
#[derive(Debug, Default)]
pub struct CommitNotifier {
    commit: Mutex<u64>,
    cond: Condvar,
}

impl CommitNotifier {
    /// Records a new commit index and wakes all waiters.
    pub fn publish(&self, index: u64) {
        let mut commit = self.commit.lock();
        if index > *commit {
            *commit = index;
            self.cond.notify_all();
        }
    }

    /// Wakes all waiters without changing the index. Used for shutdown.
    pub fn wake(&self) {
        self.cond.notify_all();
    }

    /// Blocks until the published commit index exceeds `seen` or the
    /// timeout elapses; returns the current published index.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> u64 {
        let mut commit = self.commit.lock();
        if *commit <= seen {
            let _ = self.cond.wait_for(&mut commit, timeout);
        }
        *commit
    }
}

/// A durable, segmented raft log.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct RaftLog {
    inner: Arc<RwLock<LogState>>,
    notifier: Arc<CommitNotifier>,
    clock: Arc<dyn Clock>,
    config: LogConfig,
}

impl RaftLog {
    /// Opens a log with the wall clock as its timestamp source.
    pub fn open(config: LogConfig) -> CoreResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens a log with an explicit timestamp source.
    pub fn open_with_clock(config: LogConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let dir = Arc::new(LogDir::open(&config.storage_dir)?);
        let journal = Journal::open(dir, config.segment_size)?;

        // The commit cursor is not persisted; the external leader
        // re-establishes it after recovery.
        let commit_index = journal.first_index().saturating_sub(1);

        Ok(Self {
            inner: Arc::new(RwLock::new(LogState {
                journal,
                commit_index,
                read_only: false,
                truncations: Vec::new(),
            })),
            notifier: Arc::new(CommitNotifier::default()),
            clock,
            config,
        })
    }

    /// Returns a writer handle.
    ///
    /// The log follows a single-writer discipline: exactly one thread, the
    /// appender, should hold a writer.
    #[must_use]
    pub fn writer(&self) -> LogWriter {
        LogWriter {
            log: self.clone(),
            term: 0,
        }
    }

    /// Returns a forward cursor positioned at `start_index`.
    #[must_use]
    pub fn reader(&self, start_index: u64) -> LogReader {
        let truncations_seen = self.inner.read().truncations.len();
        LogReader {
            inner: Arc::clone(&self.inner),
            next_index: start_index,
            truncations_seen,
        }
    }

    /// Reads the entry at `index`. `Ok(None)` is a compacted hole.
    pub fn read(&self, index: u64) -> CoreResult<Option<Entry>> {
        self.inner.read().journal.read(index)
    }

    /// Oldest retained index.
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.inner.read().journal.first_index()
    }

    /// Highest appended index.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.inner.read().journal.last_index()
    }

    /// Highest committed index.
    #[must_use]
    pub fn commit_index(&self) -> u64 {
        self.inner.read().commit_index
    }

    /// Number of on-disk segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.inner.read().journal.segment_count()
    }

    /// The notifier that publishes commit advancement.
    #[must_use]
    pub fn notifier(&self) -> Arc<CommitNotifier> {
        Arc::clone(&self.notifier)
    }

    /// The log's timestamp source.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// The configuration this log was opened with.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub(crate) fn state_read(&self) -> RwLockReadGuard<'_, LogState> {
        self.inner.read()
    }

    pub(crate) fn state_write(&self) -> RwLockWriteGuard<'_, LogState> {
        self.inner.write()
    }
}

/// Exclusive append/commit/truncate handle for the log.
#[derive(Debug)]
pub struct LogWriter {
    log: RaftLog,
    term: u64,
}

impl LogWriter {
    /// Sets the term stamped on subsequent appends.
    pub fn set_term(&mut self, term: u64) {
        self.term = term;
    }

    /// The term stamped on subsequent appends.
    #[must_use]
    pub fn term(&self) -> u64 {
        self.term
    }

    /// Appends an operation, returning its assigned index.
    ///
    /// A failed write degrades the log to read-only: the bytes on disk are
    /// no longer trustworthy past the last fsync, so further appends are
    /// refused until the log is reopened.
    pub fn append(&mut self, payload: Vec<u8>) -> CoreResult<u64> {
        let timestamp = self.log.clock.now_ms();
        let mut state = self.log.inner.write();

        if state.read_only {
            return Err(CoreError::ReadOnly);
        }

        match state.journal.append(self.term, timestamp, payload) {
            Ok(index) => Ok(index),
            Err(err @ CoreError::Io(_)) => {
                tracing::error!(%err, "append failed; log degraded to read-only");
                state.read_only = true;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Advances the commit cursor to `index` (clamped to `last_index`).
    ///
    /// Monotonic: committing at or below the cursor is a no-op. With
    /// `flush_on_commit`, the active segment is fsynced before the cursor
    /// moves; an fsync failure leaves the cursor untouched.
    ///
    /// Returns the commit index after the call.
    pub fn commit(&mut self, index: u64) -> CoreResult<u64> {
        let target = {
            let mut state = self.log.inner.write();
            let target = index.min(state.journal.last_index());
            if target <= state.commit_index {
                return Ok(state.commit_index);
            }

            if self.log.config.flush_on_commit {
                state.journal.flush()?;
            }
            state.commit_index = target;
            target
        };

        self.log.notifier.publish(target);
        Ok(target)
    }

    /// Removes all entries with index greater than `index`.
    ///
    /// # Errors
    ///
    /// `CannotTruncateCommitted` when `index` is at or below the commit
    /// cursor.
    pub fn truncate(&mut self, index: u64) -> CoreResult<()> {
        let mut state = self.log.inner.write();

        if index <= state.commit_index {
            return Err(CoreError::CannotTruncateCommitted {
                index,
                commit_index: state.commit_index,
            });
        }

        state.journal.truncate(index)?;
        state.truncations.push(index);
        Ok(())
    }

    /// Fsyncs the active segment.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.log.inner.write().journal.flush()
    }
}

/// A forward cursor over the log.
///
/// Readers skip compacted holes. A reader whose consumed history is
/// rewritten by truncation reports `ReaderInvalidated` on its next
/// advance; truncation at or ahead of the cursor merely shortens the
/// readable range.
#[derive(Debug)]
pub struct LogReader {
    inner: Arc<RwLock<LogState>>,
    next_index: u64,
    truncations_seen: usize,
}

impl LogReader {
    /// The index the next successful advance will return.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Advances past `index` without reading. Used after out-of-band
    /// catch-up (e.g. snapshot install).
    pub fn skip_to(&mut self, index: u64) {
        self.next_index = self.next_index.max(index);
    }

    /// Returns the next present entry, or `Ok(None)` at the end of the
    /// appended log.
    pub fn next(&mut self) -> CoreResult<Option<Entry>> {
        let state = self.inner.read();

        for &truncated_at in &state.truncations[self.truncations_seen..] {
            if truncated_at + 1 < self.next_index {
                return Err(CoreError::ReaderInvalidated {
                    index: self.next_index,
                });
            }
        }
        self.truncations_seen = state.truncations.len();

        while self.next_index <= state.journal.last_index() {
            let index = self.next_index;
            match state.journal.read(index) {
                Ok(Some(entry)) => {
                    self.next_index += 1;
                    return Ok(Some(entry));
                }
                // A hole or a compacted prefix: skip forward.
                Ok(None) | Err(CoreError::OutOfBounds { .. }) => {
                    self.next_index += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_log(path: &std::path::Path) -> RaftLog {
        RaftLog::open(LogConfig::new(path)).unwrap()
    }

    #[test]
    fn append_then_read() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());
        let mut writer = log.writer();

        writer.set_term(2);
        let index = writer.append(b"hello".to_vec()).unwrap();
        assert_eq!(index, 1);

        let entry = log.read(1).unwrap().unwrap();
        assert_eq!(entry.payload, b"hello");
        assert_eq!(entry.term, 2);
    }

    #[test]
    fn commit_is_monotonic_and_clamped() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());
        let mut writer = log.writer();

        for _ in 0..3 {
            writer.append(b"x".to_vec()).unwrap();
        }

        assert_eq!(writer.commit(2).unwrap(), 2);
        assert_eq!(writer.commit(1).unwrap(), 2);
        assert_eq!(log.commit_index(), 2);

        // Commit beyond last_index clamps.
        assert_eq!(writer.commit(100).unwrap(), 3);
        assert_eq!(log.commit_index(), 3);
    }

    #[test]
    fn truncate_committed_is_refused() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());
        let mut writer = log.writer();

        for _ in 0..5 {
            writer.append(b"x".to_vec()).unwrap();
        }
        writer.commit(3).unwrap();

        let result = writer.truncate(3);
        assert!(matches!(
            result,
            Err(CoreError::CannotTruncateCommitted { .. })
        ));
        writer.truncate(4).unwrap();
        assert_eq!(log.last_index(), 4);
    }

    #[test]
    fn commit_publishes_to_notifier() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());
        let mut writer = log.writer();
        let notifier = log.notifier();

        writer.append(b"x".to_vec()).unwrap();
        writer.commit(1).unwrap();

        assert_eq!(notifier.wait_past(0, Duration::from_millis(1)), 1);
    }

    #[test]
    fn reader_scans_in_order() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());
        let mut writer = log.writer();

        for payload in [b"a".as_ref(), b"b".as_ref(), b"c".as_ref()] {
            writer.append(payload.to_vec()).unwrap();
        }

        let mut reader = log.reader(1);
        assert_eq!(reader.next().unwrap().unwrap().payload, b"a");
        assert_eq!(reader.next().unwrap().unwrap().payload, b"b");
        assert_eq!(reader.next().unwrap().unwrap().payload, b"c");
        assert!(reader.next().unwrap().is_none());

        // New appends become visible without re-creating the reader.
        writer.append(b"d".to_vec()).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().payload, b"d");
    }

    #[test]
    fn reader_invalidated_by_truncation_below_cursor() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());
        let mut writer = log.writer();

        for _ in 0..5 {
            writer.append(b"x".to_vec()).unwrap();
        }

        let mut reader = log.reader(1);
        for _ in 0..4 {
            reader.next().unwrap().unwrap();
        }

        // Reader consumed 1..=4; rewriting index 3 invalidates it.
        writer.truncate(2).unwrap();
        assert!(matches!(
            reader.next(),
            Err(CoreError::ReaderInvalidated { .. })
        ));
    }

    #[test]
    fn reader_survives_truncation_ahead_of_cursor() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());
        let mut writer = log.writer();

        for _ in 0..5 {
            writer.append(b"old".to_vec()).unwrap();
        }

        let mut reader = log.reader(1);
        reader.next().unwrap().unwrap();

        // Reader consumed only index 1; truncating at 2 leaves its history
        // intact.
        writer.truncate(2).unwrap();
        writer.append(b"new".to_vec()).unwrap();

        assert_eq!(reader.next().unwrap().unwrap().payload, b"old");
        assert_eq!(reader.next().unwrap().unwrap().payload, b"new");
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let _log = open_log(dir.path());

        let result = RaftLog::open(LogConfig::new(dir.path()));
        assert!(matches!(result, Err(CoreError::LogLocked)));
    }

    #[test]
    fn reopen_resets_commit_cursor() {
        let dir = tempdir().unwrap();

        {
            let log = open_log(dir.path());
            let mut writer = log.writer();
            for _ in 0..3 {
                writer.append(b"x".to_vec()).unwrap();
            }
            writer.commit(3).unwrap();
        }

        let log = open_log(dir.path());
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.commit_index(), 0);
    }
}
