//! Log configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for opening a raft log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding segment files and the LOCK file.
    pub storage_dir: PathBuf,

    /// Maximum size of a single segment file before rolling.
    pub segment_size: u64,

    /// Whether `commit` fsyncs the active segment before advancing the
    /// commit cursor (safer but slower).
    pub flush_on_commit: bool,

    /// Fraction of a segment's entries that must be reclaimable before a
    /// minor compaction pass rewrites it.
    pub compaction_minor_threshold: f64,

    /// Interval between major compaction passes.
    pub compaction_major_interval: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("raft-log"),
            segment_size: 32 * 1024 * 1024, // 32 MB
            flush_on_commit: true,
            compaction_minor_threshold: 0.5,
            compaction_major_interval: Duration::from_secs(60),
        }
    }
}

impl LogConfig {
    /// Creates a configuration rooted at the given directory.
    #[must_use]
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the maximum segment file size.
    #[must_use]
    pub const fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets whether commit fsyncs before advancing.
    #[must_use]
    pub const fn flush_on_commit(mut self, value: bool) -> Self {
        self.flush_on_commit = value;
        self
    }

    /// Sets the minor compaction rewrite threshold.
    #[must_use]
    pub fn compaction_minor_threshold(mut self, ratio: f64) -> Self {
        self.compaction_minor_threshold = ratio;
        self
    }

    /// Sets the interval between major compaction passes.
    #[must_use]
    pub const fn compaction_major_interval(mut self, interval: Duration) -> Self {
        self.compaction_major_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LogConfig::default();
        assert!(config.flush_on_commit);
        assert_eq!(config.segment_size, 32 * 1024 * 1024);
        assert!((config.compaction_minor_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn builder_pattern() {
        let config = LogConfig::new("/tmp/log")
            .segment_size(1024)
            .flush_on_commit(false)
            .compaction_minor_threshold(0.25);

        assert_eq!(config.storage_dir, PathBuf::from("/tmp/log"));
        assert_eq!(config.segment_size, 1024);
        assert!(!config.flush_on_commit);
        assert!((config.compaction_minor_threshold - 0.25).abs() < f64::EPSILON);
    }
}
