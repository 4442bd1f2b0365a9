//! The journal: one logical append-only array over the segment files.
//!
//! The journal owns the segment collection. It resolves positional reads
//! by binary search over segment first-indices, rolls to a new segment
//! when the active tail fills, and performs load-time recovery:
//! tail-truncating torn writes, deleting segments superseded by a crashed
//! compaction, and failing on genuine gaps.

use crate::dir::LogDir;
use crate::entry::Entry;
use crate::error::{CoreError, CoreResult};
use crate::segment::Segment;
use std::sync::Arc;

/// Metadata snapshot of one segment, used by the compactor.
#[derive(Debug, Clone)]
pub(crate) struct SegmentMeta {
    /// Creation ordinal.
    pub id: u64,
    /// Header first index (also the file name).
    pub first_index: u64,
    /// Largest present entry index, if any.
    pub last_entry: Option<u64>,
    /// Whether this is the active tail.
    pub is_tail: bool,
}

/// A logical append-only array of entries backed by segment files.
#[derive(Debug)]
pub struct Journal {
    dir: Arc<LogDir>,
    segment_size: u64,
    /// Sorted by `first_index`; the last element is the active tail.
    segments: Vec<Segment>,
    next_segment_id: u64,
    /// Highest appended index; 0 when the journal has never held entries.
    last_index: u64,
}

impl Journal {
    /// Opens the journal, performing crash recovery.
    ///
    /// Recovery policy (tolerated vs fatal):
    /// - stale `*.log.tmp` files are deleted (abandoned compaction)
    /// - a torn or header-less tail segment is truncated or deleted
    /// - a non-tail segment whose range is covered by its predecessor is a
    ///   crashed compaction leftover and is deleted
    /// - an invalid record in a non-tail segment is fatal `Corrupted`
    /// - a gap between segment ranges is fatal `CorruptedLog`
    pub fn open(dir: Arc<LogDir>, segment_size: u64) -> CoreResult<Self> {
        dir.remove_stale_tmp_files()?;

        let mut journal = Self {
            dir,
            segment_size,
            segments: Vec::new(),
            next_segment_id: 1,
            last_index: 0,
        };

        let first_indices = journal.dir.list_segments()?;
        let file_count = first_indices.len();

        for (position, first_index) in first_indices.iter().copied().enumerate() {
            let is_last_file = position + 1 == file_count;
            let path = journal.dir.segment_path(first_index);
            let id = journal.next_segment_id;

            let (mut segment, outcome) = match Segment::open(&path, id, segment_size) {
                Ok(opened) => opened,
                Err(err) if is_last_file => {
                    // Torn segment creation: the file never got a full
                    // header before the crash.
                    tracing::warn!(first_index, %err, "deleting unreadable tail segment");
                    journal.dir.remove_segment(first_index)?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            if segment.first_index() != first_index {
                return Err(CoreError::corrupted_log(format!(
                    "segment file {first_index}.log has header first index {}",
                    segment.first_index()
                )));
            }

            if !outcome.clean {
                if is_last_file {
                    tracing::warn!(
                        first_index,
                        discarded = outcome.trailing,
                        "truncating torn tail segment"
                    );
                    segment.truncate_to(outcome.valid_size)?;
                } else {
                    return Err(CoreError::corrupted(
                        id,
                        outcome.valid_size,
                        "invalid record in non-tail segment",
                    ));
                }
            } else if is_last_file && outcome.trailing > 0 {
                // Zero padding after the last record; drop it so appends
                // land at the true end of data.
                segment.truncate_to(outcome.valid_size)?;
            }

            journal.next_segment_id += 1;
            journal.admit_segment(segment)?;
        }

        if journal.segments.is_empty() {
            journal.create_segment(1)?;
        }

        journal.last_index = journal
            .segments
            .iter()
            .rev()
            .find_map(Segment::last_entry)
            .unwrap_or_else(|| journal.tail().first_index() - 1);

        Ok(journal)
    }

    /// Validates a loaded segment against its predecessor and admits it,
    /// deleting it instead when a crashed compaction already superseded it.
    fn admit_segment(&mut self, segment: Segment) -> CoreResult<()> {
        if let Some(prev) = self.segments.last() {
            if segment.first_index() <= prev.first_index() {
                return Err(CoreError::corrupted_log(format!(
                    "segment {}.log does not advance past segment {}.log",
                    segment.first_index(),
                    prev.first_index()
                )));
            }

            // Only a non-empty predecessor pins down a verifiable range.
            if let Some(prev_last) = prev.last_entry() {
                if segment.first_index() <= prev_last {
                    let covered = segment.last_entry().map_or(true, |last| last <= prev_last);
                    if covered {
                        // The predecessor is a newer compaction output that
                        // already owns this range; the crash happened before
                        // the superseded file was deleted.
                        tracing::info!(
                            first_index = segment.first_index(),
                            "deleting segment superseded by compaction"
                        );
                        self.dir.remove_segment(segment.first_index())?;
                        return Ok(());
                    }
                    return Err(CoreError::corrupted_log(format!(
                        "segments overlap at index {}",
                        segment.first_index()
                    )));
                }

                if segment.first_index() > prev_last + 1 {
                    return Err(CoreError::corrupted_log(format!(
                        "gap between index {} and segment {}.log",
                        prev_last,
                        segment.first_index()
                    )));
                }
            }
        }

        self.segments.push(segment);
        Ok(())
    }

    /// Creates a fresh segment starting at `first_index` and makes it the
    /// active tail.
    fn create_segment(&mut self, first_index: u64) -> CoreResult<()> {
        let path = self.dir.segment_path(first_index);
        let id = self.next_segment_id;
        self.next_segment_id += 1;

        let segment = Segment::create(&path, id, first_index, self.segment_size)?;
        tracing::debug!(first_index, id, "created segment");
        self.segments.push(segment);
        Ok(())
    }

    fn tail(&self) -> &Segment {
        self.segments.last().expect("journal always has a tail")
    }

    fn tail_mut(&mut self) -> &mut Segment {
        self.segments.last_mut().expect("journal always has a tail")
    }

    /// Appends an operation, assigning it the next index.
    ///
    /// Rolls to a new segment when the active tail is full.
    pub fn append(&mut self, term: u64, timestamp: i64, payload: Vec<u8>) -> CoreResult<u64> {
        let index = self.last_index + 1;
        let entry = Entry::new(index, term, timestamp, payload);

        match self.tail_mut().append(&entry) {
            Ok(_) => {}
            Err(CoreError::SegmentFull) => {
                // Seal the tail durably before opening its successor.
                self.tail_mut().sync()?;
                self.create_segment(index)?;
                self.tail_mut().append(&entry)?;
            }
            Err(err) => return Err(err),
        }

        self.last_index = index;
        Ok(index)
    }

    /// Oldest retained index. `last_index + 1` on an empty journal.
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.segments
            .iter()
            .find_map(Segment::first_entry)
            .unwrap_or(self.last_index + 1)
    }

    /// Highest appended index; 0 when the journal has never held entries.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    /// Reads the entry at `index`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` outside `[first_index, last_index]`. A compacted hole
    /// inside the range reads as `Ok(None)`.
    pub fn read(&self, index: u64) -> CoreResult<Option<Entry>> {
        let first = self.first_index();
        if index < first || index > self.last_index {
            return Err(CoreError::out_of_bounds(index, first, self.last_index));
        }

        // Bounded binary search over segment first-indices.
        let position = self
            .segments
            .partition_point(|segment| segment.first_index() <= index);
        if position == 0 {
            return Ok(None);
        }

        self.segments[position - 1].read(index)
    }

    /// Removes all entries with index greater than `index`.
    ///
    /// Whole segments past the truncation point are deleted; the new tail
    /// is truncated in place.
    pub fn truncate(&mut self, index: u64) -> CoreResult<()> {
        if index >= self.last_index {
            return Ok(());
        }

        while self
            .segments
            .last()
            .is_some_and(|segment| segment.first_index() > index)
        {
            let segment = self.segments.pop().expect("checked non-empty");
            self.dir.remove_segment(segment.first_index())?;
        }

        if self.segments.is_empty() {
            self.create_segment(index + 1)?;
        } else {
            self.tail_mut().truncate(index)?;
        }

        self.last_index = index;
        Ok(())
    }

    /// Fsyncs the active segment.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.tail_mut().sync()
    }

    /// Number of segments, the active tail included.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn dir(&self) -> &Arc<LogDir> {
        &self.dir
    }

    pub(crate) fn segment_size(&self) -> u64 {
        self.segment_size
    }

    pub(crate) fn segment_metas(&self) -> Vec<SegmentMeta> {
        let tail_position = self.segments.len().saturating_sub(1);
        self.segments
            .iter()
            .enumerate()
            .map(|(position, segment)| SegmentMeta {
                id: segment.id(),
                first_index: segment.first_index(),
                last_entry: segment.last_entry(),
                is_tail: position == tail_position,
            })
            .collect()
    }

    pub(crate) fn segment_by_first(&self, first_index: u64) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|segment| segment.first_index() == first_index)
    }

    pub(crate) fn alloc_segment_id(&mut self) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    /// Splices a compacted replacement in for the segments named by
    /// `replaced` (sorted first-indices; the first names the replacement
    /// file). The caller has already promoted the rewrite on disk; files
    /// of the remaining superseded segments are deleted here.
    pub(crate) fn install_compacted(
        &mut self,
        replaced: &[u64],
        replacement: Segment,
    ) -> CoreResult<()> {
        let head = replaced[0];
        let position = self
            .segments
            .iter()
            .position(|segment| segment.first_index() == head)
            .ok_or_else(|| {
                CoreError::corrupted_log(format!("compacted segment {head}.log vanished"))
            })?;

        self.segments
            .retain(|segment| !replaced.contains(&segment.first_index()));
        self.segments.insert(position, replacement);

        for &first_index in &replaced[1..] {
            self.dir.remove_segment(first_index)?;
        }
        Ok(())
    }
}
