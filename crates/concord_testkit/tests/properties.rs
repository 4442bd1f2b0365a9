//! Property-based suites over the log and runtime invariants.

use concord_core::{
    ApplyError, Commit, CoreError, LogConfig, RaftLog, SessionId, StateMachine,
    StateMachineRuntime, SEGMENT_HEADER_SIZE,
};
use concord_testkit::crash::{segment_file, truncate_file};
use concord_testkit::fixtures::ByteCodec;
use concord_testkit::generators::{log_ops_strategy, payload_strategy, LogOp};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::tempdir;

/// Machine that records every applied index.
struct RecordingMachine {
    applied: Vec<u64>,
}

impl StateMachine for RecordingMachine {
    type Command = Vec<u8>;
    type Output = ();

    fn apply(&mut self, commit: Commit<Vec<u8>>) -> Result<(), ApplyError> {
        self.applied.push(commit.index());
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Properties 1 and 3: for any schedule, `commit_index <= last_index`,
    /// both cursors are non-decreasing except through truncation, and
    /// truncation at or below the commit cursor is refused.
    #[test]
    fn cursors_track_model(ops in log_ops_strategy(40)) {
        let dir = tempdir().unwrap();
        let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
        let mut writer = log.writer();

        let mut model_last = 0u64;
        let mut model_commit = 0u64;

        for op in ops {
            match op {
                LogOp::Append(payload) => {
                    let index = writer.append(payload).unwrap();
                    model_last += 1;
                    prop_assert_eq!(index, model_last);
                }
                LogOp::Commit(i) => {
                    let committed = writer.commit(i).unwrap();
                    model_commit = model_commit.max(i.min(model_last));
                    prop_assert_eq!(committed, model_commit);
                }
                LogOp::Truncate(i) => {
                    let result = writer.truncate(i);
                    if i <= model_commit {
                        let is_expected_err = matches!(
                            result,
                            Err(CoreError::CannotTruncateCommitted { .. })
                        );
                        prop_assert!(is_expected_err);
                    } else {
                        result.unwrap();
                        if i < model_last {
                            model_last = i;
                        }
                    }
                }
            }

            prop_assert_eq!(log.last_index(), model_last);
            prop_assert_eq!(log.commit_index(), model_commit);
            prop_assert!(log.commit_index() <= log.last_index());
        }
    }

    /// Property 2: after `append` returns index `i`, `read(i)` returns the
    /// appended payload.
    #[test]
    fn appended_payloads_read_back(
        payloads in prop::collection::vec(payload_strategy(), 1..16)
    ) {
        let dir = tempdir().unwrap();
        let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
        let mut writer = log.writer();

        for payload in &payloads {
            writer.append(payload.clone()).unwrap();
        }

        for (position, payload) in payloads.iter().enumerate() {
            let entry = log.read(position as u64 + 1).unwrap().unwrap();
            prop_assert_eq!(&entry.payload, payload);
        }
        let is_expected_err = matches!(
            log.read(payloads.len() as u64 + 1),
            Err(CoreError::OutOfBounds { .. })
        );
        prop_assert!(is_expected_err);
    }

    /// Property 5: entries written across segment boundaries survive a
    /// close and reopen byte-for-byte.
    #[test]
    fn reopen_preserves_flushed_entries(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 1..12)
    ) {
        let dir = tempdir().unwrap();
        let config = LogConfig::new(dir.path())
            .segment_size(SEGMENT_HEADER_SIZE as u64 + 120);

        {
            let log = RaftLog::open(config.clone()).unwrap();
            let mut writer = log.writer();
            for payload in &payloads {
                writer.append(payload.clone()).unwrap();
            }
            writer.flush().unwrap();
        }

        let log = RaftLog::open(config).unwrap();
        prop_assert_eq!(log.last_index(), payloads.len() as u64);
        for (position, payload) in payloads.iter().enumerate() {
            let entry = log.read(position as u64 + 1).unwrap().unwrap();
            prop_assert_eq!(&entry.payload, payload);
        }
    }

    /// Property 6: a file truncated at any byte past the segment header
    /// recovers to the last CRC-valid entry.
    #[test]
    fn recovery_finds_last_valid_entry(entries in 1..8u64, cut in 0..340u64) {
        const RECORD: u64 = 40; // 28 fixed + 8 payload + 4 crc

        let dir = tempdir().unwrap();
        {
            let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
            let mut writer = log.writer();
            for i in 0..entries {
                writer.append(vec![i as u8; 8]).unwrap();
            }
            writer.flush().unwrap();
        }

        let path = segment_file(dir.path(), 1);
        let file_len = std::fs::metadata(&path).unwrap().len();
        let keep = (SEGMENT_HEADER_SIZE as u64 + cut).min(file_len);
        truncate_file(&path, keep);

        let expected = ((keep - SEGMENT_HEADER_SIZE as u64) / RECORD).min(entries);

        let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
        prop_assert_eq!(log.last_index(), expected);
        for i in 1..=expected {
            prop_assert!(log.read(i).unwrap().is_some());
        }
    }

    /// Property 7: the sequence of indices passed to apply handlers is
    /// exactly `1, 2, ... commit_index`, no repeats, no gaps, for any
    /// commit schedule.
    #[test]
    fn apply_sees_every_committed_index_once(
        total in 1..24u64,
        commits in prop::collection::vec(0..32u64, 1..6)
    ) {
        let dir = tempdir().unwrap();
        let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
        let runtime = StateMachineRuntime::new(
            log.clone(),
            RecordingMachine { applied: Vec::new() },
            Arc::new(ByteCodec),
        );
        let mut writer = log.writer();

        for i in 0..total {
            let payload = runtime.encode_command(SessionId::new(1), &vec![i as u8]);
            writer.append(payload).unwrap();
        }

        for commit in commits {
            writer.commit(commit).unwrap();
            runtime.apply_ready().unwrap();
        }
        writer.commit(total).unwrap();
        runtime.apply_ready().unwrap();

        let expected: Vec<u64> = (1..=log.commit_index()).collect();
        let machine = runtime.machine();
        prop_assert_eq!(&machine.read().applied, &expected);
    }
}
