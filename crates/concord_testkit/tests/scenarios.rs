//! End-to-end scenarios over the log, compactor and state-machine runtime.

use concord_core::{
    ApplyError, Commit, CompactionPolicy, Compactor, CoreError, LogConfig, RaftLog, SessionId,
    StateMachine, StateMachineRuntime, SEGMENT_HEADER_SIZE,
};
use concord_testkit::fixtures::{
    ByteCodec, Mode, SetCommand, SetResponse, TtlSetHarness,
};
use std::sync::Arc;
use tempfile::tempdir;

/// S1: append three payloads, commit, read them back; reading past the
/// end is out of bounds.
#[test]
fn append_commit_read() {
    let dir = tempdir().unwrap();
    let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
    let mut writer = log.writer();

    for payload in [b"A".as_ref(), b"B".as_ref(), b"C".as_ref()] {
        writer.append(payload.to_vec()).unwrap();
    }
    writer.commit(3).unwrap();

    assert_eq!(log.read(1).unwrap().unwrap().payload, b"A");
    assert_eq!(log.read(2).unwrap().unwrap().payload, b"B");
    assert_eq!(log.read(3).unwrap().unwrap().payload, b"C");
    assert!(matches!(log.read(4), Err(CoreError::OutOfBounds { .. })));
}

/// S2: truncation above the commit index works; at or below it is
/// refused.
#[test]
fn truncate_respects_commit() {
    let dir = tempdir().unwrap();
    let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
    let mut writer = log.writer();

    for i in 0..10u8 {
        writer.append(vec![i]).unwrap();
    }
    writer.commit(5).unwrap();

    writer.truncate(7).unwrap();
    assert_eq!(log.last_index(), 7);

    assert!(matches!(
        writer.truncate(4),
        Err(CoreError::CannotTruncateCommitted { .. })
    ));

    for i in 1..=7u64 {
        assert!(log.read(i).unwrap().is_some());
    }
}

/// S3: a segment size that fits exactly one entry produces one file per
/// entry, named by first index.
#[test]
fn one_segment_file_per_entry() {
    let dir = tempdir().unwrap();
    // 8-byte payloads encode to 40-byte records; one fits, two do not.
    let config = LogConfig::new(dir.path()).segment_size(SEGMENT_HEADER_SIZE as u64 + 60);
    let log = RaftLog::open(config).unwrap();
    let mut writer = log.writer();

    for i in 0..5u64 {
        writer.append(vec![i as u8; 8]).unwrap();
    }

    assert_eq!(log.segment_count(), 5);
    for first_index in 1..=5u64 {
        assert!(
            dir.path().join(format!("{first_index}.log")).exists(),
            "expected segment file {first_index}.log"
        );
    }
}

/// S4: a value with a TTL is visible before expiry and reaped after.
#[test]
fn ttl_value_expires_on_logical_clock() {
    let harness = TtlSetHarness::open();
    let session = SessionId::new(1);
    harness.runtime.session_register(session);

    harness.clock.set(1000);
    let added = harness.submit(
        session,
        SetCommand::Add {
            value: 42,
            ttl_ms: 1000,
            mode: Mode::Persistent,
        },
    );
    assert_eq!(added, SetResponse::Flag(true));

    harness.clock.set(1500);
    assert_eq!(
        harness.submit(session, SetCommand::Contains { value: 42 }),
        SetResponse::Flag(true)
    );

    harness.clock.set(2500);
    assert_eq!(
        harness.submit(session, SetCommand::Contains { value: 42 }),
        SetResponse::Flag(false)
    );

    // The expired value was removed, not just hidden.
    assert_eq!(
        harness.submit(session, SetCommand::Size),
        SetResponse::Count(0)
    );
}

/// The TTL boundary is strict: at exactly `timestamp + ttl` the value is
/// still active.
#[test]
fn ttl_boundary_exactly_equal_is_active() {
    let harness = TtlSetHarness::open();
    let session = SessionId::new(1);
    harness.runtime.session_register(session);

    harness.clock.set(1000);
    harness.submit(
        session,
        SetCommand::Add {
            value: 7,
            ttl_ms: 1000,
            mode: Mode::Persistent,
        },
    );

    harness.clock.set(2000);
    assert_eq!(
        harness.submit(session, SetCommand::Contains { value: 7 }),
        SetResponse::Flag(true)
    );

    harness.clock.set(2001);
    assert_eq!(
        harness.submit(session, SetCommand::Contains { value: 7 }),
        SetResponse::Flag(false)
    );
}

/// S5: an ephemeral value dies with its session.
#[test]
fn ephemeral_value_dies_with_session() {
    let harness = TtlSetHarness::open();
    let owner = SessionId::new(7);
    let observer = SessionId::new(8);
    harness.runtime.session_register(owner);
    harness.runtime.session_register(observer);

    harness.clock.set(1000);
    let added = harness.submit(
        owner,
        SetCommand::Add {
            value: 9,
            ttl_ms: 0,
            mode: Mode::Ephemeral,
        },
    );
    assert_eq!(added, SetResponse::Flag(true));

    assert_eq!(
        harness.submit(observer, SetCommand::Contains { value: 9 }),
        SetResponse::Flag(true)
    );

    harness.runtime.session_expire(owner);

    assert_eq!(
        harness.submit(observer, SetCommand::Contains { value: 9 }),
        SetResponse::Flag(false)
    );
}

/// Machine whose filter keeps odd indices only. Used to drive S6.
struct ParityMachine;

impl StateMachine for ParityMachine {
    type Command = Vec<u8>;
    type Output = ();

    fn apply(&mut self, _commit: Commit<Vec<u8>>) -> Result<(), ApplyError> {
        Ok(())
    }

    fn filter(
        &self,
        commit: &Commit<Vec<u8>>,
        _compaction: &concord_core::Compaction,
    ) -> bool {
        commit.index() % 2 == 1
    }

    fn policy(&self, _command: &Vec<u8>) -> CompactionPolicy {
        CompactionPolicy::Minor
    }
}

/// S6: minor compaction removes filtered entries, leaves the commit
/// cursor alone, and the result survives a reopen.
#[test]
fn minor_compaction_end_to_end() {
    let dir = tempdir().unwrap();

    {
        let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
        let runtime =
            StateMachineRuntime::new(log.clone(), ParityMachine, Arc::new(ByteCodec));
        let mut writer = log.writer();

        for i in 0..100u64 {
            let payload = runtime.encode_command(SessionId::new(0), &vec![i as u8]);
            writer.append(payload).unwrap();
        }
        writer.commit(100).unwrap();
        runtime.apply_ready().unwrap();

        let compactor = Compactor::new(log.clone(), runtime.filter(), runtime.pins());
        let stats = compactor.compact_segment(1).unwrap();
        assert_eq!(stats.entries_discarded, 50);

        for i in (1..=99u64).step_by(2) {
            assert!(log.read(i).unwrap().is_some(), "odd index {i} must survive");
        }
        for i in (2..=100u64).step_by(2) {
            assert!(log.read(i).unwrap().is_none(), "even index {i} must be gone");
        }

        assert_eq!(log.commit_index(), 100);
        assert_eq!(log.last_index(), 100);
    }

    // Reopen: surviving entries are intact. Index 100 was compacted away,
    // so the recovered last index is 99.
    let log = RaftLog::open(LogConfig::new(dir.path())).unwrap();
    assert_eq!(log.last_index(), 99);

    for i in (1..=99u64).step_by(2) {
        assert!(log.read(i).unwrap().is_some());
    }
    for i in (2..=98u64).step_by(2) {
        assert!(log.read(i).unwrap().is_none());
    }
    assert!(matches!(log.read(100), Err(CoreError::OutOfBounds { .. })));
}

/// Tombstone lifecycle across passes: a Remove survives minor compaction
/// and is reclaimed once a major pass moves past it.
#[test]
fn remove_survives_minor_until_major() {
    let harness = TtlSetHarness::open_with_config(|config| {
        // Entries land in many small segments so major compaction has a
        // range to work with.
        config.segment_size(SEGMENT_HEADER_SIZE as u64 + 80)
    });
    let session = SessionId::new(1);
    harness.runtime.session_register(session);
    harness.clock.set(1000);

    harness.submit(
        session,
        SetCommand::Add {
            value: 1,
            ttl_ms: 0,
            mode: Mode::Persistent,
        },
    );
    let remove_response = harness.submit(session, SetCommand::Remove { value: 1 });
    assert_eq!(remove_response, SetResponse::Flag(true));

    // Pad the log so the Remove sits in a sealed segment.
    for value in 10..16 {
        harness.submit(
            session,
            SetCommand::Add {
                value,
                ttl_ms: 0,
                mode: Mode::Persistent,
            },
        );
    }

    let compactor = harness.compactor();

    // Minor pass: the Remove has MAJOR policy and must survive.
    compactor.run_minor().unwrap();
    assert!(
        harness.log.read(2).unwrap().is_some(),
        "Remove tombstone must survive minor compaction"
    );

    // Major pass past the tombstone reclaims it (the index may now sit
    // below the first retained index, so a bounds error also counts).
    compactor.run_major(harness.log.commit_index()).unwrap();
    assert!(
        !matches!(harness.log.read(2), Ok(Some(_))),
        "Remove tombstone must be reclaimed by major compaction"
    );
}
