//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random payloads, entries, and
//! whole log-operation schedules that maintain required invariants.

use concord_core::Entry;
use proptest::prelude::*;

/// Strategy for entry payloads (bounded arbitrary bytes).
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for standalone entries with plausible fields.
///
/// Indices are not sequenced; use [`log_ops_strategy`] for whole-log
/// schedules.
pub fn entry_strategy() -> impl Strategy<Value = Entry> {
    (
        1..1_000_000u64,
        0..1_000u64,
        0..4_000_000_000_000i64,
        payload_strategy(),
    )
        .prop_map(|(index, term, timestamp, payload)| Entry::new(index, term, timestamp, payload))
}

/// One step of a log schedule.
#[derive(Debug, Clone)]
pub enum LogOp {
    /// Append a payload.
    Append(Vec<u8>),
    /// Advance the commit cursor.
    Commit(u64),
    /// Truncate entries above an index.
    Truncate(u64),
}

/// Strategy for schedules of appends, commits and truncations.
///
/// Commit and truncate indices range past the plausible log length so
/// clamping and rejection paths get exercised too.
pub fn log_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<LogOp>> {
    let op = prop_oneof![
        4 => prop::collection::vec(any::<u8>(), 0..32).prop_map(LogOp::Append),
        1 => (0..64u64).prop_map(LogOp::Commit),
        1 => (0..64u64).prop_map(LogOp::Truncate),
    ];
    prop::collection::vec(op, 1..max_ops)
}
