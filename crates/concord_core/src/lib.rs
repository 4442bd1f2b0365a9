//! # Concord Core
//!
//! The replicated-log core of the concord coordination toolkit.
//!
//! This crate provides:
//! - Segmented, append-only raft log with commit/truncate semantics
//! - Crash recovery: torn-tail truncation and compaction reconciliation
//! - Minor and major log compaction driven by state-machine filters
//! - A replicated state-machine runtime with sessions, a logical clock,
//!   TTL-friendly commit views, and entry pinning
//!
//! The cluster layers around this crate - leader election, membership,
//! transport, client surfaces - are external collaborators: a leader
//! drives [`LogWriter`], and the [`StateMachineRuntime`] drains whatever
//! the commit cursor exposes.
//!
//! ## Example
//!
//! ```no_run
//! use concord_core::{LogConfig, RaftLog};
//!
//! let log = RaftLog::open(LogConfig::new("raft-log")).unwrap();
//! let mut writer = log.writer();
//! let index = writer.append(b"operation".to_vec()).unwrap();
//! writer.commit(index).unwrap();
//! assert!(log.read(index).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod compaction;
mod config;
mod dir;
mod entry;
mod error;
mod journal;
mod log;
mod machine;
mod segment;
mod types;

pub use clock::{Clock, SystemClock};
pub use compaction::{
    Compaction, CompactionMode, CompactionStats, CommitFilter, Compactor, CompactorHandle,
    KeepAllFilter, PinHandle, PinSet,
};
pub use config::LogConfig;
pub use entry::{
    compute_crc32, Entry, CRC_SIZE, ENTRY_FIXED_SIZE, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
    SEGMENT_VERSION,
};
pub use error::{CoreError, CoreResult};
pub use log::{CommitNotifier, LogReader, LogWriter, RaftLog};
pub use machine::{
    decode_envelope, encode_envelope, ApplyError, Codec, Commit, RuntimeHandle, Session,
    StateMachine, StateMachineRuntime, ENVELOPE_SIZE,
};
pub use types::{CompactionPolicy, SessionId, SessionState};
