//! Test fixtures: manual clock, reference state machine, log harnesses.
//!
//! The [`TtlSetMachine`] is the reference user machine for the runtime: a
//! replicated set of `i32` values whose entries carry a TTL and a
//! persistence mode. Ephemeral values die with their session; expired
//! values are treated as absent and reaped on the next touch. Its filters
//! exercise both compaction policies: `Add` entries are reclaimable once
//! they no longer hold the current value, while `Remove`/`Clear` are
//! tombstone-like and survive until a major pass moves past them.

use concord_core::{
    ApplyError, Clock, Codec, Commit, Compaction, CompactionPolicy, Compactor, CoreError,
    CoreResult, LogConfig, LogWriter, PinHandle, PinSet, RaftLog, Session, SessionId,
    StateMachine, StateMachineRuntime,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// A clock driven by the test, not the OS.
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicI64,
}

impl ManualClock {
    /// Creates a clock starting at `start_ms`.
    #[must_use]
    pub fn starting_at(start_ms: i64) -> Self {
        Self {
            ms: AtomicI64::new(start_ms),
        }
    }

    /// Sets the clock.
    pub fn set(&self, ms: i64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    /// Advances the clock by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.ms.load(Ordering::SeqCst)
    }
}

/// Codec for machines whose commands are raw bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteCodec;

impl Codec for ByteCodec {
    type Command = Vec<u8>;

    fn encode(&self, command: &Vec<u8>) -> Vec<u8> {
        command.clone()
    }

    fn decode(&self, bytes: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Persistence mode of a set value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// The value survives its originating session.
    #[default]
    Persistent,
    /// The value is valid only while its originating session is live.
    Ephemeral,
}

/// Commands of the TTL set machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCommand {
    /// Adds a value. `ttl_ms == 0` means no expiry.
    Add {
        /// The value to add.
        value: i32,
        /// Time to live in milliseconds; 0 disables expiry.
        ttl_ms: u64,
        /// Persistence mode.
        mode: Mode,
    },
    /// Removes a value.
    Remove {
        /// The value to remove.
        value: i32,
    },
    /// Tests membership.
    Contains {
        /// The value to test.
        value: i32,
    },
    /// Counts held values, active or not.
    Size,
    /// Whether the set holds no values.
    IsEmpty,
    /// Removes every value.
    Clear,
}

/// Results of the TTL set machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetResponse {
    /// A boolean outcome.
    Flag(bool),
    /// A count.
    Count(usize),
    /// A command with no result.
    Done,
}

const CMD_ADD: u32 = 1;
const CMD_REMOVE: u32 = 2;
const CMD_CONTAINS: u32 = 3;
const CMD_SIZE: u32 = 4;
const CMD_IS_EMPTY: u32 = 5;
const CMD_CLEAR: u32 = 6;

/// Codec for [`SetCommand`]: a 32-bit command type id followed by the
/// command fields, all little-endian.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetCodec;

impl Codec for SetCodec {
    type Command = SetCommand;

    fn encode(&self, command: &SetCommand) -> Vec<u8> {
        let mut buf = Vec::new();
        match *command {
            SetCommand::Add {
                value,
                ttl_ms,
                mode,
            } => {
                buf.extend_from_slice(&CMD_ADD.to_le_bytes());
                buf.extend_from_slice(&value.to_le_bytes());
                buf.extend_from_slice(&ttl_ms.to_le_bytes());
                buf.push(match mode {
                    Mode::Persistent => 0,
                    Mode::Ephemeral => 1,
                });
            }
            SetCommand::Remove { value } => {
                buf.extend_from_slice(&CMD_REMOVE.to_le_bytes());
                buf.extend_from_slice(&value.to_le_bytes());
            }
            SetCommand::Contains { value } => {
                buf.extend_from_slice(&CMD_CONTAINS.to_le_bytes());
                buf.extend_from_slice(&value.to_le_bytes());
            }
            SetCommand::Size => buf.extend_from_slice(&CMD_SIZE.to_le_bytes()),
            SetCommand::IsEmpty => buf.extend_from_slice(&CMD_IS_EMPTY.to_le_bytes()),
            SetCommand::Clear => buf.extend_from_slice(&CMD_CLEAR.to_le_bytes()),
        }
        buf
    }

    fn decode(&self, bytes: &[u8]) -> CoreResult<SetCommand> {
        let read_u32 = |at: usize| -> CoreResult<u32> {
            bytes
                .get(at..at + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or_else(|| CoreError::corrupted_log("set command too short"))
        };
        let read_i32 = |at: usize| -> CoreResult<i32> { Ok(read_u32(at)? as i32) };

        let id = read_u32(0)?;
        match id {
            CMD_ADD => {
                let value = read_i32(4)?;
                let ttl_ms = bytes
                    .get(8..16)
                    .map(|b| {
                        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
                    })
                    .ok_or_else(|| CoreError::corrupted_log("set command too short"))?;
                let mode = match bytes.get(16) {
                    Some(0) => Mode::Persistent,
                    Some(1) => Mode::Ephemeral,
                    _ => return Err(CoreError::corrupted_log("bad persistence mode")),
                };
                Ok(SetCommand::Add {
                    value,
                    ttl_ms,
                    mode,
                })
            }
            CMD_REMOVE => Ok(SetCommand::Remove { value: read_i32(4)? }),
            CMD_CONTAINS => Ok(SetCommand::Contains { value: read_i32(4)? }),
            CMD_SIZE => Ok(SetCommand::Size),
            CMD_IS_EMPTY => Ok(SetCommand::IsEmpty),
            CMD_CLEAR => Ok(SetCommand::Clear),
            other => Err(CoreError::corrupted_log(format!(
                "unknown set command id {other}"
            ))),
        }
    }
}

#[derive(Debug)]
struct HeldValue {
    index: u64,
    timestamp: i64,
    ttl_ms: u64,
    mode: Mode,
    session: SessionId,
    pin: PinHandle,
}

/// The reference TTL set state machine.
pub struct TtlSetMachine {
    values: HashMap<i32, HeldValue>,
    sessions: HashSet<SessionId>,
    pins: Arc<PinSet>,
}

impl TtlSetMachine {
    /// Creates a machine releasing its pins into `pins`.
    #[must_use]
    pub fn new(pins: Arc<PinSet>) -> Self {
        Self {
            values: HashMap::new(),
            sessions: HashSet::new(),
            pins,
        }
    }

    /// Number of held values, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no values are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The live session set as the machine sees it.
    #[must_use]
    pub fn live_sessions(&self) -> &HashSet<SessionId> {
        &self.sessions
    }

    /// A value is active while its session constraint and TTL both hold.
    /// The TTL boundary is strict: `time - timestamp == ttl` is still
    /// active.
    fn is_active(&self, held: &HeldValue, time: i64) -> bool {
        if held.mode == Mode::Ephemeral && !self.sessions.contains(&held.session) {
            return false;
        }
        if held.ttl_ms > 0 && (held.ttl_ms as i64) < time - held.timestamp {
            return false;
        }
        true
    }

    fn drop_value(&mut self, value: i32) {
        if let Some(old) = self.values.remove(&value) {
            self.pins.release(old.pin);
        }
    }
}

impl StateMachine for TtlSetMachine {
    type Command = SetCommand;
    type Output = SetResponse;

    fn register(&mut self, session: &Session) {
        self.sessions.insert(session.id());
    }

    fn expire(&mut self, session: &Session) {
        self.sessions.remove(&session.id());
    }

    fn close(&mut self, session: &Session) {
        self.sessions.remove(&session.id());
    }

    fn apply(&mut self, commit: Commit<SetCommand>) -> Result<SetResponse, ApplyError> {
        let time = commit.time();

        match *commit.operation() {
            SetCommand::Add {
                value,
                ttl_ms,
                mode,
            } => {
                let active = self
                    .values
                    .get(&value)
                    .is_some_and(|held| self.is_active(held, time));
                if active {
                    return Ok(SetResponse::Flag(false));
                }

                self.drop_value(value);
                self.values.insert(
                    value,
                    HeldValue {
                        index: commit.index(),
                        timestamp: commit.timestamp(),
                        ttl_ms,
                        mode,
                        session: commit.session(),
                        pin: commit.pin(),
                    },
                );
                Ok(SetResponse::Flag(true))
            }

            SetCommand::Remove { value } => match self.values.remove(&value) {
                Some(old) => {
                    let active = self.is_active(&old, time);
                    self.pins.release(old.pin);
                    Ok(SetResponse::Flag(active))
                }
                None => Ok(SetResponse::Flag(false)),
            },

            SetCommand::Contains { value } => {
                let active = self
                    .values
                    .get(&value)
                    .is_some_and(|held| self.is_active(held, time));
                if !active {
                    // Expired or orphaned: treat as absent and reap.
                    self.drop_value(value);
                }
                Ok(SetResponse::Flag(active))
            }

            SetCommand::Size => Ok(SetResponse::Count(self.values.len())),

            SetCommand::IsEmpty => Ok(SetResponse::Flag(self.values.is_empty())),

            SetCommand::Clear => {
                let values: Vec<i32> = self.values.keys().copied().collect();
                for value in values {
                    self.drop_value(value);
                }
                Ok(SetResponse::Done)
            }
        }
    }

    fn filter(&self, commit: &Commit<SetCommand>, compaction: &Compaction) -> bool {
        match *commit.operation() {
            // An Add is needed while it holds the current value and that
            // value is still active.
            SetCommand::Add { value, .. } => self.values.get(&value).is_some_and(|held| {
                held.index == commit.index() && self.is_active(held, commit.time())
            }),
            // Tombstones survive until the major watermark passes them.
            SetCommand::Remove { .. } | SetCommand::Clear => commit.index() > compaction.index(),
            // Queries leave no state behind.
            SetCommand::Contains { .. } | SetCommand::Size | SetCommand::IsEmpty => false,
        }
    }

    fn policy(&self, command: &SetCommand) -> CompactionPolicy {
        match command {
            SetCommand::Remove { .. } | SetCommand::Clear => CompactionPolicy::Major,
            _ => CompactionPolicy::Minor,
        }
    }
}

/// A full TTL-set stack over a temp directory: log, manual clock, runtime,
/// and a writer.
pub struct TtlSetHarness {
    /// The log under test.
    pub log: RaftLog,
    /// The clock stamping appended entries.
    pub clock: Arc<ManualClock>,
    /// The runtime driving the set machine.
    pub runtime: StateMachineRuntime<TtlSetMachine>,
    writer: Mutex<LogWriter>,
    _dir: TempDir,
}

impl TtlSetHarness {
    /// Opens a harness over a fresh temp directory.
    #[must_use]
    pub fn open() -> Self {
        Self::open_with_config(|config| config)
    }

    /// Opens a harness, letting the test adjust the log configuration.
    #[must_use]
    pub fn open_with_config(adjust: impl FnOnce(LogConfig) -> LogConfig) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let clock = Arc::new(ManualClock::default());
        let config = adjust(LogConfig::new(dir.path()));

        let dyn_clock: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        let log = RaftLog::open_with_clock(config, dyn_clock).expect("open log");

        let pins = Arc::new(PinSet::new());
        let machine = TtlSetMachine::new(Arc::clone(&pins));
        let runtime =
            StateMachineRuntime::with_pins(log.clone(), machine, Arc::new(SetCodec), pins);

        let writer = Mutex::new(log.writer());
        Self {
            log,
            clock,
            runtime,
            writer,
            _dir: dir,
        }
    }

    /// Appends, commits and applies one command, returning its result.
    pub fn submit(&self, session: SessionId, command: SetCommand) -> SetResponse {
        let payload = self.runtime.encode_command(session, &command);
        let index = {
            let mut writer = self.writer.lock();
            let index = writer.append(payload).expect("append");
            writer.commit(index).expect("commit");
            index
        };

        self.runtime.apply_ready().expect("apply");
        self.runtime
            .take_result(index)
            .expect("result recorded")
            .expect("set commands do not fail")
    }

    /// A compactor wired to the runtime's filter and pin set.
    #[must_use]
    pub fn compactor(&self) -> Compactor {
        Compactor::new(self.log.clone(), self.runtime.filter(), self.runtime.pins())
    }
}
