//! The replicated state-machine surface.
//!
//! User state machines implement [`StateMachine`]: session lifecycle
//! hooks, one `apply` handler over the machine's tagged command union, and
//! optional `filter`/`policy` hooks that feed the compactor. Commands
//! travel through the log as opaque payloads: an 8-byte session envelope
//! followed by [`Codec`]-encoded command bytes.

mod runtime;

pub use runtime::{RuntimeHandle, StateMachineRuntime};

use crate::compaction::{Compaction, PinHandle, PinSet};
use crate::error::{CoreError, CoreResult};
use crate::types::{CompactionPolicy, SessionId, SessionState};
use std::sync::Arc;
use thiserror::Error;

/// Size of the session envelope prefixed to runtime payloads.
pub const ENVELOPE_SIZE: usize = 8;

/// A client session as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(id: SessionId, state: SessionState) -> Self {
        Self { id, state }
    }

    /// The session's unique id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session's lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session counts toward the live set.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }
}

/// The runtime's view of one committed entry, handed to apply and filter
/// handlers.
///
/// A commit is borrowed for the duration of the handler. A machine that
/// needs the backing entry to outlive the handler pins it with
/// [`Commit::pin`] and releases the handle when done; compaction skips
/// pinned entries.
#[derive(Debug)]
pub struct Commit<C> {
    index: u64,
    term: u64,
    timestamp: i64,
    time: i64,
    session: SessionId,
    operation: C,
    pins: Arc<PinSet>,
}

impl<C> Commit<C> {
    pub(crate) fn new(
        index: u64,
        term: u64,
        timestamp: i64,
        time: i64,
        session: SessionId,
        operation: C,
        pins: Arc<PinSet>,
    ) -> Self {
        Self {
            index,
            term,
            timestamp,
            time,
            session,
            operation,
            pins,
        }
    }

    /// Log index of the committed entry.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Election epoch the entry was appended under.
    #[must_use]
    pub fn term(&self) -> u64 {
        self.term
    }

    /// Leader wall clock at append, in milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The runtime's logical clock: the maximum timestamp applied so far.
    ///
    /// This is the authoritative "now" for state-machine logic; the real
    /// wall clock is never read inside a machine.
    #[must_use]
    pub fn time(&self) -> i64 {
        self.time
    }

    /// The originating session.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The decoded operation.
    #[must_use]
    pub fn operation(&self) -> &C {
        &self.operation
    }

    /// Pins the backing entry against compaction.
    #[must_use]
    pub fn pin(&self) -> PinHandle {
        self.pins.pin(self.index)
    }
}

/// Failure of an apply handler.
///
/// Recorded as that index's operation result and returned to the client;
/// the runtime advances past it. Handlers are expected to be transactional
/// per entry, so the machine's state is whatever the handler left behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApplyError {
    message: String,
}

impl ApplyError {
    /// Creates an apply error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Explicit command codec, passed to the runtime in place of any global
/// serializer.
///
/// Encodings embed a stable 32-bit command type id as their first field so
/// payloads remain decodable across versions.
pub trait Codec: Send + Sync {
    /// The machine's command union.
    type Command;

    /// Encodes a command.
    fn encode(&self, command: &Self::Command) -> Vec<u8>;

    /// Decodes a command.
    ///
    /// # Errors
    ///
    /// Returns an error when the bytes are not a valid encoding; at or
    /// below the commit index the runtime treats that as fatal.
    fn decode(&self, bytes: &[u8]) -> CoreResult<Self::Command>;
}

/// A user state machine driven by the runtime.
///
/// The runtime calls `apply` exactly once per committed index, in strictly
/// increasing order, from a single apply thread. Filters run on the
/// compactor thread against a read-locked machine and must not mutate
/// state.
pub trait StateMachine: Send + Sync + 'static {
    /// Tagged union of the machine's commands.
    type Command: Send + 'static;

    /// Result type returned to clients.
    type Output: Send + 'static;

    /// A session was registered. Fires once per session id.
    fn register(&mut self, _session: &Session) {}

    /// A session timed out. Terminal.
    fn expire(&mut self, _session: &Session) {}

    /// A session was closed by the client. Terminal.
    fn close(&mut self, _session: &Session) {}

    /// Applies one committed operation.
    ///
    /// # Errors
    ///
    /// An error is recorded as this commit's result; the runtime advances.
    fn apply(&mut self, commit: Commit<Self::Command>) -> Result<Self::Output, ApplyError>;

    /// Whether the entry behind `commit` is still needed. Consulted only
    /// by compaction, never by the apply path. Defaults to keep.
    fn filter(&self, _commit: &Commit<Self::Command>, _compaction: &Compaction) -> bool {
        true
    }

    /// Compaction policy of a command type. Defaults to `Minor`.
    fn policy(&self, _command: &Self::Command) -> CompactionPolicy {
        CompactionPolicy::Minor
    }
}

/// Wraps codec-encoded command bytes in the session envelope.
#[must_use]
pub fn encode_envelope(session: SessionId, command: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ENVELOPE_SIZE + command.len());
    payload.extend_from_slice(&session.as_u64().to_le_bytes());
    payload.extend_from_slice(command);
    payload
}

/// Splits a payload into its originating session and command bytes.
///
/// # Errors
///
/// Returns `Decode` when the payload is shorter than the envelope.
pub fn decode_envelope(index: u64, payload: &[u8]) -> CoreResult<(SessionId, &[u8])> {
    if payload.len() < ENVELOPE_SIZE {
        return Err(CoreError::decode(index, "payload shorter than envelope"));
    }

    let session = SessionId::new(u64::from_le_bytes([
        payload[0], payload[1], payload[2], payload[3], payload[4], payload[5], payload[6],
        payload[7],
    ]));
    Ok((session, &payload[ENVELOPE_SIZE..]))
}
