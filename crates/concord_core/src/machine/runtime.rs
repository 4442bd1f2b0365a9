//! The state-machine runtime.
//!
//! Drives committed entries into a user state machine in index order:
//! exactly once per index, no gaps, no repeats. The runtime owns the
//! session registry, the logical clock, the per-commit result map, and the
//! pin set, and hands the compactor a filter adapter that consults the
//! machine through its read lock.

use crate::compaction::{Compaction, CommitFilter, PinSet};
use crate::entry::Entry;
use crate::error::{CoreError, CoreResult};
use crate::log::RaftLog;
use crate::machine::{decode_envelope, encode_envelope, ApplyError, Codec, Commit, Session,
    StateMachine};
use crate::types::{CompactionPolicy, SessionId, SessionState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug)]
struct Progress {
    last_applied: u64,
    halted: bool,
}

/// Drives a user state machine from the committed log.
///
/// Cheap to clone; clones share all state. The apply path is serialized by
/// an internal lock, so `apply_ready` is never concurrent with itself.
pub struct StateMachineRuntime<M: StateMachine> {
    log: RaftLog,
    machine: Arc<RwLock<M>>,
    codec: Arc<dyn Codec<Command = M::Command>>,
    pins: Arc<PinSet>,
    /// Logical clock: max entry timestamp applied so far.
    time_ms: Arc<AtomicI64>,
    sessions: Arc<RwLock<HashMap<SessionId, SessionState>>>,
    results: Arc<Mutex<HashMap<u64, Result<M::Output, ApplyError>>>>,
    progress: Arc<Mutex<Progress>>,
}

impl<M: StateMachine> Clone for StateMachineRuntime<M> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            machine: Arc::clone(&self.machine),
            codec: Arc::clone(&self.codec),
            pins: Arc::clone(&self.pins),
            time_ms: Arc::clone(&self.time_ms),
            sessions: Arc::clone(&self.sessions),
            results: Arc::clone(&self.results),
            progress: Arc::clone(&self.progress),
        }
    }
}

impl<M: StateMachine> StateMachineRuntime<M> {
    /// Creates a runtime over `log` driving `machine`.
    ///
    /// Apply starts at the log's first retained index.
    pub fn new(log: RaftLog, machine: M, codec: Arc<dyn Codec<Command = M::Command>>) -> Self {
        Self::with_pins(log, machine, codec, Arc::new(PinSet::new()))
    }

    /// Creates a runtime sharing an externally-built pin set.
    ///
    /// Machines that hold pins across commits are constructed around the
    /// same set so they can release handles themselves.
    pub fn with_pins(
        log: RaftLog,
        machine: M,
        codec: Arc<dyn Codec<Command = M::Command>>,
        pins: Arc<PinSet>,
    ) -> Self {
        let last_applied = log.first_index().saturating_sub(1);

        Self {
            log,
            machine: Arc::new(RwLock::new(machine)),
            codec,
            pins,
            time_ms: Arc::new(AtomicI64::new(0)),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            results: Arc::new(Mutex::new(HashMap::new())),
            progress: Arc::new(Mutex::new(Progress {
                last_applied,
                halted: false,
            })),
        }
    }

    /// The machine, for direct inspection under its lock.
    #[must_use]
    pub fn machine(&self) -> Arc<RwLock<M>> {
        Arc::clone(&self.machine)
    }

    /// The pin set shared with the compactor.
    #[must_use]
    pub fn pins(&self) -> Arc<PinSet> {
        Arc::clone(&self.pins)
    }

    /// Current logical time in milliseconds.
    #[must_use]
    pub fn time_ms(&self) -> i64 {
        self.time_ms.load(Ordering::SeqCst)
    }

    /// Highest index applied so far.
    #[must_use]
    pub fn last_applied(&self) -> u64 {
        self.progress.lock().last_applied
    }

    /// Encodes a command into a log payload on behalf of `session`.
    #[must_use]
    pub fn encode_command(&self, session: SessionId, command: &M::Command) -> Vec<u8> {
        encode_envelope(session, &self.codec.encode(command))
    }

    /// Takes the recorded result for `index`, if apply has reached it.
    pub fn take_result(&self, index: u64) -> Option<Result<M::Output, ApplyError>> {
        self.results.lock().remove(&index)
    }

    /// Whether `session` is in the live set.
    #[must_use]
    pub fn is_session_live(&self, session: SessionId) -> bool {
        self.sessions
            .read()
            .get(&session)
            .is_some_and(|state| state.is_live())
    }

    /// Registers a session. Fires the machine's `register` hook once per
    /// session id; re-registration is a no-op.
    pub fn session_register(&self, session: SessionId) {
        {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&session) {
                return;
            }
            sessions.insert(session, SessionState::Registered);
        }
        self.machine
            .write()
            .register(&Session::new(session, SessionState::Registered));
    }

    /// Expires a session (keep-alive timeout). Terminal; no-op unless the
    /// session is currently live.
    pub fn session_expire(&self, session: SessionId) {
        if !self.transition(session, SessionState::Expired) {
            return;
        }
        self.machine
            .write()
            .expire(&Session::new(session, SessionState::Expired));
    }

    /// Closes a session (explicit client close). Terminal; no-op unless
    /// the session is currently live.
    pub fn session_close(&self, session: SessionId) {
        if !self.transition(session, SessionState::Closed) {
            return;
        }
        self.machine
            .write()
            .close(&Session::new(session, SessionState::Closed));
    }

    fn transition(&self, session: SessionId, to: SessionState) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&session) {
            Some(state) if state.is_live() => {
                *state = to;
                true
            }
            _ => false,
        }
    }

    /// Applies every committed, not-yet-applied entry, in order.
    ///
    /// Returns the new `last_applied`. Apply handler failures are recorded
    /// as that commit's result and do not stop the drain; an undecodable
    /// payload at or below the commit index halts the runtime fatally.
    pub fn apply_ready(&self) -> CoreResult<u64> {
        let mut progress = self.progress.lock();
        if progress.halted {
            return Err(CoreError::Halted);
        }

        let commit_index = self.log.commit_index();
        while progress.last_applied < commit_index {
            let index = progress.last_applied + 1;

            let entry = match self.log.read(index) {
                Ok(entry) => entry,
                // Below the first retained index: compacted away, applied
                // in a previous incarnation.
                Err(CoreError::OutOfBounds { .. }) => None,
                Err(err) => {
                    progress.halted = true;
                    return Err(err);
                }
            };

            if let Some(entry) = entry {
                if let Err(err) = self.apply_entry(entry) {
                    progress.halted = true;
                    return Err(err);
                }
            }

            progress.last_applied = index;
        }

        Ok(progress.last_applied)
    }

    fn apply_entry(&self, entry: Entry) -> CoreResult<()> {
        let index = entry.index;
        let (session, command_bytes) = decode_envelope(index, &entry.payload)?;
        let command = self
            .codec
            .decode(command_bytes)
            .map_err(|err| CoreError::decode(index, err.to_string()))?;

        let previous = self.time_ms.fetch_max(entry.timestamp, Ordering::SeqCst);
        let time = previous.max(entry.timestamp);

        let commit = Commit::new(
            index,
            entry.term,
            entry.timestamp,
            time,
            session,
            command,
            Arc::clone(&self.pins),
        );

        let result = self.machine.write().apply(commit);
        if let Err(err) = &result {
            tracing::warn!(index, %err, "apply handler failed");
        }
        self.results.lock().insert(index, result);
        Ok(())
    }

    /// The filter adapter handed to the compactor.
    #[must_use]
    pub fn filter(&self) -> Arc<dyn CommitFilter> {
        Arc::new(MachineFilter {
            machine: Arc::clone(&self.machine),
            codec: Arc::clone(&self.codec),
            pins: Arc::clone(&self.pins),
            time_ms: Arc::clone(&self.time_ms),
        })
    }

    /// Moves the runtime onto a dedicated apply thread woken by the log's
    /// commit notifier.
    pub fn spawn(&self) -> RuntimeHandle {
        let runtime = self.clone();
        let notifier = self.log.notifier();
        let wake = self.log.notifier();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let join = std::thread::Builder::new()
            .name("concord-apply".into())
            .spawn(move || loop {
                if thread_shutdown.load(Ordering::SeqCst) {
                    break;
                }

                match runtime.apply_ready() {
                    Ok(applied) => {
                        notifier.wait_past(applied, Duration::from_millis(250));
                    }
                    Err(err) => {
                        tracing::error!(%err, "apply thread halted");
                        break;
                    }
                }
            })
            .expect("failed to spawn apply thread");

        RuntimeHandle {
            shutdown,
            notifier: wake,
            join: Some(join),
        }
    }
}

/// Compaction filter that consults the user machine.
///
/// Decode or policy failures read as keep: retaining an entry is always
/// legal, discarding one never is without the machine's say-so.
struct MachineFilter<M: StateMachine> {
    machine: Arc<RwLock<M>>,
    codec: Arc<dyn Codec<Command = M::Command>>,
    pins: Arc<PinSet>,
    time_ms: Arc<AtomicI64>,
}

impl<M: StateMachine> MachineFilter<M> {
    fn decode(&self, entry: &Entry) -> CoreResult<(SessionId, M::Command)> {
        let (session, command_bytes) = decode_envelope(entry.index, &entry.payload)?;
        let command = self.codec.decode(command_bytes)?;
        Ok((session, command))
    }
}

impl<M: StateMachine> CommitFilter for MachineFilter<M> {
    fn policy(&self, entry: &Entry) -> CompactionPolicy {
        match self.decode(entry) {
            Ok((_, command)) => self.machine.read().policy(&command),
            // Undecodable: treat as Major so only an explicit major pass
            // can touch it.
            Err(_) => CompactionPolicy::Major,
        }
    }

    fn keep(&self, entry: &Entry, compaction: &Compaction) -> bool {
        let (session, command) = match self.decode(entry) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(index = entry.index, %err, "filter decode failed; keeping entry");
                return true;
            }
        };

        let commit = Commit::new(
            entry.index,
            entry.term,
            entry.timestamp,
            self.time_ms.load(Ordering::SeqCst),
            session,
            command,
            Arc::clone(&self.pins),
        );

        self.machine.read().filter(&commit, compaction)
    }
}

/// Handle to the dedicated apply thread.
pub struct RuntimeHandle {
    shutdown: Arc<AtomicBool>,
    notifier: Arc<crate::log::CommitNotifier>,
    join: Option<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Stops the apply thread and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notifier.wake();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
