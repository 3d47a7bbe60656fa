//! In-memory collaborators for tests and offline runs.
//!
//! All of them record what the director did to them so assertions can
//! inspect it afterwards.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborators::{
    BackendRequest, GenerativeBackend, HistorySink, OccupancyRequest, ReleaseReason,
    SessionHandle, WorldActuator, WorldSampler,
};
use crate::error::{Error, Result};
use crate::types::{ConversationKey, ParticipantId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backend replaying a fixed script of responses.
///
/// Each call consumes the next entry. Once the script runs out every call
/// fails.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<BackendRequest>>,
    delay: Duration,
}

impl ScriptedBackend {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a successful response.
    #[must_use]
    pub fn respond(self, text: impl Into<String>) -> Self {
        lock(&self.script).push_back(Ok(text.into()));
        self
    }

    /// Append a failing call.
    #[must_use]
    pub fn fail(self, reason: impl Into<String>) -> Self {
        lock(&self.script).push_back(Err(reason.into()));
        self
    }

    /// Delay every call by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls made so far, including ones still waiting on the delay.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<BackendRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn send(&self, request: BackendRequest) -> Result<String> {
        lock(&self.requests).push(request);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match lock(&self.script).pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(Error::backend_failed(reason)),
            None => Err(Error::backend_failed("script exhausted")),
        }
    }
}

#[derive(Default)]
struct WorldState {
    acquisitions: Vec<OccupancyRequest>,
    active: HashMap<SessionHandle, Vec<ParticipantId>>,
    busy: HashSet<ParticipantId>,
    releases: Vec<ReleaseReason>,
    displayed: Vec<(ParticipantId, String)>,
}

/// World actuator keeping everything in memory.
///
/// Participants in an active session are busy; acquiring a session over a
/// busy participant is refused.
#[derive(Default)]
pub struct InMemoryWorld {
    state: Mutex<WorldState>,
    next_handle: AtomicU64,
    refuse: bool,
    fail_release: bool,
    dead: AtomicBool,
}

impl InMemoryWorld {
    /// A world accepting every acquisition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every acquisition.
    #[must_use]
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Record releases but report them as failed.
    #[must_use]
    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    /// Report every session dead from now on.
    pub fn kill_sessions(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    /// Number of successful acquisitions.
    #[must_use]
    pub fn acquisition_count(&self) -> usize {
        lock(&self.state).acquisitions.len()
    }

    /// Release reasons, in order.
    #[must_use]
    pub fn release_reasons(&self) -> Vec<ReleaseReason> {
        lock(&self.state).releases.clone()
    }

    /// Displayed turns, in order.
    #[must_use]
    pub fn displayed(&self) -> Vec<(ParticipantId, String)> {
        lock(&self.state).displayed.clone()
    }

    /// Participants currently in a session.
    #[must_use]
    pub fn busy(&self) -> HashSet<ParticipantId> {
        lock(&self.state).busy.clone()
    }
}

impl WorldActuator for InMemoryWorld {
    fn acquire_occupancy(&self, request: &OccupancyRequest) -> Option<SessionHandle> {
        if self.refuse {
            return None;
        }

        let mut state = lock(&self.state);
        if request.participants.iter().any(|p| state.busy.contains(p)) {
            return None;
        }

        let handle = SessionHandle::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        state.busy.extend(request.participants.iter().cloned());
        state.active.insert(handle, request.participants.clone());
        state.acquisitions.push(request.clone());
        Some(handle)
    }

    fn release_occupancy(&self, handle: SessionHandle, reason: ReleaseReason) -> Result<()> {
        let mut state = lock(&self.state);
        state.releases.push(reason);
        if let Some(participants) = state.active.remove(&handle) {
            for participant in &participants {
                state.busy.remove(participant);
            }
        }
        drop(state);

        if self.fail_release {
            return Err(Error::collaborator_failed("world", "release rejected"));
        }
        Ok(())
    }

    fn is_alive(&self, handle: SessionHandle) -> bool {
        !self.dead.load(Ordering::SeqCst) && lock(&self.state).active.contains_key(&handle)
    }

    fn display_turn(&self, speaker: &ParticipantId, text: &str) -> Result<()> {
        lock(&self.state)
            .displayed
            .push((speaker.clone(), text.to_string()));
        Ok(())
    }
}

/// One recorded history line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub key: ConversationKey,
    pub speaker: ParticipantId,
    pub text: String,
    pub advance_turn: bool,
}

/// History sink recording lines in memory.
#[derive(Default)]
pub struct RecordingHistory {
    lines: Mutex<Vec<LogLine>>,
    failing: bool,
}

impl RecordingHistory {
    /// A sink accepting every line.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink rejecting every line.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Recorded lines, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<LogLine> {
        lock(&self.lines).clone()
    }
}

impl HistorySink for RecordingHistory {
    fn append_log_line(
        &self,
        key: &ConversationKey,
        speaker: &ParticipantId,
        text: &str,
        advance_turn: bool,
    ) -> Result<()> {
        if self.failing {
            return Err(Error::collaborator_failed("history", "sink offline"));
        }
        lock(&self.lines).push(LogLine {
            key: key.clone(),
            speaker: speaker.clone(),
            text: text.to_string(),
            advance_turn,
        });
        Ok(())
    }
}

/// Sampler over a fixed population.
#[derive(Debug, Clone)]
pub struct StaticSampler {
    idle: Vec<ParticipantId>,
    tick: u64,
    locale: String,
}

impl StaticSampler {
    /// A sampler reporting `idle` at `tick`.
    pub fn new(idle: impl IntoIterator<Item = impl Into<ParticipantId>>, tick: u64) -> Self {
        Self {
            idle: idle.into_iter().map(Into::into).collect(),
            tick,
            locale: "en".to_string(),
        }
    }

    /// Report a different locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

impl WorldSampler for StaticSampler {
    fn idle_participants(&self) -> Vec<ParticipantId> {
        self.idle.clone()
    }

    fn current_tick(&self) -> u64 {
        self.tick
    }

    fn locale(&self) -> String {
        self.locale.clone()
    }
}
