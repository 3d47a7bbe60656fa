//! Narrow interfaces the director consumes from the host world.
//!
//! The director owns no persistence, rendering or wire protocol. Everything
//! visible happens through these traits:
//!
//! - [`GenerativeBackend`]: one opaque request/response call per round.
//! - [`WorldActuator`]: occupancy sessions and turn display.
//! - [`HistorySink`]: conversation log lines.
//! - [`WorldSampler`]: read-only state for triggers.
//!
//! # Best-effort contract
//!
//! `display_turn`, `append_log_line` and `release_occupancy` are
//! fire-and-forget from the director's point of view. Implementations may
//! return `Err`, but the director only logs those errors; a failing log sink
//! can never abort a session or change an [`crate::ActResult`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::types::{ConversationKey, ParticipantId};

/// Role of a message in a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message of a backend request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    /// System instruction.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// User instruction.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Prior assistant output replayed as context.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request for one generation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the backend to constrain its output to JSON.
    pub force_json: bool,
    /// Speakers the response may use.
    pub whitelist: Vec<ParticipantId>,
    /// 1-based round number.
    pub round: u32,
}

/// Generative backend. Treated as opaque: one call, text or error back.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Send a request and return the raw response text.
    async fn send(&self, request: BackendRequest) -> Result<String>;
}

/// Opaque token of an occupancy session held by one Act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wrap an actuator-assigned id.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The actuator-assigned id.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Parameters of an occupancy acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyRequest {
    pub participants: Vec<ParticipantId>,
    pub radius: f32,
    /// Domain-time cap; the actuator reports the session dead past it.
    pub max_domain_hours: f32,
}

/// Why a session is being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseReason {
    Completed,
    Aborted,
    /// The owning Act unwound without an explicit release.
    Dropped,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Aborted => write!(f, "Aborted"),
            Self::Dropped => write!(f, "Dropped"),
        }
    }
}

/// World-side occupancy and display effects.
pub trait WorldActuator: Send + Sync {
    /// Mark the participants busy. `None` when the resource is unavailable.
    fn acquire_occupancy(&self, request: &OccupancyRequest) -> Option<SessionHandle>;

    /// End a session. Best-effort.
    ///
    /// # Errors
    ///
    /// Implementations may report failures; the director logs and ignores them.
    fn release_occupancy(&self, handle: SessionHandle, reason: ReleaseReason) -> Result<()>;

    /// Whether the session is still valid in domain terms.
    fn is_alive(&self, handle: SessionHandle) -> bool;

    /// Show one turn. Best-effort.
    ///
    /// # Errors
    ///
    /// Implementations may report failures; the director logs and ignores them.
    fn display_turn(&self, speaker: &ParticipantId, text: &str) -> Result<()>;
}

/// Conversation log. Best-effort.
pub trait HistorySink: Send + Sync {
    /// Append one line. `advance_turn` marks the end of a round.
    ///
    /// # Errors
    ///
    /// Implementations may report failures; the director logs and ignores them.
    fn append_log_line(
        &self,
        key: &ConversationKey,
        speaker: &ParticipantId,
        text: &str,
        advance_turn: bool,
    ) -> Result<()>;
}

/// Read-only world view used by triggers. Must not mutate anything.
pub trait WorldSampler: Send + Sync {
    /// Participants currently free to join a scene.
    fn idle_participants(&self) -> Vec<ParticipantId>;

    /// Monotonic world tick, used to seed proposals.
    fn current_tick(&self) -> u64;

    /// Locale new scenes should use.
    fn locale(&self) -> String {
        "en".to_string()
    }
}

/// Display a turn, logging and swallowing any failure.
pub(crate) fn display_best_effort(world: &dyn WorldActuator, speaker: &ParticipantId, text: &str) {
    if let Err(e) = world.display_turn(speaker, text) {
        warn!(speaker = %speaker, error = %e, "Display failed, continuing");
    }
}

/// Append a log line, logging and swallowing any failure.
pub(crate) fn log_best_effort(
    history: &dyn HistorySink,
    key: &ConversationKey,
    speaker: &ParticipantId,
    text: &str,
    advance_turn: bool,
) {
    if let Err(e) = history.append_log_line(key, speaker, text, advance_turn) {
        warn!(conversation_key = %key, error = %e, "History append failed, continuing");
    }
}
