//! Core types shared by the arbiter, Acts and triggers.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use ulid::Ulid;
use uuid::Uuid;

use crate::idempotent::idempotency_key;

/// Separator used when joining participant ids into a conversation key.
const KEY_SEPARATOR: char = '|';

/// Escapes separators inside an id so distinct sets never share a key.
const KEY_ESCAPE: char = '\\';

/// Identifier of one participant (e.g. `"pawn:1"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a participant id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Canonical, order-independent key of a participant set.
///
/// Two participant lists containing the same ids in any order, with or
/// without repeats, yield the same key. Ids containing `|` or `\` are
/// escaped, so different sets always yield different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Derive the key from a participant list.
    pub fn from_participants<'a>(
        participants: impl IntoIterator<Item = &'a ParticipantId>,
    ) -> Self {
        Self(
            participants
                .into_iter()
                .map(ParticipantId::as_str)
                .sorted_unstable()
                .dedup()
                .map(escape_key_part)
                .join(&KEY_SEPARATOR.to_string()),
        )
    }

    /// Borrow the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape_key_part(id: &str) -> Cow<'_, str> {
    if !id.contains([KEY_SEPARATOR, KEY_ESCAPE]) {
        return Cow::Borrowed(id);
    }
    let mut escaped = String::with_capacity(id.len() + 2);
    for c in id.chars() {
        if c == KEY_SEPARATOR || c == KEY_ESCAPE {
            escaped.push(KEY_ESCAPE);
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A proposed Act invocation. Produced by a trigger or a caller, consumed
/// immediately by the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIntent {
    /// Name of the Act to run.
    pub act: String,
    /// Participants, in any order.
    pub participants: Vec<ParticipantId>,
    /// Optional free-text scenario hint.
    #[serde(default)]
    pub scenario: Option<String>,
    /// Locale the dialogue should be produced in.
    pub locale: String,
    /// Requested number of rounds.
    pub rounds: u32,
    /// Seed combined with the conversation key to deduplicate proposals.
    pub seed: String,
}

impl RunIntent {
    /// Create an intent with one round, locale `en` and an empty seed.
    pub fn new(
        act: impl Into<String>,
        participants: impl IntoIterator<Item = impl Into<ParticipantId>>,
    ) -> Self {
        Self {
            act: act.into(),
            participants: participants.into_iter().map(Into::into).collect(),
            scenario: None,
            locale: "en".to_string(),
            rounds: 1,
            seed: String::new(),
        }
    }

    /// Set the scenario hint.
    #[must_use]
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    /// Set the locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Set the requested round count.
    #[must_use]
    pub const fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    /// Set the idempotency seed.
    #[must_use]
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = seed.into();
        self
    }

    /// Canonical key of this intent's participant set.
    #[must_use]
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::from_participants(&self.participants)
    }

    /// Participants with duplicates removed, in first-seen order.
    #[must_use]
    pub fn distinct_participants(&self) -> Vec<ParticipantId> {
        self.participants.iter().unique().cloned().collect()
    }
}

/// Unique identifier for a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(Ulid);

impl TicketId {
    /// Create a new random ticket ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A time-bounded lease authorizing one Act execution for a conversation key.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    /// Ticket identifier.
    pub id: TicketId,
    /// Name of the Act the ticket was leased for.
    pub act: String,
    /// Concurrency boundary.
    pub conversation_key: ConversationKey,
    /// Key under which the run's outcome is cached.
    pub idempotency_key: Uuid,
    /// Distinct participants covered by the lease.
    pub participants: Vec<ParticipantId>,
    /// When the lease was granted (for display).
    pub leased_at: DateTime<Utc>,
    /// Lease expiry; past this instant the ticket authorizes nothing.
    pub expires_at: Instant,
}

impl Ticket {
    /// Lease a fresh ticket for `intent`, valid for `ttl` from now.
    #[must_use]
    pub fn lease(intent: &RunIntent, ttl: Duration) -> Self {
        Self {
            id: TicketId::new(),
            act: intent.act.clone(),
            conversation_key: intent.conversation_key(),
            idempotency_key: idempotency_key(intent),
            participants: intent.distinct_participants(),
            leased_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    /// Whether the lease is still valid at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Whether the lease is still valid.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_live_at(Instant::now())
    }

    /// Read-only view for operational introspection.
    #[must_use]
    pub fn snapshot(&self) -> TicketSnapshot {
        TicketSnapshot {
            id: self.id,
            act: self.act.clone(),
            conversation_key: self.conversation_key.clone(),
            participants: self.participants.clone(),
            leased_at: self.leased_at,
            remaining_ms: u64::try_from(
                self.expires_at
                    .saturating_duration_since(Instant::now())
                    .as_millis(),
            )
            .unwrap_or(u64::MAX),
        }
    }
}

/// Serializable view of a live ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSnapshot {
    pub id: TicketId,
    pub act: String,
    pub conversation_key: ConversationKey,
    pub participants: Vec<ParticipantId>,
    pub leased_at: DateTime<Utc>,
    /// Lease time left when the snapshot was taken.
    pub remaining_ms: u64,
}

/// Why an Act execution ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActReason {
    /// Every requested round was produced.
    Completed,
    /// Stopped by cancellation, the hard deadline, the enqueue deadline or a
    /// lost session.
    Aborted,
    /// A round produced no usable dialogue (backend failure, unparseable or
    /// empty output).
    NoContent,
    /// A round produced well-formed turns, all spoken by non-participants.
    NoWhitelistedContent,
    /// The request did not satisfy the Act's preconditions.
    Ineligible,
    /// The occupancy resource could not be acquired.
    ResourceUnavailable,
}

impl ActReason {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Aborted => "Aborted",
            Self::NoContent => "NoContent",
            Self::NoWhitelistedContent => "NoWhitelistedContent",
            Self::Ineligible => "Ineligible",
            Self::ResourceUnavailable => "ResourceUnavailable",
        }
    }
}

impl fmt::Display for ActReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single, immutable outcome of one Act execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActResult {
    pub completed: bool,
    pub reason: ActReason,
    /// Transcript of the produced dialogue, or a human-readable fallback
    /// message when none was produced.
    pub final_text: String,
    /// Number of rounds fully produced.
    pub rounds: u32,
}

impl ActResult {
    /// A run in which every requested round was produced.
    pub fn completed(final_text: impl Into<String>, rounds: u32) -> Self {
        Self {
            completed: true,
            reason: ActReason::Completed,
            final_text: final_text.into(),
            rounds,
        }
    }

    /// Any non-successful termination.
    pub fn failed(reason: ActReason, final_text: impl Into<String>, rounds: u32) -> Self {
        Self {
            completed: false,
            reason,
            final_text: final_text.into(),
            rounds,
        }
    }
}

/// One `(speaker, content)` unit of generated dialogue, already validated
/// against the participant whitelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTurn {
    pub speaker: ParticipantId,
    pub content: String,
}

impl GeneratedTurn {
    /// Create a turn.
    pub fn new(speaker: impl Into<ParticipantId>, content: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
        }
    }

    /// Transcript line form.
    #[must_use]
    pub fn line(&self) -> String {
        format!("{}: {}", self.speaker, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key_ignores_order() {
        let a = RunIntent::new("GroupChat", ["pawn:2", "pawn:1"]);
        let b = RunIntent::new("GroupChat", ["pawn:1", "pawn:2"]);
        assert_eq!(a.conversation_key(), b.conversation_key());
        assert_eq!(a.conversation_key().as_str(), "pawn:1|pawn:2");
    }

    #[test]
    fn test_conversation_key_ignores_repeats() {
        let a = RunIntent::new("GroupChat", ["pawn:1", "pawn:2", "pawn:1"]);
        let b = RunIntent::new("GroupChat", ["pawn:2", "pawn:1"]);
        assert_eq!(a.conversation_key(), b.conversation_key());
    }

    #[test]
    fn test_separator_inside_ids_does_not_collide() {
        let a = ConversationKey::from_participants(&[
            ParticipantId::new("x|y"),
            ParticipantId::new("z"),
        ]);
        let b = ConversationKey::from_participants(&[
            ParticipantId::new("x"),
            ParticipantId::new("y|z"),
        ]);
        let c = ConversationKey::from_participants(&[
            ParticipantId::new("x"),
            ParticipantId::new("y"),
            ParticipantId::new("z"),
        ]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        assert_eq!(a.as_str(), r"x\|y|z");
    }

    #[test]
    fn test_escape_character_inside_ids_does_not_collide() {
        let a = ConversationKey::from_participants(&[
            ParticipantId::new(r"x\"),
            ParticipantId::new("y"),
        ]);
        let b = ConversationKey::from_participants(&[ParticipantId::new(r"x\|y")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_distinct_participants_keeps_first_seen_order() {
        let intent = RunIntent::new("GroupChat", ["pawn:3", "pawn:1", "pawn:3"]);
        assert_eq!(
            intent.distinct_participants(),
            vec![ParticipantId::new("pawn:3"), ParticipantId::new("pawn:1")]
        );
    }

    #[test]
    fn test_intent_builder() {
        let intent = RunIntent::new("GroupChat", ["pawn:1", "pawn:2"])
            .with_scenario("harvest festival")
            .with_locale("de")
            .with_rounds(3)
            .with_seed("gathering:42");

        assert_eq!(intent.scenario.as_deref(), Some("harvest festival"));
        assert_eq!(intent.locale, "de");
        assert_eq!(intent.rounds, 3);
        assert_eq!(intent.seed, "gathering:42");
    }

    #[test]
    fn test_act_result_serializes_reason_as_string() -> Result<(), serde_json::Error> {
        let result = ActResult::failed(ActReason::NoWhitelistedContent, "", 1);
        let json = serde_json::to_value(&result)?;
        assert_eq!(json["reason"], "NoWhitelistedContent");
        assert_eq!(json["completed"], false);
        Ok(())
    }

    #[test]
    fn test_turn_line() {
        let turn = GeneratedTurn::new("pawn:1", "Nice weather.");
        assert_eq!(turn.line(), "pawn:1: Nice weather.");
    }
}
