//! Ticket arbitration and idempotency.
//!
//! The arbiter guarantees at most one live ticket per conversation key and
//! collapses duplicate intents (same key, same seed) onto one execution.
//! Leasing never blocks on anything but a short critical section, and
//! expired tickets are treated as absent wherever they are found.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use moka::sync::Cache;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StageConfig;
use crate::idempotent::idempotency_key;
use crate::types::{ActResult, ConversationKey, RunIntent, Ticket, TicketSnapshot};

/// Why a lease was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A live ticket already exists for the conversation key.
    AlreadyRunning,
}

impl RejectReason {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyRunning => "AlreadyRunning",
        }
    }
}

/// Outcome of [`TicketArbiter::try_lease`].
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseDecision {
    /// A new ticket; the caller must retire or abandon it.
    Leased(Ticket),
    /// Another ticket holds the conversation key.
    Rejected(RejectReason),
    /// The same intent is already executing.
    InFlight(TicketSnapshot),
    /// The same intent finished recently; this is its result.
    Cached(ActResult),
}

#[derive(Debug, Clone)]
enum IdempotencyEntry {
    InFlight(Ticket),
    Completed { result: ActResult, expires_at: Instant },
}

impl IdempotencyEntry {
    fn is_valid_at(&self, now: Instant) -> bool {
        match self {
            Self::InFlight(ticket) => ticket.is_live_at(now),
            Self::Completed { expires_at, .. } => now < *expires_at,
        }
    }
}

/// Leases tickets and remembers outcomes.
pub struct TicketArbiter {
    config: StageConfig,
    live: Mutex<HashMap<ConversationKey, Ticket>>,
    idempotency: Cache<Uuid, IdempotencyEntry>,
}

impl TicketArbiter {
    /// Create an arbiter.
    #[must_use]
    pub fn new(config: StageConfig) -> Self {
        let idempotency = Cache::builder()
            .max_capacity(config.idempotency_capacity)
            .build();
        Self {
            config,
            live: Mutex::new(HashMap::new()),
            idempotency,
        }
    }

    /// Try to lease a ticket for `intent`.
    ///
    /// The idempotency entry is consulted first, then the live set. Both
    /// checks and the insert happen under one lock.
    pub fn try_lease(&self, intent: &RunIntent) -> LeaseDecision {
        let key = intent.conversation_key();
        let idempotency_key = idempotency_key(intent);
        let now = Instant::now();

        let mut live = self.lock_live();
        live.retain(|_, ticket| ticket.is_live_at(now));

        if let Some(entry) = self.idempotency.get(&idempotency_key) {
            match entry {
                IdempotencyEntry::InFlight(ticket) if ticket.is_live_at(now) => {
                    debug!(
                        conversation_key = %key,
                        ticket_id = %ticket.id,
                        "Duplicate intent, already in flight"
                    );
                    return LeaseDecision::InFlight(ticket.snapshot());
                }
                IdempotencyEntry::Completed { result, expires_at } if now < expires_at => {
                    debug!(conversation_key = %key, "Duplicate intent, returning cached result");
                    return LeaseDecision::Cached(result);
                }
                _ => self.idempotency.invalidate(&idempotency_key),
            }
        }

        if let Some(existing) = live.get(&key) {
            debug!(
                conversation_key = %key,
                ticket_id = %existing.id,
                "Lease rejected, already running"
            );
            return LeaseDecision::Rejected(RejectReason::AlreadyRunning);
        }

        let ticket = Ticket::lease(intent, self.config.ticket_ttl);
        live.insert(key.clone(), ticket.clone());
        self.idempotency
            .insert(idempotency_key, IdempotencyEntry::InFlight(ticket.clone()));

        info!(conversation_key = %key, ticket_id = %ticket.id, act = %ticket.act, "Ticket leased");
        LeaseDecision::Leased(ticket)
    }

    /// Retire `ticket` and remember `result` for the retention window.
    ///
    /// A stale ticket (expired and superseded) never removes the newer lease.
    pub fn retire(&self, ticket: &Ticket, result: ActResult) {
        let mut live = self.lock_live();
        remove_if_same(&mut live, ticket);

        let superseded = self
            .idempotency
            .get(&ticket.idempotency_key)
            .is_some_and(|entry| {
                matches!(entry, IdempotencyEntry::InFlight(ref other) if other.id != ticket.id)
            });
        if !superseded {
            self.idempotency.insert(
                ticket.idempotency_key,
                IdempotencyEntry::Completed {
                    result,
                    expires_at: Instant::now() + self.config.idempotency_retention,
                },
            );
        }

        debug!(
            conversation_key = %ticket.conversation_key,
            ticket_id = %ticket.id,
            "Ticket retired"
        );
    }

    /// Release `ticket` without caching a result.
    pub fn abandon(&self, ticket: &Ticket) {
        let mut live = self.lock_live();
        remove_if_same(&mut live, ticket);

        let owned = self
            .idempotency
            .get(&ticket.idempotency_key)
            .is_some_and(|entry| {
                matches!(entry, IdempotencyEntry::InFlight(ref other) if other.id == ticket.id)
            });
        if owned {
            self.idempotency.invalidate(&ticket.idempotency_key);
        }

        debug!(
            conversation_key = %ticket.conversation_key,
            ticket_id = %ticket.id,
            "Ticket abandoned"
        );
    }

    /// Snapshots of all live tickets, oldest first.
    #[must_use]
    pub fn query_running(&self) -> Vec<TicketSnapshot> {
        let now = Instant::now();
        let mut live = self.lock_live();
        live.retain(|_, ticket| ticket.is_live_at(now));

        let mut snapshots: Vec<TicketSnapshot> = live.values().map(Ticket::snapshot).collect();
        snapshots.sort_by_key(|s| s.leased_at);
        snapshots
    }

    /// Whether a live ticket holds `key`.
    #[must_use]
    pub fn is_running(&self, key: &ConversationKey) -> bool {
        let now = Instant::now();
        self.lock_live()
            .get(key)
            .is_some_and(|ticket| ticket.is_live_at(now))
    }

    /// Drop every idempotency entry. Live tickets are untouched.
    pub fn clear_idempotency_cache(&self) {
        let _live = self.lock_live();
        self.idempotency.invalidate_all();
        info!("Idempotency cache cleared");
    }

    /// Number of valid idempotency entries.
    #[must_use]
    pub fn idempotency_len(&self) -> usize {
        let now = Instant::now();
        self.idempotency
            .iter()
            .filter(|(_, entry)| entry.is_valid_at(now))
            .count()
    }

    fn lock_live(&self) -> MutexGuard<'_, HashMap<ConversationKey, Ticket>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_if_same(live: &mut HashMap<ConversationKey, Ticket>, ticket: &Ticket) {
    if live
        .get(&ticket.conversation_key)
        .is_some_and(|current| current.id == ticket.id)
    {
        live.remove(&ticket.conversation_key);
    }
}
