//! Simulated world for the CLI.
//!
//! Prints displayed turns to stdout, keeps occupancy in memory and exposes
//! the idle part of a fixed population to triggers. One tick of the world
//! clock is one domain hour, so a session dies once its domain-time cap worth
//! of ticks has passed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use stage_director::{
    ConversationKey, HistorySink, OccupancyRequest, ParticipantId, ReleaseReason, Result,
    SessionHandle, WorldActuator, WorldSampler,
};
use tracing::{debug, info};

/// Domain hours that pass per world tick.
const DOMAIN_HOURS_PER_TICK: f64 = 1.0;

struct Session {
    participants: Vec<ParticipantId>,
    opened_at: u64,
    max_domain_hours: f64,
}

#[derive(Default)]
struct Occupancy {
    sessions: HashMap<SessionHandle, Session>,
    busy: HashSet<ParticipantId>,
}

/// In-process world with a fixed population.
pub struct SimulatedWorld {
    population: Vec<ParticipantId>,
    occupancy: Mutex<Occupancy>,
    next_handle: AtomicU64,
    tick: AtomicU64,
    locale: String,
    quiet: bool,
}

impl SimulatedWorld {
    /// A world of `pawn:1` .. `pawn:{size}`.
    pub fn with_population(size: usize, locale: impl Into<String>) -> Self {
        Self {
            population: (1..=size)
                .map(|i| ParticipantId::new(format!("pawn:{i}")))
                .collect(),
            occupancy: Mutex::new(Occupancy::default()),
            next_handle: AtomicU64::new(1),
            tick: AtomicU64::new(0),
            locale: locale.into(),
            quiet: false,
        }
    }

    /// Stop printing turns (for JSON output).
    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Advance the world clock by one tick.
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn occupancy(&self) -> MutexGuard<'_, Occupancy> {
        self.occupancy.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorldActuator for SimulatedWorld {
    fn acquire_occupancy(&self, request: &OccupancyRequest) -> Option<SessionHandle> {
        let mut occupancy = self.occupancy();
        if request
            .participants
            .iter()
            .any(|p| occupancy.busy.contains(p))
        {
            return None;
        }

        let handle = SessionHandle::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst));
        occupancy.busy.extend(request.participants.iter().cloned());
        occupancy.sessions.insert(
            handle,
            Session {
                participants: request.participants.clone(),
                opened_at: self.current_tick(),
                max_domain_hours: f64::from(request.max_domain_hours),
            },
        );
        debug!(session = %handle, radius = request.radius, "Occupancy granted");
        Some(handle)
    }

    fn release_occupancy(&self, handle: SessionHandle, reason: ReleaseReason) -> Result<()> {
        let mut occupancy = self.occupancy();
        if let Some(session) = occupancy.sessions.remove(&handle) {
            for participant in &session.participants {
                occupancy.busy.remove(participant);
            }
        }
        debug!(session = %handle, reason = %reason, "Occupancy released");
        Ok(())
    }

    fn is_alive(&self, handle: SessionHandle) -> bool {
        let now = self.current_tick();
        self.occupancy().sessions.get(&handle).is_some_and(|session| {
            let ticks = now.saturating_sub(session.opened_at);
            #[allow(clippy::cast_precision_loss)]
            let hours = ticks as f64 * DOMAIN_HOURS_PER_TICK;
            hours < session.max_domain_hours
        })
    }

    fn display_turn(&self, speaker: &ParticipantId, text: &str) -> Result<()> {
        if !self.quiet {
            println!("  {speaker}: {text}");
        }
        Ok(())
    }
}

impl HistorySink for SimulatedWorld {
    fn append_log_line(
        &self,
        key: &ConversationKey,
        speaker: &ParticipantId,
        text: &str,
        advance_turn: bool,
    ) -> Result<()> {
        info!(conversation_key = %key, speaker = %speaker, advance_turn, "{text}");
        Ok(())
    }
}

impl WorldSampler for SimulatedWorld {
    fn idle_participants(&self) -> Vec<ParticipantId> {
        let occupancy = self.occupancy();
        self.population
            .iter()
            .filter(|p| !occupancy.busy.contains(*p))
            .cloned()
            .collect()
    }

    fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    fn locale(&self) -> String {
        self.locale.clone()
    }
}
