//! Opportunistic Act proposals.
//!
//! Triggers look at the world through a [`WorldSampler`] and either propose a
//! [`RunIntent`] or return `None`. Proposing never mutates anything, so a
//! trigger can be polled as often as the scanner likes.

use std::ops::RangeInclusive;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use tracing::debug;

use crate::collaborators::WorldSampler;
use crate::types::RunIntent;

/// Source of Act proposals.
pub trait Trigger: Send + Sync {
    /// Name used in seeds and logs.
    fn name(&self) -> &str;

    /// Propose an intent, or `None` (the common case).
    fn propose(&self, sampler: &dyn WorldSampler, rng: &mut dyn RngCore) -> Option<RunIntent>;
}

/// Proposes a random small gathering of idle participants.
#[derive(Debug, Clone)]
pub struct GatheringTrigger {
    name: String,
    act: String,
    chance: f64,
    participants: RangeInclusive<usize>,
    rounds: RangeInclusive<u32>,
    scenarios: Vec<String>,
}

impl GatheringTrigger {
    /// A trigger for `act` firing with probability `chance` per scan,
    /// proposing 2..=5 participants and 1..=3 rounds.
    ///
    /// `chance` is clamped to `[0, 1]`; a non-finite chance never fires.
    pub fn new(name: impl Into<String>, act: impl Into<String>, chance: f64) -> Self {
        Self {
            name: name.into(),
            act: act.into(),
            chance: if chance.is_finite() { chance.clamp(0.0, 1.0) } else { 0.0 },
            participants: 2..=5,
            rounds: 1..=3,
            scenarios: Vec::new(),
        }
    }

    /// Participant count range.
    #[must_use]
    pub fn participants(mut self, range: RangeInclusive<usize>) -> Self {
        self.participants = range;
        self
    }

    /// Round count range.
    #[must_use]
    pub fn rounds(mut self, range: RangeInclusive<u32>) -> Self {
        self.rounds = range;
        self
    }

    /// Scenario hints to pick from. Without any, proposals carry none.
    #[must_use]
    pub fn scenarios(mut self, scenarios: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scenarios = scenarios.into_iter().map(Into::into).collect();
        self
    }
}

impl Trigger for GatheringTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn propose(&self, sampler: &dyn WorldSampler, rng: &mut dyn RngCore) -> Option<RunIntent> {
        if self.chance <= 0.0 || !rng.gen_bool(self.chance) {
            return None;
        }

        let idle = sampler.idle_participants();
        let min = (*self.participants.start()).max(1);
        let max = (*self.participants.end()).min(idle.len());
        if idle.len() < min || max < min {
            return None;
        }

        let count = rng.gen_range(min..=max);
        let chosen: Vec<_> = idle.choose_multiple(rng, count).cloned().collect();

        let (low, high) = (*self.rounds.start(), *self.rounds.end());
        let rounds = if high > low { rng.gen_range(low..=high) } else { low };

        let mut intent = RunIntent::new(self.act.clone(), chosen)
            .with_rounds(rounds.max(1))
            .with_locale(sampler.locale())
            .with_seed(format!("{}:{}", self.name, sampler.current_tick()));
        if let Some(scenario) = self.scenarios.choose(rng) {
            intent = intent.with_scenario(scenario.clone());
        }
        Some(intent)
    }
}

/// Runs every registered trigger once per scan.
#[derive(Default, Clone)]
pub struct TriggerScanner {
    triggers: Vec<Arc<dyn Trigger>>,
}

impl TriggerScanner {
    /// Create an empty scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trigger.
    #[must_use]
    pub fn with(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Number of triggers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Whether no trigger is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Poll every trigger once and collect the proposals.
    pub fn scan(&self, sampler: &dyn WorldSampler, rng: &mut dyn RngCore) -> Vec<RunIntent> {
        self.triggers
            .iter()
            .filter_map(|trigger| {
                let intent = trigger.propose(sampler, rng)?;
                debug!(
                    trigger = trigger.name(),
                    act = %intent.act,
                    conversation_key = %intent.conversation_key(),
                    rounds = intent.rounds,
                    "Trigger proposed an Act"
                );
                Some(intent)
            })
            .collect()
    }
}
