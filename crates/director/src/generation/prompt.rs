//! Per-round prompt composition.

use std::collections::VecDeque;

use itertools::Itertools;

use crate::collaborators::{BackendRequest, ChatMessage};
use crate::types::ParticipantId;

/// Everything needed to build the request of any round of one Act run.
#[derive(Debug, Clone)]
pub struct RoundPrompt {
    whitelist: Vec<ParticipantId>,
    scenario: Option<String>,
    locale: String,
    total_rounds: u32,
}

impl RoundPrompt {
    /// Create a prompt for the given speakers.
    pub fn new(
        whitelist: Vec<ParticipantId>,
        locale: impl Into<String>,
        total_rounds: u32,
    ) -> Self {
        Self {
            whitelist,
            scenario: None,
            locale: locale.into(),
            total_rounds,
        }
    }

    /// Set the scenario hint.
    #[must_use]
    pub fn with_scenario(mut self, scenario: Option<String>) -> Self {
        self.scenario = scenario.filter(|s| !s.trim().is_empty());
        self
    }

    /// Permitted speakers.
    #[must_use]
    pub fn whitelist(&self) -> &[ParticipantId] {
        &self.whitelist
    }

    /// The system instruction: whitelist, output contract, no prose.
    #[must_use]
    pub fn system_instruction(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "You write a short in-world conversation between {}.\n",
            self.whitelist.iter().join(", ")
        ));
        prompt.push_str(&format!(
            "Only these identifiers may appear as \"speaker\": [{}].\n",
            self.whitelist.iter().map(|p| format!("\"{p}\"")).join(", ")
        ));
        prompt.push_str(
            "Respond with ONLY a JSON array of objects of the form \
             {\"speaker\": \"<identifier>\", \"content\": \"<spoken line>\"}.\n",
        );
        prompt.push_str("Do not write any prose, explanation or Markdown outside the JSON array.\n");

        if let Some(ref scenario) = self.scenario {
            prompt.push_str(&format!("Scenario: {scenario}\n"));
        }

        prompt.push_str(&format!("Write every line in locale \"{}\".\n", self.locale));
        prompt
    }

    /// The user instruction naming the round.
    #[must_use]
    pub fn user_instruction(&self, round: u32) -> String {
        if round <= 1 {
            format!(
                "Round {round} of {}: start the conversation. Each participant speaks at most twice.",
                self.total_rounds
            )
        } else {
            format!(
                "Round {round} of {}: continue the conversation from where it stopped. \
                 Each participant speaks at most twice.",
                self.total_rounds
            )
        }
    }

    /// Build the backend request for `round`, replaying prior rounds from
    /// `context` as assistant turns.
    #[must_use]
    pub fn request(&self, round: u32, context: &AssistantContext) -> BackendRequest {
        let mut messages = vec![ChatMessage::system(self.system_instruction())];
        messages.extend(context.messages());
        messages.push(ChatMessage::user(self.user_instruction(round)));

        BackendRequest {
            messages,
            force_json: true,
            whitelist: self.whitelist.clone(),
            round,
        }
    }
}

/// Raw JSON of earlier rounds, bounded by a character budget.
#[derive(Debug, Clone)]
pub struct AssistantContext {
    budget: usize,
    rounds: VecDeque<String>,
}

impl AssistantContext {
    /// Create an empty context with the given character budget.
    #[must_use]
    pub const fn new(budget: usize) -> Self {
        Self {
            budget,
            rounds: VecDeque::new(),
        }
    }

    /// Record the raw output of a successful round.
    pub fn push(&mut self, raw: impl Into<String>) {
        self.rounds.push_back(raw.into());
        self.evict_over_budget();
    }

    /// Total characters currently retained.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.rounds.iter().map(|r| r.chars().count()).sum()
    }

    /// Retained rounds as assistant messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.rounds.iter().map(ChatMessage::assistant).collect()
    }

    // Oldest rounds go first; a single round larger than the budget is cut
    // to its first `budget` characters.
    fn evict_over_budget(&mut self) {
        while self.char_len() > self.budget && self.rounds.len() > 1 {
            self.rounds.pop_front();
        }
        if let Some(only) = self.rounds.front_mut() {
            if only.chars().count() > self.budget {
                *only = only.chars().take(self.budget).collect();
            }
        }
        if self.budget == 0 {
            self.rounds.clear();
        }
    }
}
