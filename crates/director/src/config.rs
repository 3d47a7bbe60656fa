//! Configuration for the stage director.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for arbitration, playback pacing and session limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Lease length of a ticket.
    #[serde(with = "duration_millis", default = "default_ticket_ttl")]
    pub ticket_ttl: Duration,

    /// How long a terminal result stays in the idempotency cache.
    #[serde(with = "duration_millis", default = "default_idempotency_retention")]
    pub idempotency_retention: Duration,

    /// Upper bound on idempotency cache entries.
    #[serde(default = "default_idempotency_capacity")]
    pub idempotency_capacity: u64,

    /// Delay the consumer waits after each displayed turn.
    #[serde(with = "duration_millis", default = "default_pacing_interval")]
    pub pacing_interval: Duration,

    /// Hard-timeout allowance per requested round.
    #[serde(with = "duration_millis", default = "default_per_round_budget")]
    pub per_round_budget: Duration,

    /// Minimum hard timeout regardless of round count.
    #[serde(with = "duration_millis", default = "default_hard_timeout_floor")]
    pub hard_timeout_floor: Duration,

    /// Fraction of the hard timeout after which no new round is requested.
    #[serde(default = "default_enqueue_window_ratio")]
    pub enqueue_window_ratio: f64,

    /// Max characters of prior-round JSON injected as assistant context.
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,

    /// Requested rounds are clamped to `1..=max_rounds`.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Occupancy radius handed to the world actuator.
    #[serde(default = "default_session_radius")]
    pub session_radius: f32,

    /// Wall-clock liveness cap of a session.
    #[serde(with = "duration_millis", default = "default_session_max_wall")]
    pub session_max_wall: Duration,

    /// Domain-time liveness cap, enforced by the actuator.
    #[serde(default = "default_session_max_domain_hours")]
    pub session_max_domain_hours: f32,

    /// Period of the background trigger scan.
    #[serde(with = "duration_millis", default = "default_scan_interval")]
    pub scan_interval: Duration,

    /// Generic topic used when a scenario produces no dialogue.
    #[serde(default = "default_fallback_topic")]
    pub fallback_topic: Option<String>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            ticket_ttl: default_ticket_ttl(),
            idempotency_retention: default_idempotency_retention(),
            idempotency_capacity: default_idempotency_capacity(),
            pacing_interval: default_pacing_interval(),
            per_round_budget: default_per_round_budget(),
            hard_timeout_floor: default_hard_timeout_floor(),
            enqueue_window_ratio: default_enqueue_window_ratio(),
            context_char_budget: default_context_char_budget(),
            max_rounds: default_max_rounds(),
            session_radius: default_session_radius(),
            session_max_wall: default_session_max_wall(),
            session_max_domain_hours: default_session_max_domain_hours(),
            scan_interval: default_scan_interval(),
            fallback_topic: default_fallback_topic(),
        }
    }
}

impl StageConfig {
    /// Set the ticket lease length.
    #[must_use]
    pub const fn ticket_ttl(mut self, ttl: Duration) -> Self {
        self.ticket_ttl = ttl;
        self
    }

    /// Set the consumer pacing interval.
    #[must_use]
    pub const fn pacing(mut self, interval: Duration) -> Self {
        self.pacing_interval = interval;
        self
    }

    /// Set the hard-timeout shape: `max(floor, rounds * per_round)`.
    #[must_use]
    pub const fn hard_timeout(mut self, floor: Duration, per_round: Duration) -> Self {
        self.hard_timeout_floor = floor;
        self.per_round_budget = per_round;
        self
    }

    /// Set the generic fallback topic, or disable the fallback path.
    #[must_use]
    pub fn fallback_topic(mut self, topic: Option<String>) -> Self {
        self.fallback_topic = topic;
        self
    }

    /// Clamp a requested round count into `1..=max_rounds`.
    #[must_use]
    pub fn clamp_rounds(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_rounds.max(1))
    }

    /// Hard timeout for a session requesting `rounds` rounds.
    #[must_use]
    pub fn hard_timeout_for(&self, rounds: u32) -> Duration {
        self.per_round_budget
            .saturating_mul(rounds)
            .max(self.hard_timeout_floor)
    }

    /// Offset after which no further round is requested.
    #[must_use]
    pub fn enqueue_window_for(&self, rounds: u32) -> Duration {
        self.hard_timeout_for(rounds)
            .mul_f64(self.enqueue_window_ratio.clamp(0.0, 1.0))
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.ticket_ttl.is_zero() {
            return Err(Error::config_error("ticket_ttl must be positive"));
        }
        if self.pacing_interval.is_zero() {
            return Err(Error::config_error("pacing_interval must be positive"));
        }
        if self.scan_interval.is_zero() {
            return Err(Error::config_error("scan_interval must be positive"));
        }
        if self.max_rounds == 0 {
            return Err(Error::config_error("max_rounds must be at least 1"));
        }
        if !(self.enqueue_window_ratio > 0.0 && self.enqueue_window_ratio <= 1.0) {
            return Err(Error::config_error(format!(
                "enqueue_window_ratio must be in (0, 1], got {}",
                self.enqueue_window_ratio
            )));
        }
        if self.idempotency_capacity == 0 {
            return Err(Error::config_error("idempotency_capacity must be positive"));
        }
        let longest = self.hard_timeout_for(self.max_rounds);
        if self.ticket_ttl < longest {
            return Err(Error::config_error(format!(
                "ticket_ttl ({}ms) is shorter than the longest hard timeout ({}ms)",
                self.ticket_ttl.as_millis(),
                longest.as_millis()
            )));
        }
        Ok(())
    }

    /// Load configuration overrides from `STAGE_*` environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_u64("STAGE_TICKET_TTL_MS") {
            config.ticket_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("STAGE_PACING_MS") {
            config.pacing_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("STAGE_PER_ROUND_BUDGET_MS") {
            config.per_round_budget = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("STAGE_SCAN_INTERVAL_MS") {
            config.scan_interval = Duration::from_millis(ms);
        }
        if let Some(rounds) = env_u64("STAGE_MAX_ROUNDS").and_then(|r| u32::try_from(r).ok()) {
            config.max_rounds = rounds;
        }
        if let Ok(topic) = std::env::var("STAGE_FALLBACK_TOPIC") {
            config.fallback_topic = if topic.trim().is_empty() {
                None
            } else {
                Some(topic)
            };
        }

        config
    }

    /// Load configuration from a file.
    ///
    /// JSON when the extension is `.json`, TOML otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// [`StageConfig::validate`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

const fn default_ticket_ttl() -> Duration {
    Duration::from_secs(180)
}

const fn default_idempotency_retention() -> Duration {
    Duration::from_secs(300)
}

const fn default_idempotency_capacity() -> u64 {
    1024
}

const fn default_pacing_interval() -> Duration {
    Duration::from_millis(1500)
}

const fn default_per_round_budget() -> Duration {
    Duration::from_secs(20)
}

const fn default_hard_timeout_floor() -> Duration {
    Duration::from_secs(30)
}

const fn default_enqueue_window_ratio() -> f64 {
    0.8
}

const fn default_context_char_budget() -> usize {
    2000
}

const fn default_max_rounds() -> u32 {
    5
}

const fn default_session_radius() -> f32 {
    12.0
}

const fn default_session_max_wall() -> Duration {
    Duration::from_secs(300)
}

const fn default_session_max_domain_hours() -> f32 {
    2.0
}

const fn default_scan_interval() -> Duration {
    Duration::from_secs(10)
}

#[allow(clippy::unnecessary_wraps)]
fn default_fallback_topic() -> Option<String> {
    Some("everyday small talk".to_string())
}

/// Serialization helper for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
