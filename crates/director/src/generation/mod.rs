//! One generation round: compose, call the backend, validate.
//!
//! A round either yields at least one whitelisted turn or fails. Failures are
//! never retried here; the Act decides whether to abort or fall back.

pub mod contract;
pub mod prompt;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::collaborators::{BackendRequest, GenerativeBackend};
use crate::error::Error;
use crate::types::{ActReason, GeneratedTurn};

pub use contract::{ParsedRound, parse_turns};
pub use prompt::{AssistantContext, RoundPrompt};

/// A successful round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutput {
    pub round: u32,
    /// Validated turns in response order.
    pub turns: Vec<GeneratedTurn>,
    /// Raw response text, replayed as assistant context in later rounds.
    pub raw: String,
}

/// Why a round produced no dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundFailure {
    /// The backend call itself failed.
    Backend { reason: String },
    /// Output was unparseable, empty, or only malformed elements.
    InvalidResponse { reason: String },
    /// Output had well-formed turns, none by a participant.
    NoWhitelistedContent { discarded: usize },
}

impl RoundFailure {
    /// The Act-level reason this failure maps to.
    #[must_use]
    pub const fn reason(&self) -> ActReason {
        match self {
            Self::Backend { .. } | Self::InvalidResponse { .. } => ActReason::NoContent,
            Self::NoWhitelistedContent { .. } => ActReason::NoWhitelistedContent,
        }
    }
}

/// Runs rounds against a backend.
#[derive(Clone)]
pub struct RoundGenerator {
    backend: Arc<dyn GenerativeBackend>,
}

impl RoundGenerator {
    /// Create a generator over the given backend.
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self { backend }
    }

    /// Request and validate one round.
    ///
    /// Cancellation is the caller's concern: dropping the returned future
    /// abandons the backend call.
    pub async fn run_round(&self, request: BackendRequest) -> Result<RoundOutput, RoundFailure> {
        let round = request.round;
        let whitelist = request.whitelist.clone();
        let start = Instant::now();

        let raw = match self.backend.send(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(round, error = %e, "Backend call failed");
                return Err(RoundFailure::Backend {
                    reason: e.to_string(),
                });
            }
        };

        let parsed = parse_turns(&raw, &whitelist);
        debug!(
            round,
            turns = parsed.turns.len(),
            off_whitelist = parsed.off_whitelist,
            malformed = parsed.malformed,
            duration_ms = start.elapsed().as_millis(),
            "Round response validated"
        );

        if parsed.is_empty() {
            if parsed.off_whitelist > 0 {
                warn!(round, discarded = parsed.off_whitelist, "Round had no whitelisted speakers");
                return Err(RoundFailure::NoWhitelistedContent {
                    discarded: parsed.off_whitelist,
                });
            }

            let error = invalid_response(&parsed);
            warn!(round, error = %error, "Round produced no valid turns");
            return Err(RoundFailure::InvalidResponse {
                reason: error.to_string(),
            });
        }

        Ok(RoundOutput {
            round,
            turns: parsed.turns,
            raw,
        })
    }
}

fn invalid_response(parsed: &ParsedRound) -> Error {
    if !parsed.parsed {
        Error::invalid_response("no JSON array of turns found")
    } else if parsed.malformed > 0 {
        Error::invalid_response(format!("{} malformed turns, none usable", parsed.malformed))
    } else {
        Error::invalid_response("empty turn array")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use crate::types::ParticipantId;

    fn request(round: u32) -> BackendRequest {
        RoundPrompt::new(
            vec![ParticipantId::new("pawn:1"), ParticipantId::new("pawn:2")],
            "en",
            2,
        )
        .request(round, &AssistantContext::new(100))
    }

    #[tokio::test]
    async fn test_successful_round() {
        let backend = Arc::new(ScriptedBackend::new().respond(
            r#"[{"speaker":"pawn:1","content":"Hi"},{"speaker":"pawn:2","content":"Hey"}]"#,
        ));
        let generator = RoundGenerator::new(backend);

        let output = generator.run_round(request(1)).await;
        assert!(output.is_ok());
        assert_eq!(output.map(|o| o.turns.len()).unwrap_or(0), 2);
    }

    #[tokio::test]
    async fn test_backend_error_fails_round() {
        let backend = Arc::new(ScriptedBackend::new().fail("model overloaded"));
        let generator = RoundGenerator::new(backend);

        let output = generator.run_round(request(1)).await;
        assert!(matches!(output, Err(RoundFailure::Backend { .. })));
        assert_eq!(
            output.err().map(|f| f.reason()),
            Some(ActReason::NoContent)
        );
    }

    #[tokio::test]
    async fn test_only_strangers_fails_with_no_whitelisted_content() {
        let backend = Arc::new(
            ScriptedBackend::new().respond(r#"[{"speaker":"pawn:9","content":"Hello?"}]"#),
        );
        let generator = RoundGenerator::new(backend);

        let output = generator.run_round(request(1)).await;
        assert_eq!(
            output.err(),
            Some(RoundFailure::NoWhitelistedContent { discarded: 1 })
        );
    }

    #[tokio::test]
    async fn test_prose_fails_with_no_content() {
        let backend = Arc::new(ScriptedBackend::new().respond("They chatted about crops."));
        let generator = RoundGenerator::new(backend);

        let output = generator.run_round(request(1)).await;
        assert!(matches!(
            &output,
            Err(RoundFailure::InvalidResponse { reason }) if reason.contains("no JSON array")
        ));
        assert_eq!(output.err().map(|f| f.reason()), Some(ActReason::NoContent));
    }

    #[tokio::test]
    async fn test_only_malformed_turns_is_an_invalid_response() {
        let backend = Arc::new(ScriptedBackend::new().respond(
            r#"[{"speaker":"pawn:1"},{"speaker":"","content":"Hi"}]"#,
        ));
        let generator = RoundGenerator::new(backend);

        let output = generator.run_round(request(1)).await;
        assert!(matches!(
            output,
            Err(RoundFailure::InvalidResponse { reason }) if reason.contains("2 malformed")
        ));
    }
}
