//! Producer/consumer playback of generated rounds.
//!
//! The producer requests rounds one after another, shuffles each round's
//! turns, logs them and pushes them onto an unbounded FIFO channel. The
//! consumer displays one turn at a time and waits the pacing interval between
//! turns. Both observe one cancellation token, which the hard deadline also
//! cancels.
//!
//! Termination, highest priority first:
//!
//! 1. hard deadline or caller cancellation
//! 2. a round produced no valid turns
//! 3. every requested round produced
//! 4. enqueue deadline passed before the next round was requested
//!
//! A round whose request started before the enqueue deadline is always
//! enqueued in full, even if it finishes after it.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::collaborators::{HistorySink, WorldActuator, display_best_effort, log_best_effort};
use crate::config::StageConfig;
use crate::generation::{AssistantContext, RoundFailure, RoundGenerator, RoundPrompt};
use crate::session::SessionGuard;
use crate::types::{ActReason, ConversationKey, GeneratedTurn};

/// Everything one playback run needs, with its deadlines fixed up front.
#[derive(Debug, Clone)]
pub struct PlaybackPlan {
    pub conversation_key: ConversationKey,
    pub prompt: RoundPrompt,
    /// Rounds to produce, already clamped.
    pub rounds: u32,
    pub pacing: Duration,
    pub context_budget: usize,
    /// No new round is requested at or after this instant.
    pub enqueue_deadline: Instant,
    /// Everything stops at this instant.
    pub hard_deadline: Instant,
}

impl PlaybackPlan {
    /// Build a plan whose deadlines start now.
    #[must_use]
    pub fn starting_now(
        config: &StageConfig,
        conversation_key: ConversationKey,
        prompt: RoundPrompt,
        requested_rounds: u32,
    ) -> Self {
        let rounds = config.clamp_rounds(requested_rounds);
        let start = Instant::now();

        Self {
            conversation_key,
            prompt,
            rounds,
            pacing: config.pacing_interval,
            context_budget: config.context_char_budget,
            enqueue_deadline: start + config.enqueue_window_for(rounds),
            hard_deadline: start + config.hard_timeout_for(rounds),
        }
    }

    /// Same deadlines and key, different prompt.
    #[must_use]
    pub fn with_prompt(&self, prompt: RoundPrompt) -> Self {
        Self {
            prompt,
            ..self.clone()
        }
    }
}

/// Why a playback run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    /// Every requested round was produced and presented.
    Finished,
    /// The caller's token was cancelled.
    Cancelled,
    /// The hard deadline fired.
    HardDeadline,
    /// The enqueue deadline passed before the next round.
    EnqueueDeadline,
    /// The session stopped being alive at a round boundary.
    SessionLost,
    /// A round produced no valid turns.
    RoundFailed(RoundFailure),
}

/// What a playback run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    pub requested_rounds: u32,
    pub rounds_completed: u32,
    pub stop: StopCause,
    /// Every enqueued turn, in presentation order.
    pub transcript: Vec<GeneratedTurn>,
    /// Turns actually handed to the display.
    pub presented: usize,
}

impl PlaybackReport {
    /// Whether the run counts as complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stop == StopCause::Finished && self.rounds_completed == self.requested_rounds
    }

    /// The Act-level reason for this run.
    #[must_use]
    pub fn reason(&self) -> ActReason {
        match &self.stop {
            StopCause::Finished if self.is_complete() => ActReason::Completed,
            StopCause::RoundFailed(failure) => failure.reason(),
            _ => ActReason::Aborted,
        }
    }

    /// Transcript as `speaker: content` lines.
    #[must_use]
    pub fn transcript_text(&self) -> String {
        self.transcript
            .iter()
            .map(GeneratedTurn::line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug)]
enum PlaybackItem {
    Turn(GeneratedTurn),
    EndOfStream,
}

struct Produced {
    rounds_completed: u32,
    stop: StopCause,
    transcript: Vec<GeneratedTurn>,
}

struct Consumed {
    presented: usize,
    drained: bool,
}

/// The pipeline, bound to its collaborators.
#[derive(Clone)]
pub struct Playback {
    generator: RoundGenerator,
    world: Arc<dyn WorldActuator>,
    history: Arc<dyn HistorySink>,
}

impl Playback {
    /// Create a pipeline.
    pub fn new(
        generator: RoundGenerator,
        world: Arc<dyn WorldActuator>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        Self {
            generator,
            world,
            history,
        }
    }

    /// Run producer and consumer to completion.
    ///
    /// Never fails: every stop path, cancellation included, ends in a report.
    pub async fn run(
        &self,
        plan: &PlaybackPlan,
        session: &SessionGuard,
        cancel: &CancellationToken,
    ) -> PlaybackReport {
        let token = cancel.child_token();
        let (tx, rx) = mpsc::unbounded_channel();

        let work = async {
            tokio::join!(
                self.produce(plan, session, &token, tx),
                self.consume(plan, &token, rx)
            )
        };
        tokio::pin!(work);

        let mut hard_fired = false;
        let (produced, consumed) = tokio::select! {
            out = &mut work => out,
            () = tokio::time::sleep_until(plan.hard_deadline) => {
                hard_fired = true;
                info!(
                    conversation_key = %plan.conversation_key,
                    "Hard deadline reached, cancelling playback"
                );
                token.cancel();
                work.await
            }
        };

        let stop = match produced.stop {
            _ if hard_fired => StopCause::HardDeadline,
            StopCause::Finished | StopCause::EnqueueDeadline if !consumed.drained => {
                StopCause::Cancelled
            }
            other => other,
        };

        debug!(
            conversation_key = %plan.conversation_key,
            rounds = produced.rounds_completed,
            presented = consumed.presented,
            stop = ?stop,
            "Playback finished"
        );

        PlaybackReport {
            requested_rounds: plan.rounds,
            rounds_completed: produced.rounds_completed,
            stop,
            transcript: produced.transcript,
            presented: consumed.presented,
        }
    }

    async fn produce(
        &self,
        plan: &PlaybackPlan,
        session: &SessionGuard,
        token: &CancellationToken,
        tx: mpsc::UnboundedSender<PlaybackItem>,
    ) -> Produced {
        let mut rng = StdRng::from_entropy();
        let mut context = AssistantContext::new(plan.context_budget);
        let mut transcript = Vec::new();
        let mut rounds_completed = 0;
        let mut stop = StopCause::Finished;

        for round in 1..=plan.rounds {
            if token.is_cancelled() {
                stop = StopCause::Cancelled;
                break;
            }
            if Instant::now() >= plan.enqueue_deadline {
                info!(
                    round,
                    conversation_key = %plan.conversation_key,
                    "Enqueue deadline passed, no further rounds"
                );
                stop = StopCause::EnqueueDeadline;
                break;
            }
            if !session.is_alive() {
                info!(round, conversation_key = %plan.conversation_key, "Session no longer alive");
                stop = StopCause::SessionLost;
                break;
            }

            let request = plan.prompt.request(round, &context);
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => None,
                out = self.generator.run_round(request) => Some(out),
            };

            let output = match outcome {
                None => {
                    stop = StopCause::Cancelled;
                    break;
                }
                Some(Err(failure)) => {
                    stop = StopCause::RoundFailed(failure);
                    break;
                }
                Some(Ok(output)) => output,
            };

            let mut turns = output.turns;
            turns.shuffle(&mut rng);
            let last = turns.len().saturating_sub(1);

            for (i, turn) in turns.into_iter().enumerate() {
                log_best_effort(
                    self.history.as_ref(),
                    &plan.conversation_key,
                    &turn.speaker,
                    &turn.content,
                    i == last,
                );
                transcript.push(turn.clone());
                // The consumer only goes away after cancellation, which the
                // next boundary check picks up.
                let _ = tx.send(PlaybackItem::Turn(turn));
            }

            context.push(output.raw);
            rounds_completed += 1;
            debug!(round, conversation_key = %plan.conversation_key, "Round enqueued");
        }

        let _ = tx.send(PlaybackItem::EndOfStream);

        Produced {
            rounds_completed,
            stop,
            transcript,
        }
    }

    async fn consume(
        &self,
        plan: &PlaybackPlan,
        token: &CancellationToken,
        mut rx: mpsc::UnboundedReceiver<PlaybackItem>,
    ) -> Consumed {
        let mut presented = 0;
        let mut last_shown: Option<Instant> = None;

        loop {
            let item = tokio::select! {
                biased;
                () = token.cancelled() => return Consumed { presented, drained: false },
                item = rx.recv() => item,
            };

            let turn = match item {
                Some(PlaybackItem::Turn(turn)) => turn,
                Some(PlaybackItem::EndOfStream) | None => {
                    return Consumed {
                        presented,
                        drained: true,
                    };
                }
            };

            // Pacing separates turns; nothing waits after the last one.
            if let Some(shown) = last_shown {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Consumed { presented, drained: false },
                    () = tokio::time::sleep_until(shown + plan.pacing) => {}
                }
            }

            display_best_effort(self.world.as_ref(), &turn.speaker, &turn.content);
            last_shown = Some(Instant::now());
            presented += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{OccupancyRequest, ReleaseReason};
    use crate::testing::{InMemoryWorld, RecordingHistory, ScriptedBackend};
    use crate::types::ParticipantId;

    const ROUND: &str =
        r#"[{"speaker":"pawn:1","content":"One"},{"speaker":"pawn:2","content":"Two"}]"#;

    struct Fixture {
        world: Arc<InMemoryWorld>,
        history: Arc<RecordingHistory>,
        playback: Playback,
        session: SessionGuard,
    }

    fn participants() -> Vec<ParticipantId> {
        vec![ParticipantId::new("pawn:1"), ParticipantId::new("pawn:2")]
    }

    fn fixture(backend: ScriptedBackend) -> Option<Fixture> {
        let world = Arc::new(InMemoryWorld::new());
        let history = Arc::new(RecordingHistory::new());
        let playback = Playback::new(
            RoundGenerator::new(Arc::new(backend)),
            world.clone(),
            history.clone(),
        );
        let session = SessionGuard::acquire(
            world.clone(),
            &OccupancyRequest {
                participants: participants(),
                radius: 12.0,
                max_domain_hours: 2.0,
            },
            Duration::from_secs(600),
        )
        .ok()?;
        Some(Fixture {
            world,
            history,
            playback,
            session,
        })
    }

    fn plan(config: &StageConfig, rounds: u32) -> PlaybackPlan {
        let key = ConversationKey::from_participants(&participants());
        PlaybackPlan::starting_now(
            config,
            key,
            RoundPrompt::new(participants(), "en", rounds),
            rounds,
        )
    }

    fn fast_config() -> StageConfig {
        StageConfig::default().pacing(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_rounds_presented_in_enqueue_order() {
        let Some(f) = fixture(ScriptedBackend::new().respond(ROUND).respond(ROUND)) else {
            return;
        };
        let config = fast_config();
        let report = f
            .playback
            .run(&plan(&config, 2), &f.session, &CancellationToken::new())
            .await;

        assert!(report.is_complete());
        assert_eq!(report.reason(), ActReason::Completed);
        assert_eq!(report.rounds_completed, 2);
        assert_eq!(report.presented, 4);

        let displayed: Vec<String> = f
            .world
            .displayed()
            .into_iter()
            .map(|(speaker, text)| format!("{speaker}: {text}"))
            .collect();
        let transcript: Vec<String> = report.transcript.iter().map(GeneratedTurn::line).collect();
        assert_eq!(displayed, transcript);

        f.session.release(ReleaseReason::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_advances_on_last_turn_of_each_round() {
        let Some(f) = fixture(ScriptedBackend::new().respond(ROUND).respond(ROUND)) else {
            return;
        };
        let config = fast_config();
        let _ = f
            .playback
            .run(&plan(&config, 2), &f.session, &CancellationToken::new())
            .await;

        let advances: Vec<bool> = f.history.lines().iter().map(|l| l.advance_turn).collect();
        assert_eq!(advances, vec![false, true, false, true]);
        f.session.release(ReleaseReason::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_round_keeps_earlier_turns() {
        let Some(f) = fixture(
            ScriptedBackend::new()
                .respond(ROUND)
                .respond(r#"[{"speaker":"pawn:9","content":"Hi"}]"#),
        ) else {
            return;
        };
        let config = fast_config();
        let report = f
            .playback
            .run(&plan(&config, 3), &f.session, &CancellationToken::new())
            .await;

        assert!(!report.is_complete());
        assert_eq!(report.rounds_completed, 1);
        assert_eq!(report.reason(), ActReason::NoWhitelistedContent);
        assert_eq!(report.transcript.len(), 2);
        assert_eq!(report.presented, 2);
        f.session.release(ReleaseReason::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_deadline_stops_slow_backend() {
        let backend = ScriptedBackend::new()
            .with_delay(Duration::from_secs(20))
            .respond(ROUND)
            .respond(ROUND)
            .respond(ROUND);
        let Some(f) = fixture(backend) else {
            return;
        };
        let config = fast_config().hard_timeout(Duration::from_secs(30), Duration::from_secs(10));
        let start = Instant::now();

        let report = f
            .playback
            .run(&plan(&config, 3), &f.session, &CancellationToken::new())
            .await;

        assert_eq!(report.stop, StopCause::HardDeadline);
        assert_eq!(report.reason(), ActReason::Aborted);
        assert_eq!(report.rounds_completed, 1);
        assert!(start.elapsed() <= Duration::from_secs(30) + config.pacing_interval);
        f.session.release(ReleaseReason::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_turn_close_to_hard_deadline_still_completes() {
        // Hard 30s. The round lands at 23s and its second turn shows at 28s;
        // a pacing wait after it would cross the deadline.
        let backend = ScriptedBackend::new()
            .with_delay(Duration::from_secs(23))
            .respond(ROUND);
        let Some(f) = fixture(backend) else {
            return;
        };
        let config = StageConfig::default()
            .pacing(Duration::from_secs(5))
            .hard_timeout(Duration::from_secs(30), Duration::from_secs(10));
        let start = Instant::now();

        let report = f
            .playback
            .run(&plan(&config, 1), &f.session, &CancellationToken::new())
            .await;

        assert_eq!(report.stop, StopCause::Finished);
        assert!(report.is_complete());
        assert_eq!(report.presented, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(28));
        f.session.release(ReleaseReason::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_stops_promptly() {
        let Some(f) = fixture(
            ScriptedBackend::new()
                .with_delay(Duration::from_secs(5))
                .respond(ROUND),
        ) else {
            return;
        };
        let config = fast_config();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let report = f.playback.run(&plan(&config, 1), &f.session, &cancel).await;

        assert_eq!(report.stop, StopCause::Cancelled);
        assert_eq!(report.rounds_completed, 0);
        assert!(start.elapsed() < Duration::from_secs(2));
        f.session.release(ReleaseReason::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_deadline_lets_inflight_round_finish() {
        // Hard 30s, enqueue window 24s. Round 1 starts at 0s and ends at 25s,
        // past the window, but is enqueued in full; round 2 is never asked.
        let backend = ScriptedBackend::new()
            .with_delay(Duration::from_secs(25))
            .respond(ROUND)
            .respond(ROUND);
        let Some(f) = fixture(backend) else {
            return;
        };
        let config = fast_config().hard_timeout(Duration::from_secs(30), Duration::from_secs(10));

        let report = f
            .playback
            .run(&plan(&config, 2), &f.session, &CancellationToken::new())
            .await;

        assert_eq!(report.stop, StopCause::EnqueueDeadline);
        assert_eq!(report.rounds_completed, 1);
        assert_eq!(report.presented, 2);
        assert_eq!(report.reason(), ActReason::Aborted);
        f.session.release(ReleaseReason::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_session_stops_at_round_boundary() {
        let Some(f) = fixture(ScriptedBackend::new().respond(ROUND).respond(ROUND)) else {
            return;
        };
        f.world.kill_sessions();
        let config = fast_config();

        let report = f
            .playback
            .run(&plan(&config, 2), &f.session, &CancellationToken::new())
            .await;

        assert_eq!(report.stop, StopCause::SessionLost);
        assert_eq!(report.rounds_completed, 0);
        f.session.release(ReleaseReason::Aborted);
    }
}
