//! The stage: registry, arbiter and scanner wired together.
//!
//! [`Stage::submit`] is the single entry point for running an Act, whether
//! the intent comes from a caller or from the trigger scanner.

use std::sync::Arc;

use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::act::{ActRegistry, ActRequest};
use crate::arbiter::{LeaseDecision, RejectReason, TicketArbiter};
use crate::collaborators::WorldSampler;
use crate::config::StageConfig;
use crate::trigger::TriggerScanner;
use crate::types::{ActReason, ActResult, RunIntent, TicketSnapshot};

/// What happened to a submitted intent.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// No Act is registered under the intent's name.
    UnknownAct,
    /// Another execution holds the conversation key.
    Rejected(RejectReason),
    /// The same intent is already executing.
    InFlight(TicketSnapshot),
    /// The same intent finished recently.
    Cached(ActResult),
    /// The Act refused the request.
    Ineligible(ActResult),
    /// The Act ran.
    Finished(ActResult),
}

impl SubmitOutcome {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::UnknownAct => "unknown_act",
            Self::Rejected(_) => "rejected",
            Self::InFlight(_) => "in_flight",
            Self::Cached(_) => "cached",
            Self::Ineligible(_) => "ineligible",
            Self::Finished(_) => "finished",
        }
    }

    /// The result carried by this outcome, if any.
    #[must_use]
    pub const fn result(&self) -> Option<&ActResult> {
        match self {
            Self::Cached(result) | Self::Ineligible(result) | Self::Finished(result) => {
                Some(result)
            }
            _ => None,
        }
    }
}

/// Orchestration service.
#[derive(Clone)]
pub struct Stage {
    config: StageConfig,
    arbiter: Arc<TicketArbiter>,
    registry: Arc<ActRegistry>,
    scanner: TriggerScanner,
}

impl Stage {
    /// Create a stage. The registry and scanner are fixed from here on.
    #[must_use]
    pub fn new(config: StageConfig, registry: ActRegistry, scanner: TriggerScanner) -> Self {
        Self {
            arbiter: Arc::new(TicketArbiter::new(config.clone())),
            config,
            registry: Arc::new(registry),
            scanner,
        }
    }

    /// The arbiter.
    #[must_use]
    pub fn arbiter(&self) -> &TicketArbiter {
        &self.arbiter
    }

    /// Registered Act names, sorted.
    #[must_use]
    pub fn act_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Live ticket snapshots.
    #[must_use]
    pub fn query_running(&self) -> Vec<TicketSnapshot> {
        self.arbiter.query_running()
    }

    /// Administrative reset of the idempotency cache.
    pub fn clear_idempotency_cache(&self) {
        self.arbiter.clear_idempotency_cache();
    }

    /// Lease, check eligibility, execute and retire.
    pub async fn submit(&self, intent: RunIntent, cancel: CancellationToken) -> SubmitOutcome {
        let Some(act) = self.registry.get(&intent.act) else {
            debug!(act = %intent.act, "No such Act");
            return SubmitOutcome::UnknownAct;
        };

        let ticket = match self.arbiter.try_lease(&intent) {
            LeaseDecision::Leased(ticket) => ticket,
            LeaseDecision::Rejected(reason) => return SubmitOutcome::Rejected(reason),
            LeaseDecision::InFlight(snapshot) => return SubmitOutcome::InFlight(snapshot),
            LeaseDecision::Cached(result) => return SubmitOutcome::Cached(result),
        };

        let request = ActRequest::leased(intent, ticket.clone());
        if !act.is_eligible(&request) {
            debug!(act = act.name(), ticket_id = %ticket.id, "Request not eligible");
            self.arbiter.abandon(&ticket);
            return SubmitOutcome::Ineligible(ActResult::failed(
                ActReason::Ineligible,
                format!("{} cannot run with this cast.", act.name()),
                0,
            ));
        }

        info!(
            act = act.name(),
            ticket_id = %ticket.id,
            conversation_key = %ticket.conversation_key,
            "Act starting"
        );
        let result = act.execute(&request, cancel).await;
        self.arbiter.retire(&ticket, result.clone());

        info!(
            act = act.name(),
            ticket_id = %ticket.id,
            completed = result.completed,
            reason = %result.reason,
            rounds = result.rounds,
            "Act finished"
        );
        SubmitOutcome::Finished(result)
    }

    /// Poll every trigger once and submit each proposal on its own task.
    pub fn scan_once(
        &self,
        sampler: &dyn WorldSampler,
        rng: &mut dyn RngCore,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<SubmitOutcome>> {
        self.scanner
            .scan(sampler, rng)
            .into_iter()
            .map(|intent| {
                let stage = self.clone();
                let token = cancel.child_token();
                tokio::spawn(async move {
                    let key = intent.conversation_key();
                    let outcome = stage.submit(intent, token).await;
                    debug!(
                        conversation_key = %key,
                        outcome = outcome.label(),
                        "Triggered submission done"
                    );
                    outcome
                })
            })
            .collect()
    }

    /// Scan every `scan_interval` until `cancel` fires.
    ///
    /// A zero `scan_interval` falls back to the default period.
    pub fn spawn_scanner(
        &self,
        sampler: Arc<dyn WorldSampler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let stage = self.clone();
        let period = if self.config.scan_interval.is_zero() {
            let fallback = StageConfig::default().scan_interval;
            warn!(fallback_ms = fallback.as_millis(), "Zero scan interval, using the default");
            fallback
        } else {
            self.config.scan_interval
        };

        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval_ms = period.as_millis(),
                triggers = stage.scanner.len(),
                "Trigger scanner started"
            );
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let spawned = stage.scan_once(sampler.as_ref(), &mut rng, &cancel);
                        if !spawned.is_empty() {
                            debug!(proposals = spawned.len(), "Scan submitted proposals");
                        }
                    }
                }
            }
            info!("Trigger scanner stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acts::GroupChatAct;
    use crate::testing::{InMemoryWorld, RecordingHistory, ScriptedBackend, StaticSampler};
    use std::time::Duration;

    const ROUND: &str =
        r#"[{"speaker":"pawn:1","content":"Hi"},{"speaker":"pawn:2","content":"Hey"}]"#;

    fn stage(backend: ScriptedBackend) -> Stage {
        let config = StageConfig::default().pacing(Duration::from_millis(10));
        let act = GroupChatAct::new(
            config.clone(),
            Arc::new(backend),
            Arc::new(InMemoryWorld::new()),
            Arc::new(RecordingHistory::new()),
        );
        Stage::new(config, ActRegistry::new().with(Arc::new(act)), TriggerScanner::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_act() {
        let outcome = stage(ScriptedBackend::new())
            .submit(RunIntent::new("Duel", ["pawn:1", "pawn:2"]), CancellationToken::new())
            .await;
        assert_eq!(outcome, SubmitOutcome::UnknownAct);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ineligible_request_leaves_no_trace() {
        let stage = stage(ScriptedBackend::new());
        let outcome = stage
            .submit(RunIntent::new(GroupChatAct::NAME, ["pawn:1"]), CancellationToken::new())
            .await;

        assert_eq!(outcome.label(), "ineligible");
        assert_eq!(outcome.result().map(|r| r.reason), Some(ActReason::Ineligible));
        assert!(stage.query_running().is_empty());
        assert_eq!(stage.arbiter().idempotency_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_run_is_cached_for_same_seed() {
        let stage = stage(ScriptedBackend::new().respond(ROUND));
        let intent = RunIntent::new(GroupChatAct::NAME, ["pawn:1", "pawn:2"]).with_seed("s1");

        let first = stage.submit(intent.clone(), CancellationToken::new()).await;
        assert_eq!(first.label(), "finished");
        assert!(stage.query_running().is_empty());

        let second = stage.submit(intent, CancellationToken::new()).await;
        assert_eq!(second.label(), "cached");
        assert_eq!(first.result(), second.result());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_scan_interval_does_not_kill_the_scanner() {
        let config = StageConfig {
            scan_interval: Duration::ZERO,
            ..StageConfig::default()
        };
        let stage = Stage::new(config, ActRegistry::new(), TriggerScanner::new());
        let cancel = CancellationToken::new();
        let task = stage.spawn_scanner(
            Arc::new(StaticSampler::new(["pawn:1", "pawn:2"], 1)),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        assert!(matches!(task.await, Ok(())));
    }

    #[test]
    fn test_act_names() {
        assert_eq!(stage(ScriptedBackend::new()).act_names(), vec!["GroupChat".to_string()]);
    }
}
