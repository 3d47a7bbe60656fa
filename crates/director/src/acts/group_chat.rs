//! A multi-round conversation among a small group of participants.

use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::act::{Act, ActRequest};
use crate::collaborators::{
    GenerativeBackend, HistorySink, OccupancyRequest, ReleaseReason, WorldActuator,
};
use crate::config::StageConfig;
use crate::generation::{RoundGenerator, RoundPrompt};
use crate::playback::{Playback, PlaybackPlan, PlaybackReport, StopCause};
use crate::session::SessionGuard;
use crate::types::{ActReason, ActResult, ParticipantId};

/// Group conversation Act.
///
/// Holds an occupancy session over all participants for the whole run. When
/// a scenario hint yields no dialogue at all, the run is retried once on the
/// configured fallback topic, inside the same session and deadlines.
pub struct GroupChatAct {
    participants: RangeInclusive<usize>,
    config: StageConfig,
    world: Arc<dyn WorldActuator>,
    playback: Playback,
}

impl GroupChatAct {
    /// Registry name.
    pub const NAME: &'static str = "GroupChat";

    /// Create the Act with a 2..=5 participant range.
    pub fn new(
        config: StageConfig,
        backend: Arc<dyn GenerativeBackend>,
        world: Arc<dyn WorldActuator>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let playback = Playback::new(RoundGenerator::new(backend), world.clone(), history);
        Self {
            participants: 2..=5,
            config,
            world,
            playback,
        }
    }

    /// Override the accepted number of distinct participants.
    #[must_use]
    pub fn with_participant_range(mut self, range: RangeInclusive<usize>) -> Self {
        self.participants = range;
        self
    }

    fn prompt(
        &self,
        participants: &[ParticipantId],
        locale: &str,
        rounds: u32,
        scenario: Option<String>,
    ) -> RoundPrompt {
        RoundPrompt::new(participants.to_vec(), locale, self.config.clamp_rounds(rounds))
            .with_scenario(scenario)
    }
}

#[async_trait]
impl Act for GroupChatAct {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_eligible(&self, request: &ActRequest) -> bool {
        self.participants
            .contains(&request.intent.distinct_participants().len())
            && request.has_live_ticket()
    }

    async fn execute(&self, request: &ActRequest, cancel: CancellationToken) -> ActResult {
        let intent = &request.intent;
        let participants = intent.distinct_participants();
        let names = participants.iter().join(", ");

        let occupancy = OccupancyRequest {
            participants: participants.clone(),
            radius: self.config.session_radius,
            max_domain_hours: self.config.session_max_domain_hours,
        };
        let session = match SessionGuard::acquire(
            self.world.clone(),
            &occupancy,
            self.config.session_max_wall,
        ) {
            Ok(session) => session,
            Err(e) => {
                info!(participants = %names, error = %e, "Occupancy unavailable, not starting");
                return ActResult::failed(
                    ActReason::ResourceUnavailable,
                    format!("{names} could not get together right now."),
                    0,
                );
            }
        };

        let plan = PlaybackPlan::starting_now(
            &self.config,
            intent.conversation_key(),
            self.prompt(&participants, &intent.locale, intent.rounds, intent.scenario.clone()),
            intent.rounds,
        );
        let mut report = self.playback.run(&plan, &session, &cancel).await;

        if needs_topic_fallback(&report, intent.scenario.as_deref()) {
            if let Some(topic) = self.config.fallback_topic.clone() {
                info!(
                    conversation_key = %plan.conversation_key,
                    topic = %topic,
                    "Scenario produced no dialogue, retrying on fallback topic"
                );
                let fallback = plan.with_prompt(self.prompt(
                    &participants,
                    &intent.locale,
                    intent.rounds,
                    Some(topic),
                ));
                report = self.playback.run(&fallback, &session, &cancel).await;
            }
        }

        let result = into_result(&report, &names);
        session.release(if result.completed {
            ReleaseReason::Completed
        } else {
            ReleaseReason::Aborted
        });

        debug!(
            conversation_key = %plan.conversation_key,
            completed = result.completed,
            reason = %result.reason,
            rounds = result.rounds,
            "Group chat finished"
        );
        result
    }
}

fn needs_topic_fallback(report: &PlaybackReport, scenario: Option<&str>) -> bool {
    report.rounds_completed == 0
        && matches!(report.stop, StopCause::RoundFailed(_))
        && scenario.is_some_and(|s| !s.trim().is_empty())
}

fn into_result(report: &PlaybackReport, names: &str) -> ActResult {
    let reason = report.reason();
    let text = if report.transcript.is_empty() {
        fallback_message(reason, names)
    } else {
        report.transcript_text()
    };

    if report.is_complete() {
        ActResult::completed(text, report.rounds_completed)
    } else {
        ActResult::failed(reason, text, report.rounds_completed)
    }
}

fn fallback_message(reason: ActReason, names: &str) -> String {
    match reason {
        ActReason::NoContent | ActReason::NoWhitelistedContent => {
            format!("{names} stood around without finding anything to say.")
        }
        ActReason::Aborted => format!("The conversation between {names} was cut short."),
        _ => format!("{names} talked for a while."),
    }
}
