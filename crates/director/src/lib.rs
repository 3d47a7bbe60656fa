//! Stage director: runs scripted multi-party Acts against a generative
//! backend.
//!
//! The crate arbitrates between racing trigger sources, runs one Act per
//! conversation key at a time, and plays generated dialogue back at a fixed
//! pace under a hard deadline. Key pieces:
//!
//! - **Ticket arbiter**: leases one live ticket per conversation key and
//!   collapses duplicate intents through an idempotency cache.
//! - **Act registry**: name to Act mapping, built once and shared.
//! - **Trigger scanner**: polls triggers that propose intents from a
//!   read-only view of the world.
//! - **Playback**: a producer requesting rounds and a paced consumer
//!   displaying turns, sharing one cancellation token.
//! - **Session guard**: an occupancy session released exactly once on every
//!   exit path.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stage_director::{
//!     ActRegistry, GroupChatAct, RunIntent, Stage, StageConfig, TriggerScanner,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = StageConfig::default();
//!     let act = GroupChatAct::new(config.clone(), backend, world, history);
//!     let stage = Stage::new(
//!         config,
//!         ActRegistry::new().with(Arc::new(act)),
//!         TriggerScanner::new(),
//!     );
//!
//!     let intent = RunIntent::new("GroupChat", ["pawn:1", "pawn:2"]).with_rounds(2);
//!     let outcome = stage.submit(intent, CancellationToken::new()).await;
//!     println!("{outcome:?}");
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod act;
pub mod acts;
pub mod arbiter;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod generation;
pub mod idempotent;
pub mod playback;
pub mod session;
pub mod stage;
pub mod testing;
pub mod trigger;
pub mod types;

pub use act::{Act, ActRegistry, ActRequest};
pub use acts::GroupChatAct;
pub use arbiter::{LeaseDecision, RejectReason, TicketArbiter};
pub use collaborators::{
    BackendRequest, ChatMessage, GenerativeBackend, HistorySink, MessageRole, OccupancyRequest,
    ReleaseReason, SessionHandle, WorldActuator, WorldSampler,
};
pub use config::StageConfig;
pub use error::{Error, Result};
pub use generation::{RoundFailure, RoundGenerator, RoundOutput};
pub use playback::{Playback, PlaybackPlan, PlaybackReport, StopCause};
pub use session::SessionGuard;
pub use stage::{Stage, SubmitOutcome};
pub use trigger::{GatheringTrigger, Trigger, TriggerScanner};
pub use types::{
    ActReason, ActResult, ConversationKey, GeneratedTurn, ParticipantId, RunIntent, Ticket,
    TicketId, TicketSnapshot,
};
