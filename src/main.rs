//! # Stage - CLI entry point
//!
//! Wires the director crate to an offline improv backend and a simulated
//! world.
//!
//! ## Commands
//!
//! - `acts`: list registered Acts
//! - `run`: submit one intent and print its result
//! - `scan`: run trigger scan cycles and print every outcome
//!
//! ## Shutdown
//!
//! Ctrl-C cancels the shared token; running Acts unwind, release their
//! sessions and report `Aborted`.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod improv;
mod world;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use stage_director::{
    ActRegistry, GatheringTrigger, GroupChatAct, RunIntent, Stage, StageConfig, SubmitOutcome,
    TriggerScanner,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use improv::ImprovBackend;
use world::SimulatedWorld;

/// Latency of the offline backend.
const IMPROV_LATENCY: Duration = Duration::from_millis(300);

/// Trigger used by `scan`.
const SCAN_TRIGGER_NAME: &str = "gathering";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Acts => {
            let world = Arc::new(SimulatedWorld::with_population(0, "en"));
            let stage = build_stage(&config, world, TriggerScanner::new());
            for name in stage.act_names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Run {
            act,
            participants,
            rounds,
            scenario,
            locale,
            seed,
            pacing_ms,
            json,
        } => {
            let config = with_pacing(config, pacing_ms);
            let world = Arc::new(SimulatedWorld::with_population(0, locale.clone()).quiet(json));
            let stage = build_stage(&config, world, TriggerScanner::new());

            let mut intent = RunIntent::new(act, participants)
                .with_rounds(rounds)
                .with_locale(locale)
                .with_seed(seed);
            if let Some(scenario) = scenario {
                intent = intent.with_scenario(scenario);
            }

            let cancel = cancel_on_ctrl_c();
            let outcome = stage.submit(intent, cancel).await;
            print_outcome(&outcome, json)
        }
        Commands::Scan {
            cycles,
            population,
            chance,
            pacing_ms,
            json,
        } => {
            let config = with_pacing(config, pacing_ms);
            scan(&config, cycles, population, chance, json).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load configuration from a file, or from `STAGE_*` variables.
fn load_config(path: Option<&Path>) -> Result<StageConfig> {
    match path {
        Some(path) => StageConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let config = StageConfig::from_env();
            config
                .validate()
                .context("Invalid configuration in STAGE_* environment variables")?;
            Ok(config)
        }
    }
}

fn with_pacing(config: StageConfig, pacing_ms: Option<u64>) -> StageConfig {
    match pacing_ms {
        Some(ms) if ms > 0 => config.pacing(Duration::from_millis(ms)),
        _ => config,
    }
}

fn build_stage(config: &StageConfig, world: Arc<SimulatedWorld>, scanner: TriggerScanner) -> Stage {
    let act = GroupChatAct::new(
        config.clone(),
        Arc::new(ImprovBackend::new(IMPROV_LATENCY)),
        world.clone(),
        world,
    );
    Stage::new(config.clone(), ActRegistry::new().with(Arc::new(act)), scanner)
}

/// A token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running Acts");
            token.cancel();
        }
    });
    cancel
}

async fn scan(
    config: &StageConfig,
    cycles: u32,
    population: usize,
    chance: f64,
    json: bool,
) -> Result<()> {
    let world = Arc::new(SimulatedWorld::with_population(population, "en").quiet(json));
    let scanner = TriggerScanner::new().with(Arc::new(
        GatheringTrigger::new(SCAN_TRIGGER_NAME, GroupChatAct::NAME, chance).scenarios([
            "a rumour about the mill",
            "the coming harvest",
            "a stranger seen on the road",
        ]),
    ));
    let stage = build_stage(config, world.clone(), scanner);
    let cancel = cancel_on_ctrl_c();
    let mut rng = StdRng::from_entropy();
    let start = Instant::now();

    for cycle in 1..=cycles {
        if cancel.is_cancelled() {
            break;
        }
        let tick = world.advance_tick();
        let handles = stage.scan_once(world.as_ref(), &mut rng, &cancel);
        info!(cycle, tick, proposals = handles.len(), "Scan cycle");

        for handle in handles {
            let outcome = handle.await.context("Submission task failed")?;
            print_outcome(&outcome, json)?;
        }
    }

    info!(cycles, elapsed_ms = start.elapsed().as_millis(), "Scan finished");
    Ok(())
}

fn print_outcome(outcome: &SubmitOutcome, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "outcome": outcome.label(),
            "result": outcome.result(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match outcome.result() {
        Some(result) => println!(
            "{}: completed={} reason={} rounds={}",
            outcome.label(),
            result.completed,
            result.reason,
            result.rounds
        ),
        None => println!("{}", outcome.label()),
    }
    Ok(())
}
