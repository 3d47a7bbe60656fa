//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Stage - scripted multi-party Acts
#[derive(Parser, Debug)]
#[command(name = "stage")]
#[command(version)]
#[command(about = "Run scripted multi-party Acts with leased tickets and paced playback")]
#[command(
    long_about = "Stage arbitrates Act executions per participant set, generates dialogue round by round and plays it back at a fixed pace. This binary runs against an offline improv backend and a simulated world."
)]
pub struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered Acts
    Acts,

    /// Run one Act
    Run {
        /// Act name
        #[arg(short, long, default_value = "GroupChat")]
        act: String,

        /// Participant ids, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        participants: Vec<String>,

        /// Requested rounds
        #[arg(short, long, default_value_t = 1)]
        rounds: u32,

        /// Scenario hint
        #[arg(short, long)]
        scenario: Option<String>,

        /// Dialogue locale
        #[arg(short, long, default_value = "en")]
        locale: String,

        /// Idempotency seed
        #[arg(long, default_value = "cli")]
        seed: String,

        /// Override the pacing interval in milliseconds
        #[arg(long)]
        pacing_ms: Option<u64>,

        /// Print the result as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run trigger scan cycles over a simulated population
    Scan {
        /// Number of scan cycles
        #[arg(long, default_value_t = 3)]
        cycles: u32,

        /// Size of the simulated population
        #[arg(long, default_value_t = 6)]
        population: usize,

        /// Chance that the gathering trigger fires per cycle, in [0, 1]
        #[arg(long, default_value_t = 0.5, value_parser = parse_chance)]
        chance: f64,

        /// Override the pacing interval in milliseconds
        #[arg(long)]
        pacing_ms: Option<u64>,

        /// Print outcomes as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn parse_chance(value: &str) -> Result<f64, String> {
    let chance: f64 = value
        .parse()
        .map_err(|e| format!("`{value}` is not a number: {e}"))?;
    if (0.0..=1.0).contains(&chance) {
        Ok(chance)
    } else {
        Err(format!("`{value}` is not in [0, 1]"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_splits_participants() {
        let cli = Cli::try_parse_from([
            "stage",
            "run",
            "--participants",
            "pawn:1,pawn:2,pawn:3",
            "--rounds",
            "2",
        ]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Commands::Run { ref participants, rounds: 2, .. }) if participants.len() == 3
        ));
    }

    #[test]
    fn test_run_requires_participants() {
        assert!(Cli::try_parse_from(["stage", "run"]).is_err());
    }

    #[test]
    fn test_chance_must_be_a_probability() {
        for bad in ["nan", "inf", "-0.1", "1.5", "often"] {
            assert!(
                Cli::try_parse_from(["stage", "scan", "--chance", bad]).is_err(),
                "accepted --chance {bad}"
            );
        }
        let cli = Cli::try_parse_from(["stage", "scan", "--chance", "0.25"]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Commands::Scan { chance, .. }) if (chance - 0.25).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["stage", "scan", "--config", "stage.toml", "--cycles", "5"]);
        assert!(cli.is_ok_and(|c| c.config == Some(PathBuf::from("stage.toml"))));
    }
}
