//! retort CLI - closed-loop optimization of chemical procedures.
//!
//! This is the command-line entry point. One campaign walks the loop:
//!
//! 1. Propose: the search algorithm suggests parameter batches
//! 2. Execute: batches bind into the procedure and run on the bench
//! 3. Score: signals become scalar results for the objective
//! 4. Update: records append, snapshots land in the run directory
//!
//! ## Usage
//!
//! ```bash
//! # Fresh campaign from a TOML config
//! retort run campaign.toml --out runs/monday
//!
//! # Seed the algorithm with history from an earlier campaign
//! retort run campaign.toml --seed-history runs/friday/history.csv
//!
//! # Pick up a crashed or cancelled campaign where it stopped
//! retort resume campaign.toml --out runs/monday
//!
//! # Score one saved signal offline
//! retort score runs/monday/signals/signal_0003.json peak-area-6.72
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use retort::config::OptimizerConfig;
use retort::controller::{IterationController, RunSummary};
use retort::executor::SimulatedExecutor;
use retort::scoring::score_signal;
use retort::signal::peaks::RegionDetection;
use retort::signal::Signal;
use retort::state::OptimizationState;
use retort::types::{Objective, ObjectiveKind};

/// Closed-loop optimizer for chemical procedures
///
/// retort drives propose -> execute -> score -> update iterations against
/// a simulated bench, snapshotting every boundary so campaigns survive
/// crashes and cancellations.
#[derive(Parser, Debug)]
#[command(name = "retort")]
#[command(version)]
#[command(about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a fresh campaign
    Run {
        /// Campaign configuration (TOML)
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Run directory for snapshots, signals, and the history CSV
        #[arg(short, long, default_value = "run")]
        out: PathBuf,

        /// History CSV from an earlier campaign to seed the algorithm
        ///
        /// Columns must cover every searched parameter plus the objective
        /// column. Seeded records inform suggestions but do not count
        /// toward the iteration budget.
        #[arg(long, value_name = "CSV")]
        seed_history: Option<PathBuf>,
    },

    /// Continue a snapshotted campaign to completion
    Resume {
        /// The configuration the campaign was started with
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Run directory holding the snapshot
        #[arg(short, long, default_value = "run")]
        out: PathBuf,
    },

    /// Score one saved signal against an objective, then exit
    Score {
        /// Signal JSON as saved under a run directory
        #[arg(value_name = "SIGNAL")]
        signal: PathBuf,

        /// Objective spelling
        ///
        /// Examples: "peak-area-6.72", "neg-integration-area-4.0..5.5".
        /// A "neg-" prefix minimizes instead of maximizing.
        #[arg(value_name = "OBJECTIVE")]
        objective: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, out, seed_history } => {
            cmd_run(&config, &out, seed_history.as_deref())
        }
        Command::Resume { config, out } => cmd_resume(&config, &out),
        Command::Score { signal, objective } => cmd_score(&signal, &objective),
    }
}

fn cmd_run(config_path: &Path, out: &Path, seed_history: Option<&Path>) -> Result<()> {
    use owo_colors::OwoColorize;

    println!();
    println!("{}", " RETORT CLOSED-LOOP OPTIMIZER ".bold().on_blue());
    println!();

    let config = OptimizerConfig::load(config_path)?;
    println!(
        "  objective {} | {} iterations x {} batches | algorithm {}",
        config.objective, config.max_iterations, config.batch_size, config.algorithm.name
    );

    let seeded = match seed_history {
        Some(csv) => {
            let mut names: Vec<String> =
                config.parameters.iter().map(|p| p.name.clone()).collect();
            names.sort();
            let records = OptimizationState::seed_from_csv(
                csv,
                &names,
                &config.objective.column_name(),
            )?;
            println!("  seeded {} records from {}", records.len(), csv.display());
            records
        }
        None => Vec::new(),
    };

    let executor = SimulatedExecutor::new(config.simulation.seed, &config.parameters);
    let mut controller = IterationController::new(config, Box::new(executor), out)?;
    controller.seed_history(seeded);

    let summary = controller.run()?;
    print_summary(&summary, out);
    Ok(())
}

fn cmd_resume(config_path: &Path, out: &Path) -> Result<()> {
    use owo_colors::OwoColorize;

    println!();
    println!("{}", " RETORT RESUME ".bold().on_blue());
    println!();

    let config = OptimizerConfig::load(config_path)?;
    let executor = SimulatedExecutor::new(config.simulation.seed, &config.parameters);
    let mut controller = IterationController::resume(config, Box::new(executor), out)?;
    println!(
        "  picking up at iteration {} ({} records so far)",
        controller.state().iteration,
        controller.state().records.len()
    );

    let summary = controller.run()?;
    print_summary(&summary, out);
    Ok(())
}

fn cmd_score(signal_path: &Path, objective: &str) -> Result<()> {
    let objective: Objective = objective.parse()?;
    match &objective.kind {
        ObjectiveKind::Novelty => {
            bail!("novelty is scored against a whole campaign, not one signal")
        }
        ObjectiveKind::FinalParameter => {
            bail!("final-parameter comes from the executor, not a signal")
        }
        _ => {}
    }

    let json = std::fs::read_to_string(signal_path)
        .with_context(|| format!("reading signal from {}", signal_path.display()))?;
    let signal: Signal = serde_json::from_str(&json)
        .with_context(|| format!("parsing signal from {}", signal_path.display()))?;

    let score = score_signal(&signal, &objective, &RegionDetection::default())?;
    println!("{} -> {:.6}", objective, score);
    Ok(())
}

fn print_summary(summary: &RunSummary, out: &Path) {
    use owo_colors::OwoColorize;

    println!();
    println!("{}", " RESULT ".bold().on_green());
    println!("  iterations run: {}", summary.iterations_run);
    println!("  stopped: {}", summary.reason);
    match &summary.best {
        Some(best) => {
            println!(
                "  best: {} of iteration {} -> {:.4}",
                best.batch_id,
                best.iteration,
                best.result.unwrap_or(f64::NAN)
            );
            for (name, value) in &best.values {
                println!("    {} = {:.4}", name, value);
            }
        }
        None => println!("  best: no completed record"),
    }
    println!("  artifacts: {}", out.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["retort", "run", "campaign.toml", "--out", "runs/x"]);
        match cli.command {
            Command::Run { config, out, seed_history } => {
                assert_eq!(config, PathBuf::from("campaign.toml"));
                assert_eq!(out, PathBuf::from("runs/x"));
                assert!(seed_history.is_none());
            }
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["retort", "run", "campaign.toml"]);
        match cli.command {
            Command::Run { out, .. } => assert_eq!(out, PathBuf::from("run")),
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_seed_history() {
        let cli = Cli::parse_from([
            "retort",
            "run",
            "campaign.toml",
            "--seed-history",
            "old/history.csv",
        ]);
        match cli.command {
            Command::Run { seed_history, .. } => {
                assert_eq!(seed_history, Some(PathBuf::from("old/history.csv")));
            }
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_resume() {
        let cli = Cli::parse_from(["retort", "resume", "campaign.toml", "-o", "runs/x"]);
        match cli.command {
            Command::Resume { config, out } => {
                assert_eq!(config, PathBuf::from("campaign.toml"));
                assert_eq!(out, PathBuf::from("runs/x"));
            }
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_score() {
        let cli = Cli::parse_from([
            "retort",
            "score",
            "signals/signal_0001.json",
            "neg-peak-area-6.72",
        ]);
        match cli.command {
            Command::Score { signal, objective } => {
                assert_eq!(signal, PathBuf::from("signals/signal_0001.json"));
                assert_eq!(objective, "neg-peak-area-6.72");
            }
            other => panic!("parsed {:?}", other),
        }
    }
}
