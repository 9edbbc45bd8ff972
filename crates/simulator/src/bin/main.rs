//! meshrpc Simulator CLI
//!
//! Run deterministic client simulations against a population of honest and
//! misbehaving nodes.
//!
//! # Example
//!
//! ```bash
//! # Run a deterministic simulation with a fixed seed
//! meshrpc-sim --seed 42 -c 4 -r 500 --lying 3 --offline 2
//!
//! # Run a scenario file, overriding the seed
//! meshrpc-sim --scenario flaky.toml --seed 7
//! ```

use anyhow::Context;
use clap::Parser;
use meshrpc_simulation::SimulationRunner;
use meshrpc_simulator::{print_summary, Scenario};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// meshrpc Simulator
///
/// Runs deterministic client simulations. Single-threaded, reproducible
/// when the same seed is used.
#[derive(Parser, Debug)]
#[command(name = "meshrpc-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML scenario file. Flags override its values.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Random seed for reproducible results. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Number of clients sharing the registry
    #[arg(short = 'c', long)]
    clients: Option<usize>,

    /// Calls per client
    #[arg(short = 'r', long)]
    rounds: Option<usize>,

    /// Honest nodes
    #[arg(long)]
    honest: Option<usize>,

    /// Nodes returning wrong results
    #[arg(long)]
    lying: Option<usize>,

    /// Unreachable nodes
    #[arg(long)]
    offline: Option<usize>,

    /// Nodes reporting node-list changes they cannot serve
    #[arg(long)]
    stale_reporters: Option<usize>,

    /// Probability that an answer is lost (0.0-1.0)
    #[arg(long)]
    packet_loss: Option<f64>,

    /// Exit with an error if any accepted result was wrong
    #[arg(long)]
    strict: bool,
}

impl Args {
    fn scenario(&self) -> anyhow::Result<Scenario> {
        let mut scenario = match &self.scenario {
            Some(path) => Scenario::load(path)?,
            None => Scenario::default(),
        };
        if let Some(seed) = self.seed {
            scenario.seed = Some(seed);
        }
        if let Some(clients) = self.clients {
            scenario.clients = clients;
        }
        if let Some(rounds) = self.rounds {
            scenario.rounds = rounds;
        }
        if let Some(honest) = self.honest {
            scenario.nodes.honest = honest;
        }
        if let Some(lying) = self.lying {
            scenario.nodes.lying = lying;
        }
        if let Some(offline) = self.offline {
            scenario.nodes.offline = offline;
        }
        if let Some(stale) = self.stale_reporters {
            scenario.nodes.stale_reporters = stale;
        }
        if let Some(loss) = self.packet_loss {
            scenario.network.packet_loss_rate = loss;
        }
        Ok(scenario)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let scenario = args.scenario()?;
    let seed = scenario.seed.unwrap_or_else(rand::random);
    let config = scenario.to_config(seed)?;

    info!(
        seed,
        clients = config.clients,
        rounds = config.rounds,
        nodes = config.nodes.total(),
        lying = config.nodes.lying,
        offline = config.nodes.offline,
        stale_reporters = config.nodes.stale_reporters,
        "Starting simulation"
    );

    let mut runner = SimulationRunner::new(config).context("failed to create simulation")?;
    let stats = runner.run().clone();
    print_summary(&stats);

    if args.strict && stats.wrong_answers > 0 {
        anyhow::bail!("{} wrong answers were accepted", stats.wrong_answers);
    }
    Ok(())
}
