//! orbsim CLI: run or validate a scenario.
//!
//! Exit codes: 0 success, 2 configuration error, 3 dependency-resolution
//! failure, 4 runtime fatal.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orbsim_runner::{sink_from_setup, Manager};
use orbsim_scenario::{build_simulation, ConfigError, Registry, ScenarioDoc};

/// orbsim - epoch-stepped satellite/ground network simulator
#[derive(Parser, Debug)]
#[command(name = "orbsim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulation from a scenario JSON file
    Run(RunConfig),
    /// Orchestrate a scenario without running it, to check its validity
    Validate {
        /// Path to the scenario JSON file
        scenario: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct RunConfig {
    /// Path to the scenario JSON file
    scenario: PathBuf,

    /// Worker threads for parallel same-epoch advance (1 = sequential)
    #[arg(long, default_value = "1")]
    workers: usize,

    /// Override the scenario's RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Write the event log here, overriding the scenario's simlogsetup
    #[arg(long)]
    logfile: Option<PathBuf>,
}

fn load_scenario(path: &PathBuf) -> Result<ScenarioDoc, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ScenarioIo {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(ScenarioDoc::from_json(&text)?)
}

fn run(config: RunConfig) -> Result<(), i32> {
    let mut doc = match load_scenario(&config.scenario) {
        Ok(doc) => doc,
        Err(err) => {
            eprintln!("error: {err}");
            return Err(2);
        }
    };
    if let Some(seed) = config.seed {
        doc.seed = seed;
    }
    if let Some(path) = &config.logfile {
        doc.simlogsetup.loghandler = "file".to_string();
        doc.simlogsetup.extra.insert(
            "logfile".to_string(),
            serde_json::Value::String(path.display().to_string()),
        );
    }

    let sink = match sink_from_setup(&doc.simlogsetup) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("error: {err}");
            return Err(2);
        }
    };

    let registry = Registry::builtin();
    let built = match build_simulation(&doc, &registry, sink, config.workers) {
        Ok(built) => built,
        Err(err) => {
            eprintln!("error: {err}");
            return Err(err.exit_code());
        }
    };

    let mut manager = Manager::new(built);
    match manager.run() {
        Ok(stats) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).unwrap_or_default()
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("error: {err}");
            Err(err.exit_code())
        }
    }
}

fn validate(scenario: &PathBuf) -> Result<(), i32> {
    let doc = match load_scenario(scenario) {
        Ok(doc) => doc,
        Err(err) => {
            eprintln!("error: {err}");
            return Err(2);
        }
    };
    let registry = Registry::builtin();
    let sink = std::sync::Arc::new(orbsim_common::NullSink);
    match build_simulation(&doc, &registry, sink, 1) {
        Ok(built) => {
            println!(
                "ok: {} topologies, {} epochs",
                built.topologies.len(),
                built.clock.epoch_count()
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("error: {err}");
            Err(err.exit_code())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(config) => run(config),
        Commands::Validate { scenario } => validate(&scenario),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code as u8),
    }
}
