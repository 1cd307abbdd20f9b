//! CLI entry point for handset power characterization
//!
//! # Usage
//!
//! List the available scenarios:
//! ```bash
//! handset_power list
//! ```
//!
//! Check a configuration file:
//! ```bash
//! handset_power --config bench.toml validate
//! ```
//!
//! Run a scenario against the simulated handset:
//! ```bash
//! handset_power run screen_on_off --mock
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use handset_power::config::{BenchConfig, DEFAULT_CONFIG_PATH};
use handset_power::{bench, export, logging};
use power_scenario::{LogLevel, RunEvent, ScenarioEngine, StepLibrary};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "handset_power")]
#[command(about = "Scenario-driven handset power characterization", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered scenarios
    List,

    /// Load and validate the configuration
    Validate,

    /// Run a scenario and export its results
    Run {
        /// Scenario name
        scenario: String,

        /// Use the simulated handset instead of adb
        #[arg(long)]
        mock: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BenchConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::List => list(&config),
        Commands::Validate => validate(&config),
        Commands::Run { scenario, mock } => run(config, &scenario, mock).await,
    }
}

fn list(config: &BenchConfig) -> Result<()> {
    let registry = config.registry(&StepLibrary::standard())?;
    for scenario in registry.iter() {
        println!(
            "{:<16} {:>3} steps  ~{:>4}s  {}",
            scenario.name,
            scenario.steps.len(),
            scenario.nominal_duration().as_secs(),
            scenario.description
        );
    }
    Ok(())
}

fn validate(config: &BenchConfig) -> Result<()> {
    config.validate()?;
    println!(
        "configuration ok: {} channels ({} enabled), {} extra scenarios",
        config.channels.len(),
        config.enabled_channels().len(),
        config.scenarios.len()
    );
    Ok(())
}

async fn run(config: BenchConfig, name: &str, mock: bool) -> Result<()> {
    config.validate()?;
    let library = Arc::new(StepLibrary::standard());
    let scenario = config.registry(&library)?.get(name)?;

    let engine = Arc::new(ScenarioEngine::new(
        bench::hardware(&config, mock)?,
        config.run_config(),
        library,
    ));
    let mut events = engine.subscribe();
    engine.start(scenario)?;

    let stopper = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("stop requested; finishing the current chunk");
            stopper.stop();
        }
    });

    loop {
        match events.recv().await {
            Ok(RunEvent::Progress {
                step_index,
                total_steps,
                step_name,
            }) => println!("[{}/{total_steps}] {step_name}", step_index + 1),
            Ok(RunEvent::Log(entry)) if entry.level >= LogLevel::Warn => {
                println!("  {}: {}", entry.level, entry.message)
            }
            Ok(RunEvent::ExportReady(report)) => {
                for path in export::export_report(&report, &config.export)? {
                    println!("  wrote {}", path.display());
                }
            }
            Ok(RunEvent::Finished(_)) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event stream lagged"),
        }
    }

    let Some(report) = engine.wait().await else {
        bail!("scenario ended without a report");
    };
    if let Some(failure) = &report.failure {
        // keep whatever was collected
        for path in export::export_report(&report, &config.export)? {
            println!("wrote {}", path.display());
        }
        bail!("scenario '{}' did not complete: {failure}", report.scenario);
    }
    println!(
        "scenario '{}' completed: {} rows",
        report.scenario,
        report.rows.len()
    );
    Ok(())
}
