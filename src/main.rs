use clap::Parser;
use locomotion_core::config::ControllerConfig;
use locomotion_core::logging::init_logging;
use locomotion_core::port::{IdentityPredictor, ProtocolLayout};
use locomotion_core::scenario::Scenario;
use locomotion_core::{Backends, CharacterStatus, RunOptions, run_scenario};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless learned-locomotion character driver")]
struct Cli {
    /// Controller configuration (JSON)
    #[arg(long, default_value = "controller.json")]
    config: PathBuf,
    /// Scenario with the scene, interactions and scripted inputs (JSON)
    #[arg(long)]
    scenario: Option<PathBuf>,
    /// Number of ticks to simulate; overrides the scenario
    #[arg(long)]
    ticks: Option<u64>,
    /// Telemetry output path; overrides the configuration
    #[arg(long)]
    telemetry: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ControllerConfig::load(&cli.config)?;
    init_logging(&config.logging)?;
    let scenario = match &cli.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::default(),
    };
    let options = RunOptions {
        ticks: cli.ticks,
        telemetry: cli.telemetry.clone(),
    };
    let outcome = run_scenario(config, &scenario, &options, |config, _seeds| {
        let output = ProtocolLayout::from_config(config).output_dim();
        Ok(Backends::new(Box::new(IdentityPredictor::new(Some(output)))))
    })?;
    let root = outcome.final_root.position;
    println!(
        "Ticks: {} | root: ({:.3}, {:.3}, {:.3}) | mode: {:?} | mode changes: {}",
        outcome.ticks, root.x, root.y, root.z, outcome.final_mode, outcome.mode_changes
    );
    info!(
        target: "locomotion_sim::cli",
        ticks = outcome.ticks,
        rows = outcome.telemetry.as_ref().map(|stats| stats.rows_written),
        "run completed"
    );
    if let CharacterStatus::Frozen { tick, phase, reason } = &outcome.status {
        anyhow::bail!("character froze on tick {tick} during {phase}: {reason}");
    }
    Ok(())
}
