use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use gridsim_cli::ScenarioBuilder;

#[derive(Parser)]
#[command(
    name = "gridsim",
    about = "gridsim — discrete-event simulator for cloud-native service topologies",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation scenario.
    Run {
        /// Scenario TOML file(s).
        #[arg(short, long)]
        file: Vec<PathBuf>,
        /// Folder(s) of scenario TOML files, scanned recursively.
        #[arg(long)]
        folder: Vec<PathBuf>,
        /// Virtual seconds to simulate.
        #[arg(short, long)]
        duration: f64,
        /// RNG seed; identical seeds replay identical runs.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gridsim=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            folder,
            duration,
            seed,
        } => run(&file, &folder, duration, seed),
    }
}

fn run(files: &[PathBuf], folders: &[PathBuf], duration: f64, seed: u64) -> anyhow::Result<()> {
    if files.is_empty() && folders.is_empty() {
        anyhow::bail!("no scenario input: pass --file and/or --folder");
    }

    let mut builder = ScenarioBuilder::new();
    for path in files {
        builder.add_file(path)?;
    }
    for path in folders {
        builder.add_folder(path)?;
    }

    let ctx = builder.build(seed)?;
    info!(duration, seed, "simulation started");
    ctx.simulate(Duration::from_secs_f64(duration.max(0.0)))?;
    ctx.close();
    info!(at = %ctx.now(), "simulation ended");
    Ok(())
}
