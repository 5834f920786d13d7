//! carbonetesd — the Carbonetes daemon.
//!
//! Single binary that assembles every Carbonetes subsystem:
//! - State store (redb)
//! - Telemetry (node-exporter scraping, carbon table)
//! - Placement engine + worker
//! - Policy learner
//! - Admission controller
//! - REST API
//!
//! # Usage
//!
//! ```text
//! carbonetesd --config carbonetes.toml serve --port 18080
//! carbonetesd --config carbonetes.toml learn
//! ```

mod bootstrap;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use carbonetes_core::epoch_secs;

#[derive(Parser)]
#[command(name = "carbonetesd", about = "Carbon-aware job scheduler daemon")]
struct Cli {
    /// Path to carbonetes.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the state database.
    #[arg(long, global = true, default_value = "carbonetes.redb")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run placement, learning, admission and the API in one process.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "18080")]
        port: u16,
    },
    /// Run a single learning pass against the stored history and exit.
    Learn,
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,carbonetesd=debug,carbonetes=debug"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = bootstrap::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port } => serve::run(config, &cli.db, port).await,
        Command::Learn => run_learn(config, &cli.db).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run_learn(config: carbonetes_core::CarbonetesConfig, db: &std::path::Path) -> anyhow::Result<()> {
    let store = bootstrap::open_store(db)?;
    bootstrap::seed(&store, &config, epoch_secs())?;
    let learner = bootstrap::learner(store, &config);

    let outcome = tokio::task::spawn_blocking(move || learner.learn()).await??;
    info!(
        candidates = outcome.candidates,
        history = outcome.history_used,
        skipped = outcome.history_skipped,
        "learning pass committed"
    );

    let summary = serde_json::json!({
        "weights": outcome.weights,
        "previous": outcome.previous,
        "previous_fitness": outcome.previous_fitness,
        "metrics": outcome.metrics,
        "hill_climb_sweeps": outcome.hill_climb_sweeps,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
