// src/main.rs — plancraft entry point

use clap::Parser;
use std::path::Path;

use plancraft::cli::{self, Cli, Commands};
use plancraft::infra::config::Config;
use plancraft::infra::logger;

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG / PLANCRAFT_LOG)
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = match cli.config {
        Some(ref path) => Config::load_from(Path::new(path))?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Plan {
            request,
            catalog,
            no_reuse,
            notes,
        } => cli::plan::run_plan(&config, &request.join(" "), &catalog, !no_reuse, notes).await,
        Commands::Inspect { plan_id } => cli::inspect::run_inspect(&config, &plan_id),
        Commands::Perf { capability } => cli::inspect::run_perf(&config, capability.as_deref()),
        Commands::Patterns { limit } => cli::inspect::run_patterns(&config, limit),
        Commands::Decay { days } => cli::inspect::run_decay(&config, days),
        Commands::Migrate { status, rollback } => {
            cli::migrate::run_migrate(&config, status, rollback)
        }
    }
}
