// src/cli/mod.rs — CLI definition (clap derive)

pub mod inspect;
pub mod migrate;
pub mod plan;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::infra::config::Config;
use crate::memory::{MemoryManager, SharedStore};

#[derive(Parser)]
#[command(
    name = "plancraft",
    about = "Self-improving planner over registered capabilities",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan a request against a capability catalog without executing it
    Plan {
        /// The request, in plain language
        #[arg(required = true, trailing_var_arg = true)]
        request: Vec<String>,
        /// YAML file listing the available capabilities
        #[arg(long)]
        catalog: PathBuf,
        /// Always ask the reasoning service instead of adapting a stored pattern
        #[arg(long)]
        no_reuse: bool,
        /// Extra context passed to the reasoning service
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show a stored plan
    Inspect {
        plan_id: String,
    },
    /// Show per-capability performance
    Perf {
        /// Only this capability
        capability: Option<String>,
    },
    /// List learned patterns
    Patterns {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Evict patterns not used recently
    Decay {
        /// Retention window in days (defaults to learning.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Database migrations
    Migrate {
        #[arg(long)]
        status: bool,
        /// Roll back to this schema version
        #[arg(long)]
        rollback: Option<u32>,
    },
}

/// Open the configured database, creating it if needed.
pub(crate) fn open_store(config: &Config) -> anyhow::Result<SharedStore> {
    let db_path = config.memory.resolved_db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(MemoryManager::open(&db_path)?.into_shared())
}
