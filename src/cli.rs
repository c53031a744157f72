//! Command line interface
//!
//! - `run`: start the engine (default)
//! - `validate`: check the job configuration and list the resulting jobs
//! - `config`: print the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::app;

/// Panoptic crawl-job orchestrator
#[derive(Parser, Debug)]
#[command(name = "panoptic")]
#[command(about = "Schedules crawl jobs and runs them on an elastic function pool")]
#[command(version)]
pub struct Cli {
    /// Extra configuration file, applied after config/*.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the scheduler, orchestrator and reporter (default)
    Run,
    /// Load and validate the job configuration
    Validate,
    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    let config = app::load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => app::run(config).await,
        Commands::Validate => {
            let jobs = app::validate(&config).await?;
            println!("{} job(s) valid", jobs.len());
            for job in jobs {
                let spec = job.spec();
                let interval = job.calculate_interval()?;
                println!(
                    "  {:<32} collector={} every={:?} sub_sources={}{}",
                    job.name(),
                    spec.collector,
                    interval,
                    spec.task_params.sub_sources.len(),
                    if spec.dry_run { " (dry run)" } else { "" }
                );
            }
            Ok(())
        }
        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            println!("{}", rendered);
            Ok(())
        }
    }
}
