//! Panoptic - crawl-job orchestration engine
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panoptic=info,panoptic_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run(cli::Cli::parse()).await
}
