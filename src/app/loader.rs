//! Configuration loading
//!
//! Embedded defaults, then optional files, then `PANOPTIC_` environment
//! variables (`PANOPTIC_POOL__POOL_SIZE=8`).

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment as EnvSource, File, FileFormat};
use panoptic_core::Environment;

use super::config::AppConfig;

/// Embedded default configuration
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration. `extra` is an explicit file that overrides every
/// other file source.
pub fn load_config(extra: Option<&Path>) -> Result<AppConfig> {
    let profile = Environment::from_env_or(Environment::Development);
    let mut builder = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", profile)).required(false))
        .add_source(File::with_name("config/local").required(false));

    if let Some(path) = extra {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        // prefix_separator("_") so PANOPTIC_POOL__POOL_SIZE maps to pool.pool_size
        .add_source(
            EnvSource::with_prefix("PANOPTIC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut app: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    app.environment = Environment::from_env_or(app.environment);
    Ok(app)
}
