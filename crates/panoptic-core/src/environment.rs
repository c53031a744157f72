//! Deployment environment

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Environment variable that overrides the configured environment
pub const ENV_VAR: &str = "PANOPTIC_ENV";

/// Where the process runs. Production disables debug bundles and pulls job
/// configuration from the remote source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Automated tests
    Test,
    /// Production deployment
    Production,
}

impl Environment {
    /// Read [`ENV_VAR`], falling back to `default` when unset or invalid
    #[must_use]
    pub fn from_env_or(default: Environment) -> Self {
        std::env::var(ENV_VAR)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Whether this is production
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(Error::invalid_config(
                "environment",
                format!("unknown environment '{}'", other),
            )),
        }
    }
}
