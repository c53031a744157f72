use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::module::Module;
use crate::error::Result;

/// Delay applied before restarting a failed module
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Same delay after every failure
    Fixed {
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// Exponential backoff capped at `max_ms`
    Backoff {
        /// Delay after the first failure
        initial_ms: u64,
        /// Upper bound
        max_ms: u64,
        /// Growth factor per consecutive failure
        multiplier: f64,
    },
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::Fixed { delay_ms: 3000 }
    }
}

impl RestartPolicy {
    /// Delay before restart number `failures` (1-based)
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Backoff {
                initial_ms,
                max_ms,
                multiplier,
            } => {
                let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
                let delay = initial_ms as f64 * multiplier.max(1.0).powi(exponent);
                Duration::from_millis(delay.min(max_ms as f64) as u64)
            }
        }
    }
}

/// Run `module` until it returns `Ok` or `token` is cancelled, restarting it
/// after every failure.
///
/// Configuration errors are not retried: the same input would fail again, so
/// the error is returned to the caller.
pub async fn run_with_graceful_restart(
    module: Arc<dyn Module>,
    token: CancellationToken,
    policy: RestartPolicy,
) -> Result<()> {
    let name = module.name().to_string();
    let mut failures = 0u32;

    loop {
        if token.is_cancelled() {
            info!(module = %name, "Module cancelled before start");
            return Ok(());
        }

        info!(module = %name, "Starting module");
        match module.run(token.clone()).await {
            Ok(()) => {
                info!(module = %name, "Module stopped");
                return Ok(());
            }
            Err(e) if token.is_cancelled() => {
                warn!(module = %name, error = %e, "Module failed during shutdown");
                return Ok(());
            }
            Err(e) if e.is_config_error() => {
                error!(module = %name, error = %e, "Module failed on configuration, not restarting");
                return Err(e);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = policy.delay_for(failures);
                error!(
                    module = %name,
                    error = %e,
                    failures,
                    restart_in_ms = delay.as_millis() as u64,
                    "Module failed, restarting"
                );
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(module = %name, "Restart abandoned, shutting down");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
