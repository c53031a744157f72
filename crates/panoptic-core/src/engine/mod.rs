//! Engine - module runtime
//!
//! The engine owns the event bus and a set of [`Module`]s. `run` starts every
//! module under [`run_with_graceful_restart`] and waits for all of them;
//! `shutdown` cancels the run tokens, lets each module release its
//! resources, then closes the bus.
//!
//! ```ignore
//! let engine = Arc::new(
//!     Engine::new(bus.clone(), EngineConfig::default())
//!         .with_module(scheduler)
//!         .with_module(orchestrator),
//! );
//! let runner = tokio::spawn({
//!     let engine = engine.clone();
//!     async move { engine.run().await }
//! });
//! wait_for_shutdown_signal().await;
//! engine.shutdown().await;
//! ```

/// Module trait
pub mod module;
/// Shutdown phases and signal handling
pub mod shutdown;
/// Restart supervision
pub mod supervisor;

pub use module::Module;
pub use shutdown::{wait_for_shutdown_signal, ShutdownPhase};
pub use supervisor::{run_with_graceful_restart, RestartPolicy};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::event_bus::EventBus;

/// Default time allowed for module shutdown hooks
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 45;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay policy for restarting failed modules
    pub restart_policy: RestartPolicy,
    /// Upper bound on all module shutdown hooks together
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            restart_policy: RestartPolicy::default(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    /// Set the restart policy
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Set the shutdown timeout
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Runs modules and coordinates their shutdown
pub struct Engine {
    bus: EventBus,
    modules: Vec<Arc<dyn Module>>,
    config: EngineConfig,
    token: CancellationToken,
    phase: watch::Sender<ShutdownPhase>,
}

impl Engine {
    /// Create an engine with no modules
    #[must_use]
    pub fn new(bus: EventBus, config: EngineConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            bus,
            modules: Vec::new(),
            config,
            token: CancellationToken::new(),
            phase,
        }
    }

    /// Register a module. Modules start in registration order.
    #[must_use]
    pub fn with_module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Shared event bus
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Child of the engine's root token, cancelled on shutdown
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Observe phase changes
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// Run every module and wait until all have stopped.
    ///
    /// If a module gives up with an error (a configuration error), the
    /// remaining modules are cancelled and the first such error is returned.
    pub async fn run(&self) -> Result<()> {
        let mut tasks = JoinSet::new();
        for module in &self.modules {
            let module = module.clone();
            let token = self.token.child_token();
            let policy = self.config.restart_policy;
            tasks.spawn(async move {
                let name = module.name().to_string();
                (name, run_with_graceful_restart(module, token, policy).await)
            });
        }
        info!(modules = self.modules.len(), "Engine started");

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    debug!(module = %name, "Module exited");
                    None
                }
                Ok((name, Err(e))) => {
                    error!(module = %name, error = %e, "Module gave up");
                    Some(e)
                }
                Err(e) => {
                    error!(error = %e, "Module task panicked");
                    Some(Error::Execution(format!("module task panicked: {}", e)))
                }
            };
            if let Some(e) = failure {
                if first_error.is_none() {
                    self.token.cancel();
                    first_error = Some(e);
                }
            }
        }

        info!("Engine stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cancel all modules, run their shutdown hooks concurrently within the
    /// shutdown timeout, then close the event bus. Only the first call has
    /// any effect.
    pub async fn shutdown(&self) {
        let started = self.phase.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Stopping;
                true
            } else {
                false
            }
        });
        if !started {
            debug!("Shutdown already initiated");
            return;
        }
        info!(phase = %ShutdownPhase::Stopping, "Initiating graceful shutdown");
        self.token.cancel();

        self.set_phase(ShutdownPhase::Draining);
        let hooks = self.modules.iter().map(|module| {
            let module = module.clone();
            async move {
                module.shutdown().await;
                debug!(module = %module.name(), "Module shut down");
            }
        });
        if tokio::time::timeout(self.config.shutdown_timeout, futures::future::join_all(hooks))
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown timeout exceeded, closing anyway"
            );
        }

        self.bus.close();
        self.set_phase(ShutdownPhase::Terminated);
        info!("Graceful shutdown complete");
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!(phase = %phase, "Shutdown phase changed");
    }
}

#[cfg(test)]
mod tests;
