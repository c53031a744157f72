//! Orchestrator module
//!
//! Consumes pending bundles, runs each one on the [`Executor`] in its own
//! task and republishes the result on the executed topic. Messages are acked
//! on receipt: a bundle that fails to execute is logged and dropped, never
//! redelivered.
//!
//! The executor is shared, not owned. Whoever built it shuts it down once the
//! engine has stopped, outside the engine's shutdown timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::engine::Module;
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, TOPIC_EXECUTED_JOB, TOPIC_PENDING_JOB};
use crate::executor::Executor;
use crate::protocol::TaskBundle;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Module name
    pub name: String,
    /// Upper bound for one execution; `None` waits as long as the executor
    pub execution_timeout: Option<Duration>,
    /// Log debug bundles instead of executing them
    pub skip_debug_bundles: bool,
    /// How long shutdown waits for in-flight executions before cancelling them
    pub drain_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: "orchestrator".to_string(),
            execution_timeout: None,
            skip_debug_bundles: false,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Set module name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set execution timeout
    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Skip debug bundles
    pub fn with_skip_debug_bundles(mut self, skip: bool) -> Self {
        self.skip_debug_bundles = skip;
        self
    }

    /// Set drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Bridges the pending and executed topics through an [`Executor`]
pub struct Orchestrator {
    config: OrchestratorConfig,
    bus: EventBus,
    executor: Arc<dyn Executor>,
    tracker: TaskTracker,
    // Executions outlive a module restart; only shutdown cancels them
    executions: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(config: OrchestratorConfig, bus: EventBus, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            bus,
            executor,
            tracker: TaskTracker::new(),
            executions: CancellationToken::new(),
        }
    }

    /// Number of executions still running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    fn handle(&self, payload: &[u8]) {
        let bundle = match TaskBundle::decode(payload) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable pending job");
                return;
            }
        };

        if bundle.debug && self.config.skip_debug_bundles {
            info!(job_id = %bundle.job_id, "Skipping debug job");
            return;
        }

        let executor = self.executor.clone();
        let bus = self.bus.clone();
        let token = self.executions.child_token();
        let timeout = self.config.execution_timeout;
        self.tracker.spawn(async move {
            let job_id = bundle.job_id.clone();
            match execute(executor.as_ref(), token, bundle, timeout).await {
                Ok(done) => publish_executed(&bus, &done),
                Err(Error::Cancelled) => debug!(job_id = %job_id, "Execution cancelled"),
                Err(e) => error!(job_id = %job_id, error = %e, "Execution failed"),
            }
        });
    }
}

async fn execute(
    executor: &dyn Executor,
    token: CancellationToken,
    bundle: TaskBundle,
    timeout: Option<Duration>,
) -> Result<TaskBundle> {
    match timeout {
        Some(limit) => {
            let guard = token.clone();
            match tokio::time::timeout(limit, executor.execute(token, bundle)).await {
                Ok(result) => result,
                Err(_) => {
                    guard.cancel();
                    Err(Error::Timeout(limit))
                }
            }
        }
        None => executor.execute(token, bundle).await,
    }
}

fn publish_executed(bus: &EventBus, bundle: &TaskBundle) {
    let payload = match bundle.encode() {
        Ok(payload) => payload,
        Err(e) => {
            error!(job_id = %bundle.job_id, error = %e, "Failed to encode executed job");
            return;
        }
    };
    match bus.publish(TOPIC_EXECUTED_JOB, payload) {
        Ok(delivered) => debug!(job_id = %bundle.job_id, delivered, "Published executed job"),
        Err(e) => warn!(job_id = %bundle.job_id, error = %e, "Failed to publish executed job"),
    }
}

#[async_trait::async_trait]
impl Module for Orchestrator {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(&self, token: CancellationToken) -> Result<()> {
        let mut subscription = self.bus.subscribe(token.clone(), TOPIC_PENDING_JOB)?;
        info!(topic = TOPIC_PENDING_JOB, "Orchestrator listening");

        while let Some(message) = subscription.recv().await {
            message.ack();
            self.handle(message.payload());
        }

        if subscription.is_cancelled() {
            info!("Orchestrator stopped");
            Ok(())
        } else {
            Err(Error::SubscriptionClosed(subscription.topic().to_string()))
        }
    }

    async fn shutdown(&self) {
        self.tracker.close();
        if tokio::time::timeout(self.config.drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.tracker.len(),
                "Drain timeout reached, cancelling executions"
            );
            self.executions.cancel();
            self.tracker.wait().await;
        }
        info!(module = %self.config.name, "Orchestrator shut down");
    }
}
