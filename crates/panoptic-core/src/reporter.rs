//! Reporter module - turns executed bundles into task metrics

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Module;
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, TOPIC_EXECUTED_JOB};
use crate::metrics::{
    tag, MetricsSink, TASK_COLLECTED_COUNT, TASK_DURATION_MS, TASK_FAILED_COUNT,
    TASK_STATE_COUNTER,
};
use crate::protocol::{Task, TaskBundle};

/// Tag value used when a task did not report its address
const UNKNOWN_IP: &str = "unknown";

/// Reporter configuration
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Module name
    pub name: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            name: "reporter".to_string(),
        }
    }
}

/// Emits one set of metrics per executed task
pub struct Reporter {
    config: ReporterConfig,
    bus: EventBus,
    sink: Arc<dyn MetricsSink>,
}

impl Reporter {
    /// Create a reporter
    pub fn new(config: ReporterConfig, bus: EventBus, sink: Arc<dyn MetricsSink>) -> Self {
        Self { config, bus, sink }
    }

    /// Emit metrics for every task in `bundle`. Returns the number of sends
    /// that failed; failures are logged and do not stop the remaining sends.
    pub fn report(&self, bundle: &TaskBundle) -> usize {
        bundle
            .tasks
            .iter()
            .map(|task| self.report_task(task))
            .sum()
    }

    fn report_task(&self, task: &Task) -> usize {
        let meta = &task.metadata;
        let tags = vec![
            tag("config", &meta.config_name),
            tag("collector", &task.collector),
            tag("ip", meta.ip_addr.as_deref().unwrap_or(UNKNOWN_IP)),
            tag("state", meta.result_state.as_str()),
        ];

        let mut results = vec![
            self.sink.incr_counter(TASK_STATE_COUNTER, &tags),
            self.sink
                .count(TASK_COLLECTED_COUNT, meta.total_collected as i64, &tags),
            self.sink
                .count(TASK_FAILED_COUNT, meta.total_failed as i64, &tags),
        ];
        if let Some(duration) = meta.duration() {
            results.push(self.sink.distribution(
                TASK_DURATION_MS,
                duration.num_milliseconds() as f64,
                &tags,
            ));
        }

        let mut failed = 0;
        for result in results {
            if let Err(e) = result {
                warn!(task_id = %task.task_id, error = %e, "Failed to send metric");
                failed += 1;
            }
        }
        debug!(
            task_id = %task.task_id,
            config = %meta.config_name,
            state = meta.result_state.as_str(),
            "Reported task"
        );
        failed
    }
}

#[async_trait::async_trait]
impl Module for Reporter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(&self, token: CancellationToken) -> Result<()> {
        let mut subscription = self.bus.subscribe(token, TOPIC_EXECUTED_JOB)?;
        info!(topic = TOPIC_EXECUTED_JOB, "Reporter listening");

        while let Some(message) = subscription.recv().await {
            message.ack();
            match TaskBundle::decode(message.payload()) {
                Ok(bundle) => {
                    self.report(&bundle);
                }
                Err(e) => warn!(error = %e, "Dropping undecodable executed job"),
            }
        }

        if subscription.is_cancelled() {
            info!("Reporter stopped");
            Ok(())
        } else {
            Err(Error::SubscriptionClosed(subscription.topic().to_string()))
        }
    }
}

#[cfg(test)]
mod tests;
