//! JobDoer - turns a due job into dispatched work

use tracing::info;

use super::job::SchedulerJob;
use crate::environment::Environment;
use crate::error::Result;
use crate::event_bus::{EventBus, TOPIC_PENDING_JOB};
use crate::protocol::TaskBundle;

/// Called by the scheduler each time a job is due
#[async_trait::async_trait]
pub trait JobDoer: Send + Sync {
    /// Dispatch one run of `job`
    async fn do_job(&self, job: &SchedulerJob) -> Result<()>;
}

/// Publishes a [`TaskBundle`] for every run on the pending topic
#[derive(Debug, Clone)]
pub struct PublishingJobDoer {
    bus: EventBus,
    environment: Environment,
}

impl PublishingJobDoer {
    /// Create a doer publishing on `bus`
    #[must_use]
    pub fn new(bus: EventBus, environment: Environment) -> Self {
        Self { bus, environment }
    }
}

#[async_trait::async_trait]
impl JobDoer for PublishingJobDoer {
    async fn do_job(&self, job: &SchedulerJob) -> Result<()> {
        let spec = job.spec();
        let is_debug = !self.environment.is_production() || spec.dry_run;
        let bundle = TaskBundle::from_spec(&spec, is_debug);
        let delivered = self.bus.publish(TOPIC_PENDING_JOB, bundle.encode()?)?;
        info!(
            job = %spec.name,
            job_id = %bundle.job_id,
            debug = bundle.debug,
            delivered,
            "Published pending job"
        );
        Ok(())
    }
}

/// Logs each run without publishing anything
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingJobDoer;

#[async_trait::async_trait]
impl JobDoer for LoggingJobDoer {
    async fn do_job(&self, job: &SchedulerJob) -> Result<()> {
        let spec = job.spec();
        info!(
            job = %spec.name,
            collector = %spec.collector,
            sub_sources = spec.task_params.sub_sources.len(),
            run_count = job.run_count(),
            "Job due (not published)"
        );
        Ok(())
    }
}
