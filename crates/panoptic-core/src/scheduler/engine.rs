//! Scheduler module
//!
//! Keeps the live job set in sync with configuration and fires due jobs:
//! - periodic reload with a digest check, so unchanged config is a no-op
//! - upsert that keeps the cadence of jobs surviving a reload
//! - one schedule loop per job, restarted on every reschedule

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::doer::JobDoer;
use super::job::SchedulerJob;
use super::merge::{merge_dynamic_targets, TargetStore};
use super::source::ConfigSource;
use crate::engine::Module;
use crate::error::{Error, Result};
use crate::protocol::JobConfigs;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Module name
    pub name: String,
    /// Time between configuration reloads
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "scheduler".to_string(),
            poll_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set module name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set reload interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Check a freshly built job set before it replaces the live one
pub fn validate_jobs(jobs: &[SchedulerJob]) -> Result<()> {
    let mut seen = HashSet::new();
    for job in jobs {
        if !seen.insert(job.name()) {
            return Err(Error::DuplicateJobName(job.name().to_string()));
        }
        if job.calculate_interval()?.is_zero() {
            return Err(Error::invalid_config(
                format!("jobs[{}].schedule", job.name()),
                "interval must be greater than zero",
            ));
        }
    }
    Ok(())
}

/// Recurring job scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    source: Arc<dyn ConfigSource>,
    store: Option<Arc<dyn TargetStore>>,
    doer: Arc<dyn JobDoer>,
    jobs: RwLock<Vec<Arc<SchedulerJob>>>,
    digest: Mutex<Option<String>>,
}

impl Scheduler {
    /// Create a scheduler reading jobs from `source` and dispatching them
    /// through `doer`
    pub fn new(
        config: SchedulerConfig,
        source: Arc<dyn ConfigSource>,
        doer: Arc<dyn JobDoer>,
    ) -> Self {
        Self {
            config,
            source,
            store: None,
            doer,
            jobs: RwLock::new(Vec::new()),
            digest: Mutex::new(None),
        }
    }

    /// Merge stored sub-sources from `store` on every reload
    pub fn with_target_store(mut self, store: Arc<dyn TargetStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Snapshot of the live jobs
    pub fn jobs(&self) -> Vec<Arc<SchedulerJob>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Live job by name
    pub fn job(&self, name: &str) -> Option<Arc<SchedulerJob>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|job| job.name() == name)
            .cloned()
    }

    /// Digest of the configuration currently scheduled
    pub fn config_digest(&self) -> Option<String> {
        self.digest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reconcile the live set with `jobs`.
    ///
    /// New names are appended with zero state. Names no longer present are
    /// removed and cancelled. Surviving names take the new spec and keep
    /// their run times and count.
    pub fn upsert_jobs(&self, jobs: Vec<SchedulerJob>) {
        let mut incoming: HashMap<String, SchedulerJob> = HashMap::new();
        let mut order = Vec::with_capacity(jobs.len());
        for job in jobs {
            order.push(job.name().to_string());
            incoming.insert(job.name().to_string(), job);
        }

        let mut live = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        live.retain(|existing| match incoming.remove(existing.name()) {
            Some(update) => {
                existing.replace_spec(update.spec());
                true
            }
            None => {
                debug!(job = %existing.name(), "Removing job");
                existing.cancel();
                false
            }
        });

        for name in order {
            if let Some(job) = incoming.remove(&name) {
                debug!(job = %name, "Adding job");
                live.push(Arc::new(job));
            }
        }
    }

    /// Load, merge and apply the configuration.
    ///
    /// Returns `true` if the job set changed and must be rescheduled.
    pub async fn reload(&self, parent: &CancellationToken) -> Result<bool> {
        let mut specs = self.source.load_configs().await?;
        if let Some(store) = &self.store {
            specs = merge_dynamic_targets(specs, store.as_ref()).await?;
        }

        let configs = JobConfigs { jobs: specs };
        let digest = configs.digest()?;
        if self.config_digest().as_deref() == Some(digest.as_str()) {
            debug!(source = %self.source.describe(), "Job config unchanged");
            return Ok(false);
        }

        let jobs: Vec<SchedulerJob> = configs
            .jobs
            .iter()
            .flat_map(|spec| SchedulerJob::split(spec, parent))
            .collect();
        validate_jobs(&jobs)?;

        info!(
            source = %self.source.describe(),
            specs = configs.jobs.len(),
            jobs = jobs.len(),
            digest = %digest,
            "Job config changed"
        );
        self.upsert_jobs(jobs);
        *self.digest.lock().unwrap_or_else(|e| e.into_inner()) = Some(digest);
        Ok(true)
    }

    /// Restart the schedule loop of every live job. Previous loops end when
    /// their tokens are replaced.
    fn schedule_jobs(&self, parent: &CancellationToken, tracker: &TaskTracker) {
        let jobs = self.jobs();
        info!(jobs = jobs.len(), digest = ?self.config_digest(), "Scheduling jobs");
        for job in jobs {
            let token = job.refresh_token(parent);
            tracker.spawn(schedule_single_job(
                job,
                token,
                self.doer.clone(),
                tracker.clone(),
            ));
        }
    }
}

async fn schedule_single_job(
    job: Arc<SchedulerJob>,
    token: CancellationToken,
    doer: Arc<dyn JobDoer>,
    tracker: TaskTracker,
) {
    if !job.has_run_before() && job.spec().task_schedule.start_immediately {
        dispatch(&job, &doer, &tracker);
    }

    loop {
        let wait = match job.duration_till_next_run() {
            Ok(wait) => wait,
            Err(e) => {
                error!(job = %job.name(), error = %e, "Cannot compute next run");
                return;
            }
        };
        tokio::select! {
            _ = token.cancelled() => {
                debug!(job = %job.name(), "Job loop cancelled");
                return;
            }
            _ = tokio::time::sleep(wait) => dispatch(&job, &doer, &tracker),
        }
    }
}

/// Record the run, then hand the job to the doer in its own task so that
/// execution time does not shift the cadence.
fn dispatch(job: &Arc<SchedulerJob>, doer: &Arc<dyn JobDoer>, tracker: &TaskTracker) {
    if let Err(e) = job.update_last_and_next_time() {
        error!(job = %job.name(), error = %e, "Failed to update run times");
        return;
    }
    let job = job.clone();
    let doer = doer.clone();
    tracker.spawn(async move {
        match doer.do_job(&job).await {
            Ok(()) => job.increment_run_count(),
            Err(e) => warn!(job = %job.name(), error = %e, "Job execution failed"),
        }
    });
}

#[async_trait::async_trait]
impl Module for Scheduler {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            source = %self.source.describe(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Scheduler starting"
        );
        // A restarted run has no loops yet, so the first reload must reschedule
        *self.digest.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let tracker = TaskTracker::new();
        let mut first = true;
        loop {
            match self.reload(&token).await {
                Ok(true) => self.schedule_jobs(&token, &tracker),
                Ok(false) => {}
                Err(e) if first && e.is_config_error() => {
                    error!(error = %e, "Invalid job configuration, nothing scheduled");
                    return Err(e);
                }
                Err(e) => error!(error = %e, "Failed to reload job config"),
            }
            first = false;

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracker.close();
        tracker.wait().await;
        info!("Scheduler stopped");
        Ok(())
    }

    async fn shutdown(&self) {
        for job in self.jobs() {
            job.cancel();
        }
        info!(module = %self.config.name, "Scheduler shut down");
    }
}

#[cfg(test)]
mod tests;
