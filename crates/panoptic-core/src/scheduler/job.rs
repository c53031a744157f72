//! SchedulerJob - runtime wrapper around one JobSpec

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{JobSpec, Schedule};

#[derive(Debug)]
struct JobState {
    spec: Arc<JobSpec>,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    run_count: u64,
    token: CancellationToken,
}

/// One recurring job plus its scheduling state.
///
/// The spec and all scheduling fields live behind a single lock: cadence
/// reads take the read lock, the post-dispatch update takes the write lock.
#[derive(Debug)]
pub struct SchedulerJob {
    name: String,
    state: RwLock<JobState>,
}

impl SchedulerJob {
    /// Wrap `spec` with zero scheduling state and a child token of `parent`
    pub fn new(spec: JobSpec, parent: &CancellationToken) -> Self {
        Self {
            name: spec.name.clone(),
            state: RwLock::new(JobState {
                spec: Arc::new(spec),
                last_run: None,
                next_run: None,
                run_count: 0,
                token: parent.child_token(),
            }),
        }
    }

    /// Build the jobs for one spec.
    ///
    /// When the spec caps sub-sources per task and has more than the cap,
    /// its sub-sources are cut into contiguous batches of that size, one job
    /// per batch, named `name-0`, `name-1`, and so on. Otherwise the spec
    /// yields a single job under its own name.
    pub fn split(spec: &JobSpec, parent: &CancellationToken) -> Vec<SchedulerJob> {
        let cap = spec.task_params.max_sub_sources_per_task;
        let sub_sources = &spec.task_params.sub_sources;
        if cap == 0 || sub_sources.len() <= cap {
            return vec![Self::new(spec.clone(), parent)];
        }

        sub_sources
            .chunks(cap)
            .enumerate()
            .map(|(idx, batch)| {
                let mut part = spec.clone();
                part.name = format!("{}-{}", spec.name, idx);
                part.task_params.sub_sources = batch.to_vec();
                Self::new(part, parent)
            })
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Job name, unique within a scheduler
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current spec
    #[must_use]
    pub fn spec(&self) -> Arc<JobSpec> {
        self.read().spec.clone()
    }

    /// Swap in a new version of the spec, keeping the scheduling state
    pub fn replace_spec(&self, spec: Arc<JobSpec>) {
        self.write().spec = spec;
    }

    /// Run interval derived from the schedule
    pub fn calculate_interval(&self) -> Result<Duration> {
        interval_of(&self.read().spec)
    }

    /// Time left until the next run. A job that never ran waits one full
    /// interval.
    pub fn duration_till_next_run(&self) -> Result<Duration> {
        let state = self.read();
        match (state.last_run, state.next_run) {
            (Some(_), Some(next)) => Ok((next - Utc::now()).to_std().unwrap_or(Duration::ZERO)),
            _ => interval_of(&state.spec),
        }
    }

    /// Record a run starting now and schedule the next one an interval later.
    ///
    /// `last_run` is set even when the schedule cannot be interpreted.
    pub fn update_last_and_next_time(&self) -> Result<()> {
        let mut state = self.write();
        let now = Utc::now();
        state.last_run = Some(now);
        let interval = interval_of(&state.spec)?;
        let step = chrono::Duration::from_std(interval).map_err(|_| {
            Error::invalid_config(format!("jobs[{}].schedule", self.name), "interval too large")
        })?;
        state.next_run = Some(now + step);
        Ok(())
    }

    /// Bump the run counter
    pub fn increment_run_count(&self) {
        self.write().run_count += 1;
    }

    /// Completed dispatches
    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.read().run_count
    }

    /// Whether the job has run at least once
    #[must_use]
    pub fn has_run_before(&self) -> bool {
        self.read().last_run.is_some()
    }

    /// Start of the last run
    #[must_use]
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.read().last_run
    }

    /// Planned start of the next run
    #[must_use]
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.read().next_run
    }

    /// Token scoped to this job's current schedule loop
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.read().token.clone()
    }

    /// Cancel the current token and install a fresh child of `parent`.
    /// Returns the new token.
    pub fn refresh_token(&self, parent: &CancellationToken) -> CancellationToken {
        let mut state = self.write();
        state.token.cancel();
        state.token = parent.child_token();
        state.token.clone()
    }

    /// Cancel the job's schedule loop
    pub fn cancel(&self) {
        self.read().token.cancel();
    }
}

fn interval_of(spec: &JobSpec) -> Result<Duration> {
    match spec.task_schedule.schedule {
        Schedule::Routinely { every_milliseconds } => Ok(Duration::from_millis(every_milliseconds)),
        Schedule::Unknown => Err(Error::UnknownScheduleKind {
            job: spec.name.clone(),
        }),
    }
}
