use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Lifecycle of a pool member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionState {
    /// In the active list, eligible for new jobs
    Active,
    /// Retired, still finishing pending jobs
    Stale,
    /// Retired with no pending jobs, safe to delete
    Removable,
}

/// One remote compute function in the pool.
///
/// The pending job set has its own lock so that registering a job never
/// waits on pool maintenance.
#[derive(Debug)]
pub struct LambdaFunction {
    name: String,
    created_at: DateTime<Utc>,
    span: Duration,
    retired: AtomicBool,
    jobs: RwLock<HashSet<String>>,
}

impl LambdaFunction {
    /// Track a function created at `created_at` that goes stale after `span`
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>, span: Duration) -> Self {
        Self {
            name: name.into(),
            created_at,
            span,
            retired: AtomicBool::new(false),
            jobs: RwLock::new(HashSet::new()),
        }
    }

    /// Function name on the provider
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time reported by the provider
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Randomized lifespan
    #[must_use]
    pub fn span(&self) -> Duration {
        self.span
    }

    /// Older than its span
    #[must_use]
    pub fn is_stale(&self) -> bool {
        let age = (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age > self.span
    }

    /// No jobs are running on it
    #[must_use]
    pub fn is_removable(&self) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Register a job before using the function
    pub fn add_pending_job(&self, job_id: &str) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.to_string());
    }

    /// Deregister a finished job
    pub fn delete_pending_job(&self, job_id: &str) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
    }

    /// Number of jobs running on it
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> FunctionState {
        if !self.retired.load(Ordering::SeqCst) {
            FunctionState::Active
        } else if self.is_removable() {
            FunctionState::Removable
        } else {
            FunctionState::Stale
        }
    }
}
