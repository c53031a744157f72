use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{CollectorId, JobSpec, TaskParams};
use crate::error::{Error, Result};

/// Current wire version of [`TaskBundle`]
pub const BUNDLE_VERSION: u32 = 1;

fn default_version() -> u32 {
    BUNDLE_VERSION
}

/// Outcome of a single task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    /// Not executed yet
    #[default]
    Unset,
    /// Collector finished
    Success,
    /// Collector reported failure
    Failed,
}

impl ResultState {
    /// Stable lowercase name used in metric tags
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Execution metadata filled in by the collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Name of the job config that produced the task
    pub config_name: String,
    /// Outcome
    #[serde(default)]
    pub result_state: ResultState,
    /// Messages collected
    #[serde(default)]
    pub total_collected: u64,
    /// Messages that failed to collect
    #[serde(default)]
    pub total_failed: u64,
    /// Address the collector ran from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_addr: Option<String>,
    /// Collector start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Collector end time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskMetadata {
    /// Wall time between start and finish, if both are known
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// One unit of crawl work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id
    pub task_id: String,
    /// Collector that runs this task
    pub collector: CollectorId,
    /// Copy of the job's parameters
    pub params: TaskParams,
    /// Result counters and state
    #[serde(default)]
    pub metadata: TaskMetadata,
}

/// A dispatched job: one or more tasks sharing a job id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBundle {
    /// Wire version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Unique job id
    pub job_id: String,
    /// Tasks in this job
    pub tasks: Vec<Task>,
    /// Debug bundles must not publish crawled data downstream
    #[serde(default)]
    pub debug: bool,
}

impl TaskBundle {
    /// Build a bundle with a fresh job id and one task for `spec`
    pub fn from_spec(spec: &JobSpec, debug: bool) -> Self {
        Self {
            version: BUNDLE_VERSION,
            job_id: Uuid::new_v4().to_string(),
            tasks: vec![Task {
                task_id: Uuid::new_v4().to_string(),
                collector: spec.collector.clone(),
                params: spec.task_params.clone(),
                metadata: TaskMetadata {
                    config_name: spec.name.clone(),
                    ..TaskMetadata::default()
                },
            }],
            debug,
        }
    }

    /// Serialize for the event bus or a compute invocation
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize, rejecting bundles from a newer protocol version
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bundle: Self = serde_json::from_slice(bytes)?;
        if bundle.version > BUNDLE_VERSION {
            return Err(Error::UnsupportedVersion(bundle.version));
        }
        Ok(bundle)
    }
}
