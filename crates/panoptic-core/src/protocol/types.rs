//! Job configuration types
//!
//! A job configuration file is a TOML document with one `[[jobs]]` table per
//! recurring crawl:
//!
//! ```toml
//! [[jobs]]
//! name = "jinshi"
//! collector = "jinshi"
//!
//! [jobs.task_params]
//! source_id = "a882eb0d-0bde-401a-b708-a7ce352b7392"
//!
//! [jobs.task_schedule]
//! start_immediately = true
//! schedule = { kind = "routinely", every_milliseconds = 30000 }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Identity of the collector that knows how to crawl a source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectorId(String);

impl CollectorId {
    /// Create a collector id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of sub-source within a source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubSourceKind {
    /// Not specified
    #[default]
    Unspecified,
    /// An account or user feed
    Users,
    /// A keyword search
    Keywords,
}

/// One crawlable target inside a source (an account, a channel, a keyword)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubSource {
    /// Name, unique within its source
    pub name: String,
    /// Kind of target
    #[serde(default)]
    pub kind: SubSourceKind,
    /// Identifier on the origin site
    #[serde(default)]
    pub external_id: String,
    /// Link to the target on the origin site
    #[serde(default)]
    pub link: String,
    /// Avatar image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Collector-specific crawler parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawler_params: Option<Value>,
}

impl SubSource {
    /// Create a sub-source with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SubSourceKind::default(),
            external_id: String::new(),
            link: String::new(),
            avatar_url: None,
            crawler_params: None,
        }
    }
}

/// Parameters copied into every task built from a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    /// Source this job crawls
    pub source_id: String,
    /// Targets within the source
    #[serde(default)]
    pub sub_sources: Vec<SubSource>,
    /// Maximum sub-sources per task; 0 means no limit
    #[serde(default)]
    pub max_sub_sources_per_task: usize,
    /// Whether sub-sources discovered in the data store are merged in
    #[serde(default)]
    pub accept_dynamic_sub_sources: bool,
    /// Opaque collector parameters
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// How often a job runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run every N milliseconds
    Routinely {
        /// Interval in milliseconds
        every_milliseconds: u64,
    },
    /// A schedule kind this build does not support
    #[serde(other)]
    Unknown,
}

impl Schedule {
    /// Create a fixed interval schedule
    pub fn every(interval: Duration) -> Self {
        Self::Routinely {
            every_milliseconds: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Schedule plus start behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSchedule {
    /// Fire as soon as the job is first scheduled instead of after one interval
    #[serde(default)]
    pub start_immediately: bool,
    /// Recurrence
    pub schedule: Schedule,
}

/// A recurring crawl job as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Stable, unique name
    pub name: String,
    /// Collector that executes the tasks
    pub collector: CollectorId,
    /// Parameters for every task
    pub task_params: TaskParams,
    /// When to run
    pub task_schedule: TaskSchedule,
    /// Never publish results downstream
    #[serde(default)]
    pub dry_run: bool,
}

impl JobSpec {
    /// Create a job running every `interval`
    pub fn new(
        name: impl Into<String>,
        collector: impl Into<CollectorId>,
        source_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            collector: collector.into(),
            task_params: TaskParams {
                source_id: source_id.into(),
                ..TaskParams::default()
            },
            task_schedule: TaskSchedule {
                start_immediately: false,
                schedule: Schedule::every(interval),
            },
            dry_run: false,
        }
    }

    /// Set sub-sources
    pub fn with_sub_sources(mut self, sub_sources: Vec<SubSource>) -> Self {
        self.task_params.sub_sources = sub_sources;
        self
    }

    /// Set the per-task sub-source cap
    pub fn with_max_sub_sources_per_task(mut self, cap: usize) -> Self {
        self.task_params.max_sub_sources_per_task = cap;
        self
    }

    /// Fire on first schedule
    pub fn with_start_immediately(mut self, start: bool) -> Self {
        self.task_schedule.start_immediately = start;
        self
    }

    /// Mark as dry run
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// A full job configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfigs {
    /// All configured jobs
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

impl JobConfigs {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let configs: Self = toml::from_str(text)?;
        configs.check_required_fields()?;
        Ok(configs)
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect())
    }

    fn check_required_fields(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (idx, job) in self.jobs.iter().enumerate() {
            if job.name.trim().is_empty() {
                return Err(Error::invalid_config(
                    format!("jobs[{}].name", idx),
                    "must not be empty",
                ));
            }
            if job.collector.as_str().is_empty() {
                return Err(Error::invalid_config(
                    format!("jobs[{}].collector", job.name),
                    "must not be empty",
                ));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(Error::DuplicateJobName(job.name.clone()));
            }
        }
        Ok(())
    }
}
