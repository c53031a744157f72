//! Scheduler - recurring crawl jobs
//!
//! - [`SchedulerJob`]: one job spec plus its run times
//! - [`Scheduler`]: the engine module that reloads configuration and fires
//!   due jobs through a [`JobDoer`]
//! - [`ConfigSource`] and [`TargetStore`]: where specs and extra
//!   sub-sources come from

/// JobDoer implementations
pub mod doer;
/// Scheduler module
pub mod engine;
/// Per-job state
pub mod job;
/// Stored sub-source merging
pub mod merge;
/// Configuration sources
pub mod source;

pub use doer::{JobDoer, LoggingJobDoer, PublishingJobDoer};
pub use engine::{validate_jobs, Scheduler, SchedulerConfig};
pub use job::SchedulerJob;
pub use merge::{merge_dynamic_targets, InMemoryTargetStore, TargetStore};
pub use source::{ConfigSource, FileConfigSource, HttpConfigSource, SourceSelection};
