//! Metrics sinks for task outcomes
//!
//! The reporter talks to a [`MetricsSink`]; the backend is chosen at wiring
//! time:
//! - [`InMemoryMetrics`]: counters and histograms kept in process
//! - [`StatsdMetrics`]: DogStatsD lines over UDP

/// In-process registry
pub mod memory;
/// DogStatsD client
pub mod statsd;

pub use memory::{Counter, Histogram, InMemoryMetrics};
pub use statsd::{StatsdConfig, StatsdMetrics};

use crate::error::Result;

/// Task result counter, tagged with config, collector, ip and state
pub const TASK_STATE_COUNTER: &str = "panoptic.task.state";

/// Messages collected per task
pub const TASK_COLLECTED_COUNT: &str = "panoptic.task.collected";

/// Messages that failed per task
pub const TASK_FAILED_COUNT: &str = "panoptic.task.failed";

/// Task wall time in milliseconds
pub const TASK_DURATION_MS: &str = "panoptic.task.duration_ms";

/// Destination for reporter metrics.
///
/// Tags are `key:value` strings. Implementations must not block; a failed
/// send is reported through the returned error and never retried.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by one
    fn incr_counter(&self, name: &str, tags: &[String]) -> Result<()>;

    /// Add `value` to a counter
    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<()>;

    /// Record one sample of a distribution
    fn distribution(&self, name: &str, value: f64, tags: &[String]) -> Result<()>;
}

/// Build a `key:value` tag
pub fn tag(key: &str, value: impl std::fmt::Display) -> String {
    format!("{}:{}", key, value)
}
