//! In-process collectors
//!
//! Site-specific crawling lives outside this crate. A [`CollectorRegistry`]
//! maps each collector id to a constructor for the code that crawls it, so
//! the executors never need to know which sources exist.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Executor;
use crate::error::{Error, Result};
use crate::protocol::{CollectorId, ResultState, Task, TaskBundle};

/// Collector id of the built-in collector that crawls nothing
pub const NOOP_COLLECTOR: &str = "noop";

/// Crawls the sub-sources of one task
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Run `task`, filling in its metadata counters. The result state is set
    /// to success if the collector leaves it unset and returns `Ok`.
    async fn collect(&self, task: &mut Task) -> Result<()>;
}

/// Builds a fresh collector for one task
pub type CollectorFactory = Arc<dyn Fn() -> Box<dyn Collector> + Send + Sync>;

/// Reports every sub-source as collected without doing any work
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCollector;

#[async_trait::async_trait]
impl Collector for NoopCollector {
    async fn collect(&self, task: &mut Task) -> Result<()> {
        task.metadata.total_collected = task.params.sub_sources.len() as u64;
        task.metadata.result_state = ResultState::Success;
        Ok(())
    }
}

/// Collector id to constructor
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    factories: HashMap<CollectorId, CollectorFactory>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("collectors", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CollectorRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in collectors
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            NOOP_COLLECTOR,
            Arc::new(|| Box::new(NoopCollector) as Box<dyn Collector>),
        );
        registry
    }

    /// Register or replace the constructor for `id`
    pub fn register(&mut self, id: impl Into<CollectorId>, factory: CollectorFactory) {
        self.factories.insert(id.into(), factory);
    }

    /// Whether `id` has a collector
    #[must_use]
    pub fn contains(&self, id: &CollectorId) -> bool {
        self.factories.contains_key(id)
    }

    /// Build a collector for `id`
    #[must_use]
    pub fn create(&self, id: &CollectorId) -> Option<Box<dyn Collector>> {
        self.factories.get(id).map(|factory| factory())
    }

    /// Run every task of `bundle`, recording timestamps and outcome on each.
    ///
    /// A task whose collector is unknown or fails is marked failed; the other
    /// tasks still run.
    pub async fn run_bundle(&self, mut bundle: TaskBundle) -> TaskBundle {
        for task in &mut bundle.tasks {
            task.metadata.started_at = Some(Utc::now());
            let outcome = match self.create(&task.collector) {
                Some(collector) => collector.collect(task).await,
                None => Err(Error::Execution(format!(
                    "no collector registered for {}",
                    task.collector
                ))),
            };
            match outcome {
                Ok(()) => {
                    if task.metadata.result_state == ResultState::Unset {
                        task.metadata.result_state = ResultState::Success;
                    }
                }
                Err(e) => {
                    warn!(
                        task_id = %task.task_id,
                        collector = %task.collector,
                        error = %e,
                        "Task failed"
                    );
                    task.metadata.result_state = ResultState::Failed;
                }
            }
            task.metadata.finished_at = Some(Utc::now());
        }
        bundle
    }
}

/// Runs bundles directly in this process
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    registry: Arc<CollectorRegistry>,
}

impl LocalExecutor {
    /// Create an executor backed by `registry`
    #[must_use]
    pub fn new(registry: Arc<CollectorRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, token: CancellationToken, bundle: TaskBundle) -> Result<TaskBundle> {
        debug!(job_id = %bundle.job_id, tasks = bundle.tasks.len(), "Executing locally");
        tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            done = self.registry.run_bundle(bundle) => Ok(done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JobSpec, SubSource};
    use std::time::Duration;

    struct FailingCollector;

    #[async_trait::async_trait]
    impl Collector for FailingCollector {
        async fn collect(&self, task: &mut Task) -> Result<()> {
            task.metadata.total_failed = 1;
            Err(Error::Execution("site unavailable".to_string()))
        }
    }

    fn bundle(collector: &str) -> TaskBundle {
        let spec = JobSpec::new("job", collector, "src", Duration::from_secs(1))
            .with_sub_sources(vec![SubSource::named("a"), SubSource::named("b")]);
        TaskBundle::from_spec(&spec, true)
    }

    #[tokio::test]
    async fn test_noop_collector() {
        let executor = LocalExecutor::new(Arc::new(CollectorRegistry::with_builtin()));
        let done = executor
            .execute(CancellationToken::new(), bundle(NOOP_COLLECTOR))
            .await
            .unwrap();

        let meta = &done.tasks[0].metadata;
        assert_eq!(meta.result_state, ResultState::Success);
        assert_eq!(meta.total_collected, 2);
        assert!(meta.duration().is_some());
    }

    #[tokio::test]
    async fn test_unknown_and_failing_collectors() {
        let mut registry = CollectorRegistry::with_builtin();
        registry.register(
            "broken",
            Arc::new(|| Box::new(FailingCollector) as Box<dyn Collector>),
        );

        let done = registry.run_bundle(bundle("missing")).await;
        assert_eq!(done.tasks[0].metadata.result_state, ResultState::Failed);

        let done = registry.run_bundle(bundle("broken")).await;
        assert_eq!(done.tasks[0].metadata.result_state, ResultState::Failed);
        assert_eq!(done.tasks[0].metadata.total_failed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_execution() {
        let executor = LocalExecutor::new(Arc::new(CollectorRegistry::with_builtin()));
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            executor.execute(token, bundle(NOOP_COLLECTOR)).await,
            Err(Error::Cancelled)
        ));
    }
}
