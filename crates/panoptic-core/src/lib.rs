//! Panoptic Core - crawl-job orchestration engine
//!
//! Turns declarative "what to crawl, how often" configuration into work on an
//! elastic pool of compute functions:
//! - Engine: module runtime with restart supervision and graceful shutdown
//! - EventBus: in-process topics between modules
//! - Scheduler: recurring jobs with hot-reloaded configuration
//! - Orchestrator: pending bundles in, executed bundles out
//! - Executor: elastic pool of remote functions, or local collectors
//! - Reporter: task outcomes to a metrics sink

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod environment;
pub mod error;
pub mod event_bus;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod protocol;
pub mod reporter;
pub mod scheduler;

pub use engine::{
    run_with_graceful_restart, wait_for_shutdown_signal, Engine, EngineConfig, Module,
    RestartPolicy, ShutdownPhase,
};
pub use environment::Environment;
pub use error::{Error, Result};
pub use event_bus::{EventBus, Message, Subscription, TOPIC_EXECUTED_JOB, TOPIC_PENDING_JOB};
pub use executor::{
    randomized_lifespan, Collector, CollectorFactory, CollectorRegistry, ComputeProvider,
    ElasticPoolExecutor, Executor, FunctionHandle, FunctionState, HttpProvider,
    HttpProviderConfig, LambdaFunction, LocalExecutor, LocalProvider, NoopCollector, PoolConfig,
    NOOP_COLLECTOR,
};
pub use metrics::{InMemoryMetrics, MetricsSink, StatsdConfig, StatsdMetrics};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use protocol::{
    CollectorId, JobConfigs, JobSpec, ResultState, Schedule, SubSource, SubSourceKind, Task,
    TaskBundle, TaskMetadata, TaskParams, TaskSchedule,
};
pub use reporter::{Reporter, ReporterConfig};
pub use scheduler::{
    merge_dynamic_targets, validate_jobs, ConfigSource, FileConfigSource, HttpConfigSource,
    InMemoryTargetStore, JobDoer, LoggingJobDoer, PublishingJobDoer, Scheduler, SchedulerConfig,
    SchedulerJob, SourceSelection, TargetStore,
};
