//! Application wiring
//!
//! - `config`: configuration sections
//! - `loader`: layered configuration loading
//!
//! [`run`] builds the modules from an [`AppConfig`], runs the engine until a
//! shutdown signal or a fatal module error, then shuts everything down.

pub mod config;
pub mod loader;

pub use config::AppConfig;
pub use loader::load_config;

use std::sync::Arc;

use anyhow::{Context, Result};
use panoptic_core::{
    wait_for_shutdown_signal, CollectorRegistry, ComputeProvider, ElasticPoolExecutor, Engine,
    EventBus, Executor, HttpProvider, InMemoryMetrics, JobDoer, LocalExecutor, LocalProvider,
    LoggingJobDoer, MetricsSink, Orchestrator, PublishingJobDoer, Reporter, ReporterConfig,
    Scheduler, SchedulerJob, StatsdMetrics,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{ExecutorMode, MetricsBackend, ProviderKind};

/// Fully wired engine plus handles needed after it stops
struct Runtime {
    engine: Arc<Engine>,
    /// Shut down after the engine, outside its shutdown timeout
    executor: Arc<dyn Executor>,
    memory_metrics: Option<Arc<InMemoryMetrics>>,
}

async fn build_executor(
    config: &AppConfig,
    registry: Arc<CollectorRegistry>,
) -> Result<Arc<dyn Executor>> {
    if config.pool.executor == ExecutorMode::Local {
        info!("Executing bundles in process");
        return Ok(Arc::new(LocalExecutor::new(registry)));
    }

    let provider: Arc<dyn ComputeProvider> = match config.pool.provider {
        ProviderKind::Local => Arc::new(LocalProvider::new(registry)),
        ProviderKind::Http => Arc::new(
            HttpProvider::new(config.pool.http.to_provider_config())
                .context("Failed to create HTTP compute provider")?,
        ),
    };
    let pool = Arc::new(ElasticPoolExecutor::new(
        provider,
        config.pool.to_pool_config(),
    ));
    pool.init()
        .await
        .context("Failed to initialize function pool")?;
    info!(
        pool_size = config.pool.pool_size,
        provider = ?config.pool.provider,
        "Function pool initialized"
    );
    let executor: Arc<dyn Executor> = pool;
    Ok(executor)
}

fn build_metrics(
    config: &AppConfig,
) -> Result<(Arc<dyn MetricsSink>, Option<Arc<InMemoryMetrics>>)> {
    match config.metrics.backend {
        MetricsBackend::Memory => {
            let metrics = Arc::new(InMemoryMetrics::new());
            let sink: Arc<dyn MetricsSink> = metrics.clone();
            Ok((sink, Some(metrics)))
        }
        MetricsBackend::Statsd => {
            let statsd = StatsdMetrics::connect(config.metrics.statsd.clone())
                .context("Failed to connect to statsd agent")?;
            info!(address = %config.metrics.statsd.address, "Reporting to statsd");
            let sink: Arc<dyn MetricsSink> = Arc::new(statsd);
            Ok((sink, None))
        }
    }
}

fn build_scheduler(config: &AppConfig, bus: &EventBus) -> Result<Scheduler> {
    let source = config
        .scheduler
        .to_source_selection()
        .select(config.environment)
        .context("Failed to select job config source")?;
    let doer: Arc<dyn JobDoer> = if config.scheduler.publish {
        Arc::new(PublishingJobDoer::new(bus.clone(), config.environment))
    } else {
        Arc::new(LoggingJobDoer)
    };
    Ok(Scheduler::new(
        config.scheduler.to_scheduler_config(),
        source,
        doer,
    ))
}

async fn build(config: &AppConfig) -> Result<Runtime> {
    let bus = EventBus::with_max_deliveries(config.event_bus.max_deliveries);
    let registry = Arc::new(CollectorRegistry::with_builtin());

    if !config.drain_fits_shutdown() {
        warn!(
            shutdown_timeout_secs = config.engine.shutdown_timeout_secs,
            drain_timeout_secs = config.orchestrator.drain_timeout_secs,
            "Engine shutdown timeout does not exceed the orchestrator drain timeout"
        );
    }

    let scheduler = if config.scheduler.enabled {
        Some(build_scheduler(config, &bus)?)
    } else {
        warn!("Scheduler disabled, no jobs will be dispatched");
        None
    };
    let metrics = if config.reporter.enabled {
        Some(build_metrics(config)?)
    } else {
        None
    };

    // Creates remote functions, so nothing fallible may follow it
    let executor = build_executor(config, registry).await?;

    let mut engine = Engine::new(bus.clone(), config.engine.to_engine_config());
    if let Some(scheduler) = scheduler {
        engine = engine.with_module(Arc::new(scheduler));
    }
    engine = engine.with_module(Arc::new(Orchestrator::new(
        config.orchestrator.to_orchestrator_config(),
        bus.clone(),
        executor.clone(),
    )));

    let mut memory_metrics = None;
    if let Some((sink, memory)) = metrics {
        memory_metrics = memory;
        engine = engine.with_module(Arc::new(Reporter::new(
            ReporterConfig::default(),
            bus,
            sink,
        )));
    }

    Ok(Runtime {
        engine: Arc::new(engine),
        executor,
        memory_metrics,
    })
}

/// Run until Ctrl+C / SIGTERM or until a module fails fatally
pub async fn run(config: AppConfig) -> Result<()> {
    info!(
        environment = %config.environment,
        "Starting Panoptic v{}",
        env!("CARGO_PKG_VERSION")
    );
    let runtime = build(&config).await?;
    let engine = runtime.engine.clone();

    let mut running = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    let finished = tokio::select! {
        joined = &mut running => Some(joined),
        _ = wait_for_shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
    };

    engine.shutdown().await;
    let joined = match finished {
        Some(joined) => joined,
        None => running.await,
    };
    runtime.executor.shutdown().await;

    if let Some(metrics) = runtime.memory_metrics {
        for line in metrics.summary() {
            info!(metric = %line, "Final metric");
        }
    }

    joined
        .context("Engine task panicked")?
        .context("Engine stopped with an error")?;
    info!("Panoptic shutdown complete");
    Ok(())
}

/// Load, merge, split and validate the job configuration without running it
pub async fn validate(config: &AppConfig) -> Result<Vec<Arc<SchedulerJob>>> {
    let scheduler = build_scheduler(config, &EventBus::new())?;
    let token = CancellationToken::new();
    scheduler
        .reload(&token)
        .await
        .context("Job configuration is invalid")?;
    token.cancel();
    Ok(scheduler.jobs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Counts connection attempts on a local port that never answers
    async fn counting_listener() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        tokio::spawn({
            let connections = connections.clone();
            async move {
                while let Ok((_stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        (url, connections)
    }

    #[tokio::test]
    async fn test_build_fails_before_creating_functions() {
        let (url, connections) = counting_listener().await;
        let mut config = AppConfig::default();
        config.pool.executor = ExecutorMode::Pool;
        config.pool.provider = ProviderKind::Http;
        config.pool.http.base_url = url;
        config.metrics.backend = MetricsBackend::Statsd;
        config.metrics.statsd.address = "not an address".to_string();

        let err = match build(&config).await {
            Ok(_) => panic!("build should fail on a bad statsd address"),
            Err(e) => e,
        };
        assert!(format!("{:#}", err).contains("statsd"), "unexpected error: {:#}", err);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_build_local_runtime() {
        let mut config = AppConfig::default();
        config.pool.executor = ExecutorMode::Local;
        config.scheduler.enabled = false;

        let runtime = build(&config).await.unwrap();
        assert!(runtime.memory_metrics.is_some());
        runtime.engine.shutdown().await;
        runtime.executor.shutdown().await;
    }
}
