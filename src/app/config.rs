//! Application configuration types
//!
//! Every section is optional in TOML; missing fields take the defaults below,
//! which match `config/default.toml`.

use std::path::PathBuf;
use std::time::Duration;

use panoptic_core::{
    Environment, EngineConfig, HttpProviderConfig, OrchestratorConfig, PoolConfig, RestartPolicy,
    SchedulerConfig, SourceSelection, StatsdConfig,
};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub engine: EngineSection,
    pub event_bus: EventBusSection,
    pub scheduler: SchedulerSection,
    pub pool: PoolSection,
    pub orchestrator: OrchestratorSection,
    pub reporter: ReporterSection,
    pub metrics: MetricsSection,
}

impl AppConfig {
    /// Whether the orchestrator can finish its drain, and cancel what is
    /// left, before the engine gives up on module shutdown hooks
    pub fn drain_fits_shutdown(&self) -> bool {
        self.engine.shutdown_timeout_secs > self.orchestrator.drain_timeout_secs
    }
}

/// Module runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub restart_policy: RestartPolicy,
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            restart_policy: RestartPolicy::default(),
            shutdown_timeout_secs: 45,
        }
    }
}

impl EngineSection {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_restart_policy(self.restart_policy)
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
    }
}

/// Event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusSection {
    /// Deliveries per message, including the first
    pub max_deliveries: u32,
}

impl Default for EventBusSection {
    fn default() -> Self {
        Self { max_deliveries: 16 }
    }
}

/// Scheduler and job config source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Publish due jobs on the bus; when false they are only logged
    pub publish: bool,
    pub local_path: PathBuf,
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub force_remote_pull: bool,
    pub remote_timeout_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
            publish: true,
            local_path: PathBuf::from("config/jobs.toml"),
            remote_url: None,
            remote_token: None,
            force_remote_pull: false,
            remote_timeout_secs: 10,
        }
    }
}

impl SchedulerSection {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new().with_poll_interval(Duration::from_secs(self.poll_interval_secs))
    }

    pub fn to_source_selection(&self) -> SourceSelection {
        SourceSelection {
            local_path: self.local_path.clone(),
            remote_url: self.remote_url.clone().filter(|url| !url.is_empty()),
            remote_token: self.remote_token.clone().filter(|token| !token.is_empty()),
            force_remote_pull: self.force_remote_pull,
            remote_timeout: Duration::from_secs(self.remote_timeout_secs),
        }
    }
}

/// Where bundles run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    /// Elastic pool of compute functions
    #[default]
    Pool,
    /// Directly in this process
    Local,
}

/// Compute platform behind the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Functions are in-process collector runners
    #[default]
    Local,
    /// REST control plane
    Http,
}

/// Executor and elastic pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub executor: ExecutorMode,
    pub provider: ProviderKind,
    pub pool_size: usize,
    pub function_lifespan_secs: u64,
    pub maintain_every_secs: u64,
    pub acquire_retry_ms: u64,
    pub drain_timeout_secs: u64,
    pub function_prefix: String,
    pub http: HttpProviderSection,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            executor: ExecutorMode::default(),
            provider: ProviderKind::default(),
            pool_size: 4,
            function_lifespan_secs: 600,
            maintain_every_secs: 60,
            acquire_retry_ms: 1000,
            drain_timeout_secs: 30,
            function_prefix: "data-collector".to_string(),
            http: HttpProviderSection::default(),
        }
    }
}

impl PoolSection {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            lifespan: Duration::from_secs(self.function_lifespan_secs),
            maintain_every: Duration::from_secs(self.maintain_every_secs),
            acquire_retry_interval: Duration::from_millis(self.acquire_retry_ms),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            function_prefix: self.function_prefix.clone(),
        }
    }
}

/// REST provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpProviderSection {
    pub base_url: String,
    pub image: String,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    pub activation_timeout_secs: u64,
    pub activation_poll_ms: u64,
}

impl Default for HttpProviderSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            image: "data-collector:latest".to_string(),
            api_token: None,
            timeout_secs: 900,
            activation_timeout_secs: 120,
            activation_poll_ms: 1000,
        }
    }
}

impl HttpProviderSection {
    pub fn to_provider_config(&self) -> HttpProviderConfig {
        HttpProviderConfig {
            base_url: self.base_url.clone(),
            image: self.image.clone(),
            api_token: self.api_token.clone().filter(|token| !token.is_empty()),
            timeout: Duration::from_secs(self.timeout_secs),
            activation_timeout: Duration::from_secs(self.activation_timeout_secs),
            activation_poll: Duration::from_millis(self.activation_poll_ms),
        }
    }
}

/// Orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 0 disables the limit
    pub execution_timeout_secs: u64,
    /// Do not execute debug jobs on the pool
    pub skip_debug_bundles: bool,
    pub drain_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 0,
            skip_debug_bundles: false,
            drain_timeout_secs: 30,
        }
    }
}

impl OrchestratorSection {
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        let timeout = (self.execution_timeout_secs > 0)
            .then(|| Duration::from_secs(self.execution_timeout_secs));
        OrchestratorConfig::default()
            .with_execution_timeout(timeout)
            .with_skip_debug_bundles(self.skip_debug_bundles)
            .with_drain_timeout(Duration::from_secs(self.drain_timeout_secs))
    }
}

/// Reporter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterSection {
    pub enabled: bool,
}

impl Default for ReporterSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Metrics backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsBackend {
    /// Keep metrics in process, log a summary on shutdown
    #[default]
    Memory,
    /// DogStatsD agent
    Statsd,
}

/// Metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub backend: MetricsBackend,
    pub statsd: StatsdConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.pool.pool_size, 4);
        assert_eq!(config.scheduler.poll_interval_secs, 60);
        assert_eq!(config.metrics.backend, MetricsBackend::Memory);
        assert_eq!(config.engine.restart_policy, RestartPolicy::default());
    }

    #[test]
    fn test_default_drain_fits_shutdown() {
        let mut config = AppConfig::default();
        assert!(config.drain_fits_shutdown());

        config.engine.shutdown_timeout_secs = config.orchestrator.drain_timeout_secs;
        assert!(!config.drain_fits_shutdown());
    }

    #[test]
    fn test_zero_execution_timeout_means_unbounded() {
        let section = OrchestratorSection::default();
        assert!(section.to_orchestrator_config().execution_timeout.is_none());

        let section = OrchestratorSection {
            execution_timeout_secs: 5,
            ..OrchestratorSection::default()
        };
        assert_eq!(
            section.to_orchestrator_config().execution_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_empty_remote_url_is_ignored() {
        let section = SchedulerSection {
            remote_url: Some(String::new()),
            ..SchedulerSection::default()
        };
        assert!(section.to_source_selection().remote_url.is_none());
    }

    #[test]
    fn test_restart_policy_from_toml() {
        let config: AppConfig = toml::from_str(
            r#"
[engine.restart_policy]
kind = "backoff"
initial_ms = 500
max_ms = 10000
multiplier = 2.0
"#,
        )
        .unwrap();
        assert_eq!(
            config.engine.restart_policy,
            RestartPolicy::Backoff {
                initial_ms: 500,
                max_ms: 10_000,
                multiplier: 2.0
            }
        );
    }
}
