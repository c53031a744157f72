//! Executors - run a task bundle somewhere and return it annotated
//!
//! - [`ElasticPoolExecutor`]: rotating pool of remote functions
//! - [`LocalExecutor`]: runs collectors in this process
//!
//! Remote platforms plug in through [`ComputeProvider`]; crawl logic plugs
//! in through [`Collector`] and [`CollectorRegistry`].

/// Pool member state
pub mod function;
/// REST compute provider
pub mod http_provider;
/// Lifespan randomization
pub mod lifespan;
/// In-process collectors
pub mod local;
/// Elastic pool
pub mod pool;
/// Compute provider trait
pub mod provider;

pub use function::{FunctionState, LambdaFunction};
pub use http_provider::{HttpProvider, HttpProviderConfig};
pub use lifespan::randomized_lifespan;
pub use local::{
    Collector, CollectorFactory, CollectorRegistry, LocalExecutor, NoopCollector, NOOP_COLLECTOR,
};
pub use pool::{ElasticPoolExecutor, PoolConfig};
pub use provider::{ComputeProvider, FunctionHandle, LocalProvider};

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::TaskBundle;

/// Runs task bundles
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Execute `bundle` and return it with its task metadata filled in.
    /// Must return [`Error::Cancelled`](crate::Error::Cancelled) once `token`
    /// is cancelled.
    async fn execute(&self, token: CancellationToken, bundle: TaskBundle) -> Result<TaskBundle>;

    /// Release resources
    async fn shutdown(&self) {}
}
