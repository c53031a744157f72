//! ElasticPoolExecutor - a rotating pool of remote compute functions
//!
//! Every function gets a randomized lifespan. A maintenance tick retires
//! functions past their lifespan, refills the pool to its target size and
//! deletes retired functions once no job is running on them. A job is
//! registered on a function before the function is handed out, so a
//! function in use is never deleted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::function::LambdaFunction;
use super::lifespan::randomized_lifespan;
use super::provider::{random_function_name, ComputeProvider};
use super::Executor;
use crate::error::{Error, Result};
use crate::protocol::TaskBundle;

/// Pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Target number of active functions
    pub pool_size: usize,
    /// Mean function lifespan
    pub lifespan: Duration,
    /// Time between maintenance ticks
    pub maintain_every: Duration,
    /// Sleep between attempts to find an active function
    pub acquire_retry_interval: Duration,
    /// How long shutdown waits for running jobs before deleting anyway
    pub drain_timeout: Duration,
    /// Function name prefix
    pub function_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            lifespan: Duration::from_secs(600),
            maintain_every: Duration::from_secs(60),
            acquire_retry_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
            function_prefix: "data-collector".to_string(),
        }
    }
}

impl PoolConfig {
    /// Set pool size
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set mean lifespan
    #[must_use]
    pub fn with_lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan = lifespan;
        self
    }

    /// Set maintenance interval
    #[must_use]
    pub fn with_maintain_every(mut self, interval: Duration) -> Self {
        self.maintain_every = interval;
        self
    }

    /// Set acquire retry interval
    #[must_use]
    pub fn with_acquire_retry_interval(mut self, interval: Duration) -> Self {
        self.acquire_retry_interval = interval;
        self
    }

    /// Set drain timeout
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Reject settings the pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::invalid_config("pool.pool_size", "must be greater than zero"));
        }
        if self.maintain_every.is_zero() {
            return Err(Error::invalid_config(
                "pool.maintain_every_secs",
                "must be greater than zero",
            ));
        }
        if self.acquire_retry_interval.is_zero() {
            return Err(Error::invalid_config(
                "pool.acquire_retry_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Deregisters a job from its function on every exit path of `execute`
struct PendingJobGuard {
    function: Arc<LambdaFunction>,
    job_id: String,
}

impl Drop for PendingJobGuard {
    fn drop(&mut self) {
        self.function.delete_pending_job(&self.job_id);
    }
}

/// Executor running bundles on a rotating pool of provider functions
pub struct ElasticPoolExecutor {
    config: PoolConfig,
    provider: Arc<dyn ComputeProvider>,
    token: CancellationToken,
    initialized: AtomicBool,
    active: RwLock<Vec<Arc<LambdaFunction>>>,
    stale: DashMap<String, Arc<LambdaFunction>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl ElasticPoolExecutor {
    /// Create an uninitialized pool
    pub fn new(provider: Arc<dyn ComputeProvider>, config: PoolConfig) -> Self {
        Self {
            config,
            provider,
            token: CancellationToken::new(),
            initialized: AtomicBool::new(false),
            active: RwLock::new(Vec::new()),
            stale: DashMap::new(),
            maintenance: Mutex::new(None),
        }
    }

    /// Pool settings
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether `init` completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Names of the active functions
    #[must_use]
    pub fn active_functions(&self) -> Vec<String> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Names of the retired functions not yet deleted
    #[must_use]
    pub fn stale_functions(&self) -> Vec<String> {
        self.stale.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Validate the configuration, create the initial pool and start the
    /// maintenance loop. Failing to create the initial pool is fatal.
    /// Calling it again after success does nothing.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        self.config.validate()?;
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Pool already initialized");
            return Ok(());
        }

        match self.add_functions(self.config.pool_size).await {
            Ok(names) => info!(functions = ?names, "Initialized function pool"),
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let pool = self.clone();
        let handle = tokio::spawn(async move { pool.maintenance_loop().await });
        *self.maintenance.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    async fn maintenance_loop(&self) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("Pool maintenance stopped");
                    return;
                }
                _ = tokio::time::sleep(self.config.maintain_every) => self.maintain().await,
            }
        }
    }

    async fn create_function(&self) -> Result<Arc<LambdaFunction>> {
        let name = random_function_name(&self.config.function_prefix);
        let handle = self.provider.create_function(&name).await?;
        let function = Arc::new(LambdaFunction::new(
            handle.name,
            handle.created_at,
            randomized_lifespan(self.config.lifespan),
        ));
        debug!(function = %function.name(), span_secs = function.span().as_secs(), "Created function");
        Ok(function)
    }

    /// Create one function and add it to the active list
    pub async fn add_function(&self) -> Result<String> {
        let function = self.create_function().await?;
        let name = function.name().to_string();
        self.active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(function);
        Ok(name)
    }

    /// Create `count` functions concurrently.
    ///
    /// The batch only becomes active once every creation succeeded. On any
    /// failure the functions created by this call are deleted again; none of
    /// them was ever visible to `execute`, so none can hold a pending job.
    pub async fn add_functions(&self, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let results = join_all((0..count).map(|_| self.create_function())).await;
        let mut created = Vec::with_capacity(count);
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(function) => created.push(function),
                Err(e) => errors.push(e),
            }
        }
        let names: Vec<String> = created.iter().map(|f| f.name().to_string()).collect();
        if errors.is_empty() {
            self.active
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .extend(created);
            return Ok(names);
        }

        warn!(
            failed = errors.len(),
            requested = count,
            "Function creation failed, rolling back batch"
        );
        self.delete_functions(&names).await;

        Err(Error::PoolCreation {
            failed: errors.len(),
            requested: count,
            cause: errors[0].to_string(),
        })
    }

    async fn delete_functions(&self, names: &[String]) {
        let results = join_all(names.iter().map(|name| self.provider.delete_function(name))).await;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(()) => info!(function = %name, "Deleted function"),
                Err(e) => error!(function = %name, error = %e, "Failed to delete function"),
            }
        }
    }

    /// Move every active function past its lifespan to the stale set.
    /// Returns the number moved.
    pub fn mark_stale_functions(&self) -> usize {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        let mut moved = 0;
        active.retain(|f| {
            if !f.is_stale() {
                return true;
            }
            f.retire();
            self.stale.insert(f.name().to_string(), f.clone());
            moved += 1;
            false
        });
        if moved > 0 {
            debug!(moved, "Retired stale functions");
        }
        moved
    }

    /// Create functions until the active list is back at its target size
    pub async fn fill_pool(&self) -> Result<Vec<String>> {
        let missing = {
            let active = self.active.read().unwrap_or_else(|e| e.into_inner());
            self.config.pool_size.saturating_sub(active.len())
        };
        let names = self.add_functions(missing).await?;
        for name in &names {
            info!(function = %name, "Refilled function");
        }
        Ok(names)
    }

    /// Delete every retired function with no pending jobs. Returns the
    /// names removed from the stale set.
    pub async fn delete_removable_functions(&self) -> Vec<String> {
        let candidates: Vec<String> = self
            .stale
            .iter()
            .filter(|entry| entry.value().is_removable())
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<String> = candidates
            .into_iter()
            .filter(|name| self.stale.remove_if(name, |_, f| f.is_removable()).is_some())
            .collect();
        self.delete_functions(&removed).await;
        removed
    }

    /// One maintenance tick: retire, refill, delete
    pub async fn maintain(&self) {
        debug!("Starting pool maintenance");
        self.mark_stale_functions();
        if let Err(e) = self.fill_pool().await {
            error!(error = %e, "Failed to refill function pool");
        }
        self.delete_removable_functions().await;
    }

    /// Pick an active function uniformly at random and register `job_id` on
    /// it before returning it
    pub fn get_random_active_function(&self, job_id: &str) -> Option<Arc<LambdaFunction>> {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        let function = active.choose(&mut rand::thread_rng())?.clone();
        // Registered while the pool lock is held, so it cannot be retired and
        // deleted in between
        function.add_pending_job(job_id);
        Some(function)
    }

    async fn acquire(&self, token: &CancellationToken, job_id: &str) -> Result<Arc<LambdaFunction>> {
        loop {
            if let Some(function) = self.get_random_active_function(job_id) {
                return Ok(function);
            }
            debug!(job_id = %job_id, "No active function, retrying");
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.config.acquire_retry_interval) => {}
            }
        }
    }

    async fn invoke(&self, function: &LambdaFunction, bundle: &TaskBundle) -> Result<TaskBundle> {
        self.provider.wait_until_active(function.name()).await?;
        let response = self
            .provider
            .invoke(function.name(), bundle.encode()?)
            .await?;
        TaskBundle::decode(&response)
    }
}

#[async_trait::async_trait]
impl Executor for ElasticPoolExecutor {
    /// Run `bundle` on a pool function. Waits for a function as long as
    /// `token` allows.
    async fn execute(&self, token: CancellationToken, bundle: TaskBundle) -> Result<TaskBundle> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let function = self.acquire(&token, &bundle.job_id).await?;
        let _guard = PendingJobGuard {
            function: function.clone(),
            job_id: bundle.job_id.clone(),
        };
        debug!(job_id = %bundle.job_id, function = %function.name(), "Invoking function");

        tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.invoke(&function, &bundle) => result,
        }
    }

    /// Stop maintenance, retire every function and delete each one once its
    /// jobs finish. Functions still busy after the drain timeout are deleted
    /// anyway.
    async fn shutdown(&self) {
        self.token.cancel();
        let handle = self
            .maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Pool maintenance task failed");
            }
        }

        {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            for function in active.drain(..) {
                function.retire();
                self.stale.insert(function.name().to_string(), function);
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        while !self.stale.is_empty() {
            self.delete_removable_functions().await;
            if self.stale.is_empty() || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.stale_functions();
        if !remaining.is_empty() {
            warn!(functions = ?remaining, "Drain timeout exceeded, deleting busy functions");
            for name in &remaining {
                self.stale.remove(name);
            }
            self.delete_functions(&remaining).await;
        }

        self.initialized.store(false, Ordering::SeqCst);
        info!("Function pool shut down");
    }
}
