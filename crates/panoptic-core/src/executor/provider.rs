//! Remote compute providers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::local::CollectorRegistry;
use crate::error::{Error, Result};
use crate::protocol::TaskBundle;

/// A function as reported by the provider after creation
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionHandle {
    /// Function name
    pub name: String,
    /// Creation time on the provider
    pub created_at: DateTime<Utc>,
}

/// Platform that hosts ephemeral compute functions.
///
/// Payloads are opaque bytes; the pool sends encoded task bundles and
/// expects encoded task bundles back.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Create a function called `name`
    async fn create_function(&self, name: &str) -> Result<FunctionHandle>;

    /// Delete a function
    async fn delete_function(&self, name: &str) -> Result<()>;

    /// Call a function with `payload` and return its response
    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<Vec<u8>>;

    /// Wait until a function can be invoked
    async fn wait_until_active(&self, name: &str) -> Result<()>;
}

/// Provider whose functions run inside this process through a
/// [`CollectorRegistry`]. Useful for development and tests.
#[derive(Debug)]
pub struct LocalProvider {
    registry: Arc<CollectorRegistry>,
    functions: DashMap<String, FunctionHandle>,
}

impl LocalProvider {
    /// Create a provider running bundles through `registry`
    #[must_use]
    pub fn new(registry: Arc<CollectorRegistry>) -> Self {
        Self {
            registry,
            functions: DashMap::new(),
        }
    }

    /// Number of existing functions
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    fn ensure_exists(&self, name: &str) -> Result<()> {
        if self.functions.contains_key(name) {
            Ok(())
        } else {
            Err(Error::Provider(format!("function {} not found", name)))
        }
    }
}

#[async_trait::async_trait]
impl ComputeProvider for LocalProvider {
    async fn create_function(&self, name: &str) -> Result<FunctionHandle> {
        let handle = FunctionHandle {
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.functions.insert(name.to_string(), handle.clone());
        debug!(function = %name, "Created local function");
        Ok(handle)
    }

    async fn delete_function(&self, name: &str) -> Result<()> {
        self.functions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::Provider(format!("function {} not found", name)))
    }

    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.ensure_exists(name)?;
        let bundle = TaskBundle::decode(&payload)?;
        self.registry.run_bundle(bundle).await.encode()
    }

    async fn wait_until_active(&self, name: &str) -> Result<()> {
        self.ensure_exists(name)
    }
}

/// Random function name
pub fn random_function_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}
