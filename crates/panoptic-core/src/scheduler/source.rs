//! Job configuration sources

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::protocol::{JobConfigs, JobSpec};

/// Where job specs come from
#[async_trait::async_trait]
pub trait ConfigSource: Send + Sync {
    /// Human-readable location for logs
    fn describe(&self) -> String;

    /// Load the full job set
    async fn load_configs(&self) -> Result<Vec<JobSpec>>;
}

/// Reads a TOML job file from disk
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    /// Create a source for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl ConfigSource for FileConfigSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn load_configs(&self) -> Result<Vec<JobSpec>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let configs = JobConfigs::from_toml_str(&text)?;
        debug!(path = %self.path.display(), jobs = configs.jobs.len(), "Loaded job configs");
        Ok(configs.jobs)
    }
}

/// Fetches a TOML job file over HTTP, e.g. a raw file in a config repository
#[derive(Debug, Clone)]
pub struct HttpConfigSource {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpConfigSource {
    /// Create a source for `url`, sending `token` as a bearer token if set
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait::async_trait]
impl ConfigSource for HttpConfigSource {
    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }

    async fn load_configs(&self) -> Result<Vec<JobSpec>> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?.error_for_status()?;
        let text = response.text().await?;
        let configs = JobConfigs::from_toml_str(&text)?;
        debug!(url = %self.url, jobs = configs.jobs.len(), "Fetched job configs");
        Ok(configs.jobs)
    }
}

/// Inputs for choosing between the local and the remote job file
#[derive(Debug, Clone, Default)]
pub struct SourceSelection {
    /// Local TOML file
    pub local_path: PathBuf,
    /// Remote TOML URL
    pub remote_url: Option<String>,
    /// Bearer token for the remote URL
    pub remote_token: Option<String>,
    /// Always use the remote source
    pub force_remote_pull: bool,
    /// HTTP timeout for the remote source
    pub remote_timeout: Duration,
}

impl SourceSelection {
    /// Remote when forced or in production, local otherwise.
    ///
    /// Forcing remote without a URL is a configuration error. Production
    /// without a URL falls back to the local file.
    pub fn select(&self, environment: Environment) -> Result<Arc<dyn ConfigSource>> {
        let wants_remote = self.force_remote_pull || environment.is_production();
        match (&self.remote_url, wants_remote) {
            (Some(url), true) => Ok(Arc::new(HttpConfigSource::new(
                url.clone(),
                self.remote_token.clone(),
                self.remote_timeout,
            )?)),
            (None, true) if self.force_remote_pull => Err(Error::invalid_config(
                "scheduler.remote_url",
                "force_remote_pull is set but no remote URL is configured",
            )),
            (None, true) => {
                warn!(
                    path = %self.local_path.display(),
                    "No remote job config URL in production, using local file"
                );
                Ok(Arc::new(FileConfigSource::new(self.local_path.clone())))
            }
            (_, false) => Ok(Arc::new(FileConfigSource::new(self.local_path.clone()))),
        }
    }
}
