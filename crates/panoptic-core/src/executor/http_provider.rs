//! Generic REST compute provider
//!
//! Expects a control plane exposing:
//! - `POST   {base}/functions` with `{"name": ..., "image": ...}`
//! - `DELETE {base}/functions/{name}`
//! - `GET    {base}/functions/{name}` returning `{"name", "state", "created_at"}`
//! - `POST   {base}/functions/{name}/invoke` with the raw payload

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{ComputeProvider, FunctionHandle};
use crate::error::{Error, Result};

/// HTTP provider settings
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Control plane base URL
    pub base_url: String,
    /// Image or package functions are created from
    pub image: String,
    /// Bearer token
    pub api_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Upper bound for `wait_until_active`
    pub activation_timeout: Duration,
    /// Poll interval for `wait_until_active`
    pub activation_poll: Duration,
}

#[derive(Debug, Serialize)]
struct CreateFunctionRequest<'a> {
    name: &'a str,
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct FunctionDescription {
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// [`ComputeProvider`] speaking plain JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    /// Create a provider
    pub fn new(config: HttpProviderConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Provider(format!("provider returned {}: {}", status, body)))
    }

    async fn describe(&self, name: &str) -> Result<FunctionDescription> {
        let response = self
            .authorize(self.client.get(self.url(&format!("/functions/{}", name))))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait::async_trait]
impl ComputeProvider for HttpProvider {
    async fn create_function(&self, name: &str) -> Result<FunctionHandle> {
        let request = CreateFunctionRequest {
            name,
            image: &self.config.image,
        };
        let response = self
            .authorize(self.client.post(self.url("/functions")).json(&request))
            .send()
            .await?;
        let created: FunctionDescription = Self::check(response).await?.json().await?;
        debug!(function = %created.name, "Created function");
        Ok(FunctionHandle {
            name: created.name,
            created_at: created.created_at.unwrap_or_else(Utc::now),
        })
    }

    async fn delete_function(&self, name: &str) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.url(&format!("/functions/{}", name))))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let response = self
            .authorize(
                self.client
                    .post(self.url(&format!("/functions/{}/invoke", name)))
                    .body(payload),
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?.to_vec())
    }

    async fn wait_until_active(&self, name: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.activation_timeout;
        loop {
            let description = self.describe(name).await?;
            match description.state.as_str() {
                "active" => return Ok(()),
                "failed" => {
                    return Err(Error::Provider(format!("function {} failed to activate", name)))
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(self.config.activation_timeout));
            }
            tokio::time::sleep(self.config.activation_poll).await;
        }
    }
}
