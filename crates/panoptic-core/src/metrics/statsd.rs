use std::net::UdpSocket;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::MetricsSink;
use crate::error::{Error, Result};

/// DogStatsD agent settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsdConfig {
    /// Agent address, `host:port`
    pub address: String,
    /// Prepended to every metric name, e.g. `"crawler."`
    pub prefix: String,
    /// Tags added to every metric
    pub global_tags: Vec<String>,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8125".to_string(),
            prefix: String::new(),
            global_tags: Vec::new(),
        }
    }
}

/// Fire-and-forget DogStatsD client.
///
/// Each call sends one datagram: `name:value|type|#tag1,tag2`.
#[derive(Debug)]
pub struct StatsdMetrics {
    socket: UdpSocket,
    config: StatsdConfig,
}

impl StatsdMetrics {
    /// Bind an ephemeral local socket and connect it to the agent
    pub fn connect(config: StatsdConfig) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| Error::Metrics(format!("failed to create UDP socket: {}", e)))?;
        socket.connect(&config.address).map_err(|e| {
            Error::Metrics(format!("failed to resolve agent {}: {}", config.address, e))
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::Metrics(format!("failed to configure UDP socket: {}", e)))?;
        debug!(address = %config.address, "Connected to statsd agent");
        Ok(Self { socket, config })
    }

    fn line(&self, name: &str, value: &str, kind: &str, tags: &[String]) -> String {
        let mut line = format!("{}{}:{}|{}", self.config.prefix, name, value, kind);
        let all: Vec<&str> = self
            .config
            .global_tags
            .iter()
            .chain(tags.iter())
            .map(String::as_str)
            .collect();
        if !all.is_empty() {
            line.push_str("|#");
            line.push_str(&all.join(","));
        }
        line
    }

    fn send(&self, line: String) -> Result<()> {
        self.socket
            .send(line.as_bytes())
            .map_err(|e| Error::Metrics(format!("failed to send metric: {}", e)))?;
        Ok(())
    }
}

impl MetricsSink for StatsdMetrics {
    fn incr_counter(&self, name: &str, tags: &[String]) -> Result<()> {
        self.send(self.line(name, "1", "c", tags))
    }

    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<()> {
        self.send(self.line(name, &value.to_string(), "c", tags))
    }

    fn distribution(&self, name: &str, value: f64, tags: &[String]) -> Result<()> {
        self.send(self.line(name, &value.to_string(), "d", tags))
    }
}
