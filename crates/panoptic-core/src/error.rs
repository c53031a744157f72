//! Error types for panoptic-core
//!
//! Errors fall into three groups: configuration errors that must stop the
//! scheduler before anything runs, transient infrastructure errors that the
//! runtime recovers from (module restart, pool rollback), and per-task
//! failures that are logged and dropped.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Two jobs resolved to the same name
    #[error("duplicate scheduler job name: {0}")]
    DuplicateJobName(String),

    /// Schedule descriptor is not one we know how to run
    #[error("unknown schedule kind for job {job}")]
    UnknownScheduleKind {
        /// Job name
        job: String,
    },

    /// Job configuration could not be parsed
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload was written by a newer protocol version
    #[error("unsupported task bundle version {0}")]
    UnsupportedVersion(u32),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Event bus no longer accepts messages
    #[error("event bus is closed")]
    EventBusClosed,

    /// A subscription ended while its owner was still running
    #[error("subscription to {0} closed")]
    SubscriptionClosed(String),

    /// Remote compute provider failure
    #[error("provider error: {0}")]
    Provider(String),

    /// One or more pool members could not be created; the batch was rolled back
    #[error("failed to create {failed} of {requested} functions: {cause}")]
    PoolCreation {
        /// Number of failed creations
        failed: usize,
        /// Number of requested creations
        requested: usize,
        /// First failure
        cause: String,
    },

    /// Executor used before `init`
    #[error("executor is not initialized")]
    NotInitialized,

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Task execution failed
    #[error("execution error: {0}")]
    Execution(String),

    /// Metrics backend failure
    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::InvalidConfig`]
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error comes from bad configuration rather than
    /// infrastructure. Configuration errors must abort before scheduling.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig { .. }
                | Error::DuplicateJobName(_)
                | Error::UnknownScheduleKind { .. }
                | Error::ConfigParse(_)
        )
    }

    /// Whether retrying the same operation later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Http(_)
                | Error::Provider(_)
                | Error::PoolCreation { .. }
                | Error::SubscriptionClosed(_)
                | Error::Timeout(_)
        )
    }
}
