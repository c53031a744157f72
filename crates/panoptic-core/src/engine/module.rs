use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A long-running component managed by the [`Engine`](super::Engine).
///
/// `run` should return `Ok(())` once `token` is cancelled. Returning an error
/// asks the supervisor to restart the module after the restart delay, unless
/// the error is a configuration error.
#[async_trait::async_trait]
pub trait Module: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Run until cancelled or failed
    async fn run(&self, token: CancellationToken) -> Result<()>;

    /// Release resources. Called once during engine shutdown, after the run
    /// token is cancelled.
    async fn shutdown(&self) {}
}
