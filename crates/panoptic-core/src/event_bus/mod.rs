//! EventBus - topic-based publish/subscribe between engine modules.
//!
//! The scheduler publishes dispatched work on [`TOPIC_PENDING_JOB`], the
//! orchestrator republishes executed work on [`TOPIC_EXECUTED_JOB`], and the
//! reporter consumes it. Delivery is in-process and at-least-once for the
//! lifetime of the process: a nacked message is redelivered to the same
//! subscriber.

/// In-memory bus implementation.
pub mod bus;
/// Delivered message and subscription types.
pub mod message;

pub use bus::EventBus;
pub use message::{Message, Subscription};

/// Scheduled work awaiting execution
pub const TOPIC_PENDING_JOB: &str = "topic.pending_job";

/// Completed work awaiting reporting
pub const TOPIC_EXECUTED_JOB: &str = "topic.executed_job";

#[cfg(test)]
mod tests;
