use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::message::{Message, Subscription};
use crate::error::{Error, Result};

/// Default number of deliveries before a nacked message is dropped
pub const DEFAULT_MAX_DELIVERIES: u32 = 16;

/// In-process topic bus.
///
/// Every subscriber owns an unbounded queue, so a slow subscriber never
/// loses messages and never blocks the publisher. Cloning the bus is cheap
/// and all clones share the same topics.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    topics: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>,
    closed: CancellationToken,
    max_deliveries: u32,
}

impl EventBus {
    /// Create an open bus
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_deliveries(DEFAULT_MAX_DELIVERIES)
    }

    /// Create an open bus whose messages may be delivered at most
    /// `max_deliveries` times (at least once)
    #[must_use]
    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                closed: CancellationToken::new(),
                max_deliveries: max_deliveries.max(1),
            }),
        }
    }

    /// Subscribe to `topic`. The subscription ends when `token` is cancelled
    /// or the bus is closed.
    pub fn subscribe(&self, token: CancellationToken, topic: &str) -> Result<Subscription> {
        if self.is_closed() {
            return Err(Error::EventBusClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .topics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        debug!(topic = %topic, "Subscribed");
        Ok(Subscription::new(
            topic.to_string(),
            rx,
            token,
            self.inner.closed.clone(),
        ))
    }

    /// Publish `payload` to every live subscriber of `topic`.
    ///
    /// Returns the number of subscribers that received it. Publishing to a
    /// topic nobody listens on is not an error.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::EventBusClosed);
        }
        let id = Uuid::new_v4();
        let topic_name: Arc<str> = Arc::from(topic);
        let payload: Arc<[u8]> = Arc::from(payload.into());

        let mut delivered = 0;
        let mut stale = false;
        {
            let topics = self.inner.topics.read().unwrap_or_else(|e| e.into_inner());
            if let Some(senders) = topics.get(topic) {
                for tx in senders {
                    let msg = Message::new(
                        id,
                        topic_name.clone(),
                        payload.clone(),
                        self.inner.max_deliveries,
                        tx.clone(),
                    );
                    if tx.send(msg).is_ok() {
                        delivered += 1;
                    } else {
                        stale = true;
                    }
                }
            }
        }

        if stale {
            self.prune(topic);
        }
        Ok(delivered)
    }

    /// Number of live subscribers on `topic`
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Stop accepting publishes and end every subscription
    pub fn close(&self) {
        self.inner.closed.cancel();
        self.inner
            .topics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        debug!("Event bus closed");
    }

    /// Whether [`close`](Self::close) was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    fn prune(&self, topic: &str) {
        let mut topics = self.inner.topics.write().unwrap_or_else(|e| e.into_inner());
        if let Some(senders) = topics.get_mut(topic) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
