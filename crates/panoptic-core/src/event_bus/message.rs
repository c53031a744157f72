use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A message delivered to one subscriber
#[derive(Debug, Clone)]
pub struct Message {
    id: Uuid,
    topic: Arc<str>,
    payload: Arc<[u8]>,
    delivery: u32,
    max_deliveries: u32,
    acked: Arc<AtomicBool>,
    requeue: mpsc::UnboundedSender<Message>,
}

impl Message {
    pub(super) fn new(
        id: Uuid,
        topic: Arc<str>,
        payload: Arc<[u8]>,
        max_deliveries: u32,
        requeue: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id,
            topic,
            payload,
            delivery: 1,
            max_deliveries,
            acked: Arc::new(AtomicBool::new(false)),
            requeue,
        }
    }

    /// Message id, shared by every subscriber's copy
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Topic the message was published on
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Raw payload
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 1 for the first delivery, incremented on every redelivery
    #[must_use]
    pub fn delivery(&self) -> u32 {
        self.delivery
    }

    /// Confirm processing. Idempotent.
    pub fn ack(&self) {
        self.acked.store(true, Ordering::SeqCst);
    }

    /// Whether [`ack`](Self::ack) was called
    #[must_use]
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }

    /// Reject the message so it is delivered again to the same subscriber.
    ///
    /// Returns `false` if the message was already acked, has used up its
    /// deliveries, or the subscriber is gone.
    pub fn nack(self) -> bool {
        if self.is_acked() || self.delivery >= self.max_deliveries {
            return false;
        }
        let redelivery = Message {
            delivery: self.delivery + 1,
            acked: Arc::new(AtomicBool::new(false)),
            ..self.clone()
        };
        self.requeue.send(redelivery).is_ok()
    }
}

/// Stream of messages for one topic
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Message>,
    token: CancellationToken,
    bus_closed: CancellationToken,
}

impl Subscription {
    pub(super) fn new(
        topic: String,
        rx: mpsc::UnboundedReceiver<Message>,
        token: CancellationToken,
        bus_closed: CancellationToken,
    ) -> Self {
        Self {
            topic,
            rx,
            token,
            bus_closed,
        }
    }

    /// Topic this subscription listens on
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message. Returns `None` once the subscriber's token
    /// is cancelled or the bus is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            _ = self.bus_closed.cancelled() => None,
            msg = self.rx.recv() => msg,
        }
    }

    /// Whether the subscription ended because its owner cancelled it
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
