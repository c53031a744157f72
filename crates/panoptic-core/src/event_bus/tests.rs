use super::*;
use crate::error::Error;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_publish_subscribe() {
    let bus = EventBus::new();
    let mut sub = bus
        .subscribe(CancellationToken::new(), TOPIC_PENDING_JOB)
        .unwrap();

    let count = bus.publish(TOPIC_PENDING_JOB, b"hello".to_vec()).unwrap();
    assert_eq!(count, 1);

    let msg = sub.recv().await.unwrap();
    assert_eq!(msg.topic(), TOPIC_PENDING_JOB);
    assert_eq!(msg.payload(), b"hello");
    assert_eq!(msg.delivery(), 1);
}

#[tokio::test]
async fn test_multiple_subscribers_share_message_id() {
    let bus = EventBus::new();
    let token = CancellationToken::new();
    let mut sub1 = bus.subscribe(token.clone(), TOPIC_EXECUTED_JOB).unwrap();
    let mut sub2 = bus.subscribe(token, TOPIC_EXECUTED_JOB).unwrap();
    assert_eq!(bus.subscriber_count(TOPIC_EXECUTED_JOB), 2);

    assert_eq!(bus.publish(TOPIC_EXECUTED_JOB, b"x".to_vec()).unwrap(), 2);

    let m1 = sub1.recv().await.unwrap();
    let m2 = sub2.recv().await.unwrap();
    assert_eq!(m1.id(), m2.id());
}

#[tokio::test]
async fn test_topics_are_isolated() {
    let bus = EventBus::new();
    let mut pending = bus
        .subscribe(CancellationToken::new(), TOPIC_PENDING_JOB)
        .unwrap();

    assert_eq!(bus.publish(TOPIC_EXECUTED_JOB, b"x".to_vec()).unwrap(), 0);
    assert_eq!(bus.publish(TOPIC_PENDING_JOB, b"y".to_vec()).unwrap(), 1);

    let msg = pending.recv().await.unwrap();
    assert_eq!(msg.payload(), b"y");
}

#[tokio::test]
async fn test_nack_redelivers() {
    let bus = EventBus::new();
    let mut sub = bus
        .subscribe(CancellationToken::new(), TOPIC_PENDING_JOB)
        .unwrap();
    bus.publish(TOPIC_PENDING_JOB, b"retry me".to_vec()).unwrap();

    let first = sub.recv().await.unwrap();
    let id = first.id();
    assert!(first.nack());

    let second = sub.recv().await.unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(second.delivery(), 2);
    assert_eq!(second.payload(), b"retry me");

    second.ack();
    assert!(second.is_acked());
    assert!(!second.nack());
}

#[tokio::test]
async fn test_nack_stops_after_max_deliveries() {
    let bus = EventBus::with_max_deliveries(2);
    let mut sub = bus
        .subscribe(CancellationToken::new(), TOPIC_PENDING_JOB)
        .unwrap();
    bus.publish(TOPIC_PENDING_JOB, b"x".to_vec()).unwrap();

    let first = sub.recv().await.unwrap();
    assert!(first.nack());
    let second = sub.recv().await.unwrap();
    assert!(!second.nack());
}

#[tokio::test]
async fn test_cancelled_subscription_ends() {
    let bus = EventBus::new();
    let token = CancellationToken::new();
    let mut sub = bus.subscribe(token.clone(), TOPIC_PENDING_JOB).unwrap();

    token.cancel();
    let next = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap();
    assert!(next.is_none());
    assert!(sub.is_cancelled());
}

#[tokio::test]
async fn test_close_ends_subscriptions_and_rejects_publish() {
    let bus = EventBus::new();
    let mut sub = bus
        .subscribe(CancellationToken::new(), TOPIC_PENDING_JOB)
        .unwrap();

    bus.close();
    assert!(bus.is_closed());
    assert!(sub.recv().await.is_none());
    assert!(!sub.is_cancelled());

    assert!(matches!(
        bus.publish(TOPIC_PENDING_JOB, b"x".to_vec()),
        Err(Error::EventBusClosed)
    ));
    assert!(matches!(
        bus.subscribe(CancellationToken::new(), TOPIC_PENDING_JOB),
        Err(Error::EventBusClosed)
    ));
}

#[tokio::test]
async fn test_dropped_subscriber_is_pruned() {
    let bus = EventBus::new();
    let sub = bus
        .subscribe(CancellationToken::new(), TOPIC_PENDING_JOB)
        .unwrap();
    drop(sub);

    assert_eq!(bus.subscriber_count(TOPIC_PENDING_JOB), 0);
    assert_eq!(bus.publish(TOPIC_PENDING_JOB, b"x".to_vec()).unwrap(), 0);
}
