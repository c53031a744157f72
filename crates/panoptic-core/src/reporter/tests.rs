use super::*;
use crate::metrics::{InMemoryMetrics, MockMetricsSink};
use crate::protocol::{JobSpec, ResultState};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

fn executed_bundle() -> TaskBundle {
    let spec = JobSpec::new("jinshi", "jinshi", "src", Duration::from_secs(30));
    let mut bundle = TaskBundle::from_spec(&spec, false);
    let meta = &mut bundle.tasks[0].metadata;
    let start = Utc::now();
    meta.result_state = ResultState::Success;
    meta.total_collected = 12;
    meta.total_failed = 2;
    meta.ip_addr = Some("10.0.0.7".to_string());
    meta.started_at = Some(start);
    meta.finished_at = Some(start + ChronoDuration::milliseconds(1500));
    bundle
}

fn expected_tags() -> Vec<String> {
    vec![
        "config:jinshi".to_string(),
        "collector:jinshi".to_string(),
        "ip:10.0.0.7".to_string(),
        "state:success".to_string(),
    ]
}

fn reporter(sink: Arc<dyn MetricsSink>) -> Reporter {
    Reporter::new(ReporterConfig::default(), EventBus::new(), sink)
}

#[test]
fn test_report_emits_task_metrics() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let failed = reporter(metrics.clone()).report(&executed_bundle());

    assert_eq!(failed, 0);
    let tags = expected_tags();
    assert_eq!(metrics.counter(TASK_STATE_COUNTER, &tags).get(), 1);
    assert_eq!(metrics.counter(TASK_COLLECTED_COUNT, &tags).get(), 12);
    assert_eq!(metrics.counter(TASK_FAILED_COUNT, &tags).get(), 2);
    let duration = metrics.histogram(TASK_DURATION_MS, &tags);
    assert_eq!(duration.count(), 1);
    assert_eq!(duration.sum(), 1500.0);
}

#[test]
fn test_report_without_timestamps_or_ip() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let mut bundle = executed_bundle();
    bundle.tasks[0].metadata.started_at = None;
    bundle.tasks[0].metadata.ip_addr = None;

    reporter(metrics.clone()).report(&bundle);

    let tags = vec![
        "config:jinshi".to_string(),
        "collector:jinshi".to_string(),
        "ip:unknown".to_string(),
        "state:success".to_string(),
    ];
    assert_eq!(metrics.counter(TASK_STATE_COUNTER, &tags).get(), 1);
    assert_eq!(metrics.histogram(TASK_DURATION_MS, &tags).count(), 0);
}

#[test]
fn test_send_failures_do_not_stop_reporting() {
    let mut sink = MockMetricsSink::new();
    sink.expect_incr_counter()
        .times(1)
        .returning(|_, _| Err(Error::Metrics("agent unreachable".to_string())));
    sink.expect_count().times(2).returning(|_, _, _| Ok(()));
    sink.expect_distribution()
        .times(1)
        .returning(|_, _, _| Err(Error::Metrics("agent unreachable".to_string())));

    let failed = reporter(Arc::new(sink)).report(&executed_bundle());
    assert_eq!(failed, 2);
}

#[tokio::test]
async fn test_run_reports_executed_bundles() {
    let bus = EventBus::new();
    let metrics = Arc::new(InMemoryMetrics::new());
    let reporter = Arc::new(Reporter::new(
        ReporterConfig::default(),
        bus.clone(),
        metrics.clone(),
    ));
    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let reporter = reporter.clone();
        let token = token.clone();
        async move { reporter.run(token).await }
    });
    while bus.subscriber_count(TOPIC_EXECUTED_JOB) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    bus.publish(TOPIC_EXECUTED_JOB, b"garbage".to_vec()).unwrap();
    bus.publish(TOPIC_EXECUTED_JOB, executed_bundle().encode().unwrap())
        .unwrap();
    bus.publish(TOPIC_EXECUTED_JOB, executed_bundle().encode().unwrap())
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while metrics.counter_total(TASK_STATE_COUNTER) < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(metrics.counter_total(TASK_COLLECTED_COUNT), 24);

    token.cancel();
    assert!(handle.await.unwrap().is_ok());
}
