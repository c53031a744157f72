use super::*;
use crate::protocol::{JobSpec, Schedule, SubSource};
use crate::scheduler::merge::InMemoryTargetStore;
use std::sync::atomic::{AtomicU32, Ordering};

/// Config source whose contents tests can swap
#[derive(Default)]
struct StaticSource {
    specs: Mutex<Vec<JobSpec>>,
    loads: AtomicU32,
}

impl StaticSource {
    fn new(specs: Vec<JobSpec>) -> Arc<Self> {
        Arc::new(Self {
            specs: Mutex::new(specs),
            loads: AtomicU32::new(0),
        })
    }

    fn set(&self, specs: Vec<JobSpec>) {
        *self.specs.lock().unwrap() = specs;
    }
}

#[async_trait::async_trait]
impl ConfigSource for StaticSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn load_configs(&self) -> Result<Vec<JobSpec>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.specs.lock().unwrap().clone())
    }
}

/// Records the name of every dispatched job
#[derive(Default)]
struct RecordingDoer {
    done: Mutex<Vec<String>>,
}

impl RecordingDoer {
    fn count(&self, name: &str) -> usize {
        self.done.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

#[async_trait::async_trait]
impl JobDoer for RecordingDoer {
    async fn do_job(&self, job: &SchedulerJob) -> Result<()> {
        self.done.lock().unwrap().push(job.name().to_string());
        Ok(())
    }
}

fn spec(name: &str, interval_ms: u64) -> JobSpec {
    JobSpec::new(name, "noop", "src", Duration::from_millis(interval_ms))
}

fn scheduler(source: Arc<StaticSource>, doer: Arc<RecordingDoer>) -> Scheduler {
    Scheduler::new(
        SchedulerConfig::new().with_poll_interval(Duration::from_millis(20)),
        source,
        doer,
    )
}

fn jobs(specs: &[JobSpec], parent: &CancellationToken) -> Vec<SchedulerJob> {
    specs
        .iter()
        .flat_map(|s| SchedulerJob::split(s, parent))
        .collect()
}

fn live_names(scheduler: &Scheduler) -> Vec<String> {
    scheduler
        .jobs()
        .iter()
        .map(|j| j.name().to_string())
        .collect()
}

#[test]
fn test_validate_jobs() {
    let parent = CancellationToken::new();
    assert!(validate_jobs(&jobs(&[spec("a", 10), spec("b", 10)], &parent)).is_ok());

    let err = validate_jobs(&jobs(&[spec("a", 10), spec("a", 20)], &parent)).unwrap_err();
    assert!(matches!(err, Error::DuplicateJobName(name) if name == "a"));

    let err = validate_jobs(&jobs(&[spec("zero", 0)], &parent)).unwrap_err();
    assert!(err.is_config_error());

    let mut unknown = spec("cron", 10);
    unknown.task_schedule.schedule = Schedule::Unknown;
    let err = validate_jobs(&jobs(&[unknown], &parent)).unwrap_err();
    assert!(matches!(err, Error::UnknownScheduleKind { .. }));
}

#[test]
fn test_validate_catches_split_collisions() {
    let parent = CancellationToken::new();
    let split = spec("a", 10)
        .with_sub_sources(vec![SubSource::named("x"), SubSource::named("y")])
        .with_max_sub_sources_per_task(1);
    assert!(validate_jobs(&jobs(&[split, spec("a-0", 10)], &parent)).is_err());
}

#[test]
fn test_upsert_jobs() {
    let parent = CancellationToken::new();
    let scheduler = scheduler(StaticSource::new(vec![]), Arc::new(RecordingDoer::default()));
    scheduler.upsert_jobs(jobs(&[spec("A", 1000), spec("B", 1000), spec("C", 1000)], &parent));
    assert_eq!(live_names(&scheduler), vec!["A", "B", "C"]);

    let a = scheduler.job("A").unwrap();
    let b = scheduler.job("B").unwrap();
    a.update_last_and_next_time().unwrap();
    a.increment_run_count();
    let last = a.last_run();
    let next = a.next_run();

    scheduler.upsert_jobs(jobs(&[spec("A", 5000), spec("C", 1000)], &parent));

    assert_eq!(live_names(&scheduler), vec!["A", "C"]);
    assert!(b.token().is_cancelled());

    let a = scheduler.job("A").unwrap();
    assert_eq!(a.calculate_interval().unwrap(), Duration::from_secs(5));
    assert_eq!(a.last_run(), last);
    assert_eq!(a.next_run(), next);
    assert_eq!(a.run_count(), 1);
}

#[test]
fn test_upsert_appends_new_jobs() {
    let parent = CancellationToken::new();
    let scheduler = scheduler(StaticSource::new(vec![]), Arc::new(RecordingDoer::default()));
    scheduler.upsert_jobs(jobs(&[spec("A", 1000)], &parent));
    scheduler.upsert_jobs(jobs(&[spec("A", 1000), spec("D", 1000)], &parent));

    assert_eq!(live_names(&scheduler), vec!["A", "D"]);
    assert!(!scheduler.job("D").unwrap().has_run_before());
}

#[tokio::test]
async fn test_reload_skips_unchanged_config() {
    let source = StaticSource::new(vec![spec("A", 1000)]);
    let scheduler = scheduler(source.clone(), Arc::new(RecordingDoer::default()));
    let token = CancellationToken::new();

    assert!(scheduler.reload(&token).await.unwrap());
    let digest = scheduler.config_digest().unwrap();
    assert!(!scheduler.reload(&token).await.unwrap());
    assert_eq!(scheduler.config_digest().unwrap(), digest);

    source.set(vec![spec("A", 2000)]);
    assert!(scheduler.reload(&token).await.unwrap());
    assert_ne!(scheduler.config_digest().unwrap(), digest);
}

#[tokio::test]
async fn test_reload_rejects_duplicates_without_touching_live_jobs() {
    let source = StaticSource::new(vec![spec("A", 1000)]);
    let scheduler = scheduler(source.clone(), Arc::new(RecordingDoer::default()));
    let token = CancellationToken::new();
    scheduler.reload(&token).await.unwrap();

    source.set(vec![spec("B", 1000), spec("B", 1000)]);
    assert!(scheduler.reload(&token).await.is_err());
    assert_eq!(live_names(&scheduler), vec!["A"]);
}

#[tokio::test]
async fn test_reload_merges_stored_sub_sources() {
    let mut accepting = spec("A", 1000);
    accepting.task_params.accept_dynamic_sub_sources = true;
    let store = Arc::new(InMemoryTargetStore::new());
    store.insert("src", SubSource::named("stored"), false);

    let scheduler = scheduler(
        StaticSource::new(vec![accepting]),
        Arc::new(RecordingDoer::default()),
    )
    .with_target_store(store);
    scheduler.reload(&CancellationToken::new()).await.unwrap();

    let spec = scheduler.job("A").unwrap().spec();
    assert_eq!(spec.task_params.sub_sources[0].name, "stored");
}

#[tokio::test]
async fn test_run_fails_fast_on_bad_config() {
    let source = StaticSource::new(vec![spec("A", 10), spec("A", 10)]);
    let doer = Arc::new(RecordingDoer::default());
    let scheduler = scheduler(source, doer.clone());

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        scheduler.run(CancellationToken::new()),
    )
    .await
    .unwrap();

    assert!(result.unwrap_err().is_config_error());
    assert!(scheduler.jobs().is_empty());
    assert!(doer.done.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_run_dispatches_due_jobs() {
    let source = StaticSource::new(vec![
        spec("fast", 30).with_start_immediately(true),
        spec("slow", 60_000),
    ]);
    let doer = Arc::new(RecordingDoer::default());
    let scheduler = Arc::new(scheduler(source, doer.clone()));
    let token = CancellationToken::new();

    let runner = tokio::spawn({
        let scheduler = scheduler.clone();
        let token = token.clone();
        async move { scheduler.run(token).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let fast_runs = doer.count("fast");
    assert!(fast_runs >= 3, "fast ran {} times", fast_runs);
    assert_eq!(doer.count("slow"), 0);
    assert_eq!(scheduler.job("fast").unwrap().run_count(), fast_runs as u64);
}

#[tokio::test]
async fn test_hot_reload_keeps_cadence() {
    let source = StaticSource::new(vec![spec("A", 40).with_start_immediately(true)]);
    let doer = Arc::new(RecordingDoer::default());
    let scheduler = Arc::new(scheduler(source.clone(), doer.clone()));
    let token = CancellationToken::new();

    let runner = tokio::spawn({
        let scheduler = scheduler.clone();
        let token = token.clone();
        async move { scheduler.run(token).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = scheduler.job("A").unwrap().run_count();
    assert!(before >= 1);

    source.set(vec![
        spec("A", 40).with_start_immediately(true).with_dry_run(true),
        spec("B", 60_000),
    ]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let job = scheduler.job("A").unwrap();
    assert!(job.spec().dry_run);
    assert!(job.run_count() >= before);
    assert_eq!(live_names(&scheduler), vec!["A", "B"]);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_cancels_jobs() {
    let scheduler = scheduler(
        StaticSource::new(vec![spec("A", 1000), spec("B", 1000)]),
        Arc::new(RecordingDoer::default()),
    );
    scheduler.reload(&CancellationToken::new()).await.unwrap();

    scheduler.shutdown().await;
    assert!(scheduler.jobs().iter().all(|j| j.token().is_cancelled()));
}
