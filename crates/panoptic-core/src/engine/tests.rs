use super::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Fails `failures` times, then returns Ok
struct FlakyModule {
    failures: u32,
    runs: AtomicU32,
}

#[async_trait::async_trait]
impl Module for FlakyModule {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn run(&self, _token: CancellationToken) -> Result<()> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if run <= self.failures {
            Err(Error::Execution(format!("failure {}", run)))
        } else {
            Ok(())
        }
    }
}

/// Waits for cancellation and records its shutdown hook
#[derive(Default)]
struct IdleModule {
    shut_down: AtomicBool,
}

#[async_trait::async_trait]
impl Module for IdleModule {
    fn name(&self) -> &str {
        "idle"
    }

    async fn run(&self, token: CancellationToken) -> Result<()> {
        token.cancelled().await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Always fails with a configuration error
struct MisconfiguredModule;

#[async_trait::async_trait]
impl Module for MisconfiguredModule {
    fn name(&self) -> &str {
        "misconfigured"
    }

    async fn run(&self, _token: CancellationToken) -> Result<()> {
        Err(Error::invalid_config("jobs", "empty"))
    }
}

fn fast_restart() -> RestartPolicy {
    RestartPolicy::Fixed { delay_ms: 5 }
}

#[test]
fn test_fixed_restart_policy() {
    let policy = RestartPolicy::default();
    assert_eq!(policy.delay_for(1), Duration::from_secs(3));
    assert_eq!(policy.delay_for(10), Duration::from_secs(3));
}

#[test]
fn test_backoff_restart_policy() {
    let policy = RestartPolicy::Backoff {
        initial_ms: 100,
        max_ms: 1000,
        multiplier: 2.0,
    };
    assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    assert_eq!(policy.delay_for(10), Duration::from_millis(1000));
}

#[tokio::test]
async fn test_supervisor_restarts_until_ok() {
    let module = Arc::new(FlakyModule {
        failures: 3,
        runs: AtomicU32::new(0),
    });

    run_with_graceful_restart(module.clone(), CancellationToken::new(), fast_restart())
        .await
        .unwrap();

    assert_eq!(module.runs.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_supervisor_stops_on_cancel() {
    let module = Arc::new(FlakyModule {
        failures: u32::MAX,
        runs: AtomicU32::new(0),
    });
    let token = CancellationToken::new();
    let handle = tokio::spawn(run_with_graceful_restart(
        module.clone(),
        token.clone(),
        RestartPolicy::Fixed { delay_ms: 60_000 },
    ));

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(module.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_supervisor_does_not_restart_config_errors() {
    let result = run_with_graceful_restart(
        Arc::new(MisconfiguredModule),
        CancellationToken::new(),
        fast_restart(),
    )
    .await;

    assert!(result.unwrap_err().is_config_error());
}

#[tokio::test]
async fn test_engine_shutdown() {
    let bus = EventBus::new();
    let idle = Arc::new(IdleModule::default());
    let engine = Arc::new(
        Engine::new(bus.clone(), EngineConfig::default().with_restart_policy(fast_restart()))
            .with_module(idle.clone()),
    );
    assert_eq!(engine.phase(), ShutdownPhase::Running);

    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .unwrap()
        .unwrap();

    assert!(result.is_ok());
    assert_eq!(engine.phase(), ShutdownPhase::Terminated);
    assert!(idle.shut_down.load(Ordering::SeqCst));
    assert!(bus.is_closed());

    // Second call is a no-op
    engine.shutdown().await;
    assert_eq!(engine.phase(), ShutdownPhase::Terminated);
}

#[tokio::test]
async fn test_engine_run_returns_fatal_error_and_cancels_others() {
    let idle = Arc::new(IdleModule::default());
    let engine = Engine::new(
        EventBus::new(),
        EngineConfig::default().with_restart_policy(fast_restart()),
    )
    .with_module(idle)
    .with_module(Arc::new(MisconfiguredModule));

    let result = tokio::time::timeout(Duration::from_secs(1), engine.run())
        .await
        .unwrap();

    assert!(result.unwrap_err().is_config_error());
}
