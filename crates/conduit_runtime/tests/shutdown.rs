//! Shutdown sequencing.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conduit_component::{InputSpec, Ports};
use conduit_runtime::{
    Component, ComponentKind, Context, GraphBuilder, Offloaded, Phase, RuntimeConfig, Scheduler,
    ShutdownTimeout,
};

/// Offloads a sleep on every trigger and records resumes and cleanup.
struct Sleeper {
    nap: Duration,
    resumed: Arc<AtomicU32>,
    cleaned_up: Arc<AtomicBool>,
}

impl Component for Sleeper {
    fn kind(&self) -> ComponentKind {
        ComponentKind::EventDriven
    }

    fn ports(&self) -> Ports {
        Ports::new().input("go", InputSpec::latest("go").trigger())
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        let nap = self.nap;
        ctx.offload(move || {
            std::thread::sleep(nap);
            Ok(())
        });
        Ok(())
    }

    fn resume(&mut self, _ctx: &mut Context<'_>, offloaded: Offloaded) -> anyhow::Result<()> {
        offloaded.into_result::<()>()?;
        self.resumed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        self.cleaned_up.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Outcome {
    resumed: Arc<AtomicU32>,
    cleaned_up: Arc<AtomicBool>,
}

fn sleeper(nap: Duration) -> (Sleeper, Outcome) {
    let resumed = Arc::new(AtomicU32::new(0));
    let cleaned_up = Arc::new(AtomicBool::new(false));
    (
        Sleeper {
            nap,
            resumed: resumed.clone(),
            cleaned_up: cleaned_up.clone(),
        },
        Outcome {
            resumed,
            cleaned_up,
        },
    )
}

fn config(grace: Duration) -> RuntimeConfig {
    RuntimeConfig::default()
        .with_shutdown_grace(grace)
        .with_drain_quiet_period(Duration::from_millis(10))
        .with_metrics_interval(None)
}

#[tokio::test]
async fn test_slow_offload_is_abandoned_after_grace() {
    let (component, outcome) = sleeper(Duration::from_millis(300));
    let mut builder = GraphBuilder::new();
    builder.add(component).unwrap();
    let grace = Duration::from_millis(50);
    let scheduler = Scheduler::new(builder.build(), config(grace));

    let handle = scheduler.handle();
    handle.publish("go", ()).unwrap();
    handle.shutdown();
    let report = scheduler.run().await;

    assert_eq!(
        report.shutdown_timeout,
        Some(ShutdownTimeout { abandoned: 1, grace })
    );
    assert_eq!(outcome.resumed.load(Ordering::SeqCst), 0);
    assert!(outcome.cleaned_up.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_offload_finishing_within_grace_is_resumed() {
    let (component, outcome) = sleeper(Duration::from_millis(20));
    let mut builder = GraphBuilder::new();
    builder.add(component).unwrap();
    let scheduler = Scheduler::new(builder.build(), config(Duration::from_secs(2)));

    let handle = scheduler.handle();
    handle.publish("go", ()).unwrap();
    handle.shutdown();
    let report = scheduler.run().await;

    assert!(report.shutdown_timeout.is_none());
    assert_eq!(outcome.resumed.load(Ordering::SeqCst), 1);
    assert!(outcome.cleaned_up.load(Ordering::SeqCst));
    assert!(!report.has_error_occurred());
}

/// Forwards every value after stopping has begun, to show draining.
struct Relay;

impl Component for Relay {
    fn kind(&self) -> ComponentKind {
        ComponentKind::EventDriven
    }

    fn ports(&self) -> Ports {
        Ports::new()
            .input("in", InputSpec::buffer("a").trigger())
            .output("out", "b")
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        let values: Vec<u32> = ctx.values::<u32>("in")?.into_iter().copied().collect();
        for value in values {
            ctx.emit("out", value)?;
        }
        Ok(())
    }
}

struct Count {
    count: Arc<AtomicU32>,
}

impl Component for Count {
    fn kind(&self) -> ComponentKind {
        ComponentKind::EventDriven
    }

    fn ports(&self) -> Ports {
        Ports::new().input("in", InputSpec::buffer("b").trigger())
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        let n = ctx.input("in")?.len();
        self.count.fetch_add(n as u32, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_pending_events_are_drained_on_shutdown() {
    let count = Arc::new(AtomicU32::new(0));
    let mut builder = GraphBuilder::new();
    builder.add(Relay).unwrap();
    builder.add(Count { count: count.clone() }).unwrap();
    let scheduler = Scheduler::new(builder.build(), config(Duration::from_secs(1)));

    let handle = scheduler.handle();
    handle.shutdown();
    for value in 0..5_u32 {
        handle.publish("a", value).unwrap();
    }
    let report = scheduler.run().await;

    assert_eq!(count.load(Ordering::SeqCst), 5);
    assert_eq!(report.invocations.get("Relay0"), Some(&1));
    assert_eq!(report.invocations.get("Count0"), Some(&1));
}

/// Stops the runtime when triggered and fails to release its resources.
struct LeakyCleanup;

impl Component for LeakyCleanup {
    fn kind(&self) -> ComponentKind {
        ComponentKind::EventDriven
    }

    fn ports(&self) -> Ports {
        Ports::new().input("stop", InputSpec::latest("stop").trigger())
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        ctx.shutdown();
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        anyhow::bail!("device still busy")
    }
}

#[tokio::test]
async fn test_cleanup_failure_is_reported() {
    let (component, outcome) = sleeper(Duration::from_millis(1));
    let mut builder = GraphBuilder::new();
    let leaky = builder.add(LeakyCleanup).unwrap();
    builder.add(component).unwrap();
    let scheduler = Scheduler::new(builder.build(), config(Duration::from_secs(1)));

    scheduler.handle().publish("stop", ()).unwrap();
    let report = scheduler.run().await;

    assert_eq!(report.processing_errors.len(), 1);
    let failure = &report.processing_errors[0];
    assert_eq!(failure.component, leaky);
    assert_eq!(failure.phase, Phase::Cleanup);
    assert_eq!(failure.error.to_string(), "device still busy");
    assert!(report.has_error_occurred());
    assert!(outcome.cleaned_up.load(Ordering::SeqCst));
}
